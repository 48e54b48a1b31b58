//! Upstream groups and the per-query race.
//!
//! [`UpstreamGroup::race`] spawns one task per handle and yields their
//! answers in arrival order. Dropping the [`Race`] cancels every task that
//! has not finished yet; the in-flight exchange future is dropped with it,
//! which closes its socket.

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use hickory_proto::op::Message;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use crate::error::Result;
use crate::upstream::UpstreamHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupRole {
    Local,
    Remote,
}

impl GroupRole {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupRole::Local => "local",
            GroupRole::Remote => "remote",
        }
    }
}

impl fmt::Display for GroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed exchange from a race.
#[derive(Debug)]
pub struct CandidateAnswer {
    pub role: GroupRole,
    /// Copied from the source handle.
    pub trusted: bool,
    pub upstream: String,
    pub result: Result<Message>,
    /// Time since the race started.
    pub elapsed: Duration,
}

/// Ordered set of upstream handles sharing a role.
#[derive(Debug, Clone)]
pub struct UpstreamGroup {
    role: GroupRole,
    handles: Vec<UpstreamHandle>,
}

impl UpstreamGroup {
    pub fn new(role: GroupRole, handles: Vec<UpstreamHandle>) -> Self {
        Self { role, handles }
    }

    pub fn role(&self) -> GroupRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[UpstreamHandle] {
        &self.handles
    }

    /// Query every handle concurrently.
    ///
    /// Must be called from within a tokio runtime.
    pub fn race(&self, query: &Message) -> Race {
        let token = CancellationToken::new();
        let query = Arc::new(query.clone());
        let started = Instant::now();

        let pending = self
            .handles
            .iter()
            .map(|handle| {
                let handle = handle.clone();
                let query = query.clone();
                let token = token.clone();
                let role = self.role;
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        result = handle.exchange(&query) => Some(CandidateAnswer {
                            role,
                            trusted: handle.trusted(),
                            upstream: handle.address().to_string(),
                            result,
                            elapsed: started.elapsed(),
                        }),
                    }
                })
            })
            .collect();

        Race {
            pending,
            _cancel_on_drop: token.drop_guard(),
        }
    }
}

/// Stream of [`CandidateAnswer`]s in arrival order.
///
/// Ends once every handle has answered or failed. Not restartable.
pub struct Race {
    pending: FuturesUnordered<JoinHandle<Option<CandidateAnswer>>>,
    _cancel_on_drop: DropGuard,
}

impl Race {
    /// Tasks that have not delivered a candidate yet.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl Stream for Race {
    type Item = CandidateAnswer;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.pending.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(Some(candidate)))) => return Poll::Ready(Some(candidate)),
                // Cancelled before answering; only happens while being torn down.
                Poll::Ready(Some(Ok(None))) => continue,
                Poll::Ready(Some(Err(e))) => {
                    warn!(error = %e, "Upstream task failed");
                    continue;
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::upstream::Upstream;
    use async_trait::async_trait;
    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Delayed {
        name: String,
        delay: Duration,
        fail: bool,
        completed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Upstream for Delayed {
        async fn exchange(&self, query: &Message) -> Result<Message> {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::timeout(&self.name));
            }
            Ok(query.clone())
        }

        fn address(&self) -> &str {
            &self.name
        }
    }

    fn handle(name: &str, ms: u64, fail: bool, completed: &Arc<AtomicUsize>) -> UpstreamHandle {
        UpstreamHandle::new(
            Arc::new(Delayed {
                name: name.to_string(),
                delay: Duration::from_millis(ms),
                fail,
                completed: completed.clone(),
            }),
            false,
        )
    }

    fn query() -> Message {
        let mut msg = Message::new();
        msg.add_query(Query::query(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
        ));
        msg
    }

    #[tokio::test(start_paused = true)]
    async fn race_yields_in_arrival_order() {
        let completed = Arc::new(AtomicUsize::new(0));
        let group = UpstreamGroup::new(
            GroupRole::Local,
            vec![
                handle("slow", 30, false, &completed),
                handle("fast", 10, false, &completed),
                handle("broken", 20, true, &completed),
            ],
        );

        let answers: Vec<CandidateAnswer> = group.race(&query()).collect().await;

        let order: Vec<&str> = answers.iter().map(|c| c.upstream.as_str()).collect();
        assert_eq!(order, vec!["fast", "broken", "slow"]);
        assert!(answers[1].result.is_err());
        assert_eq!(answers[0].elapsed, Duration::from_millis(10));
        assert!(answers.iter().all(|c| c.role == GroupRole::Local));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_race_cancels_outstanding_exchanges() {
        let completed = Arc::new(AtomicUsize::new(0));
        let group = UpstreamGroup::new(
            GroupRole::Remote,
            vec![
                handle("fast", 10, false, &completed),
                handle("slow", 100, false, &completed),
            ],
        );

        let mut race = group.race(&query());
        let first = race.next().await.unwrap();
        assert_eq!(first.upstream, "fast");
        assert_eq!(race.remaining(), 1);
        drop(race);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_group_ends_immediately() {
        let group = UpstreamGroup::new(GroupRole::Local, Vec::new());

        let answers: Vec<CandidateAnswer> = group.race(&query()).collect().await;

        assert!(answers.is_empty());
    }
}
