//! Query dispatch.
//!
//! Handles the core query processing pipeline:
//! 1. Cache lookup
//! 2. Route by domain lists (forced local, forced remote, or race)
//! 3. Race the chosen upstream group(s) and arbitrate between answers
//! 4. Cache the accepted answer
//!
//! Transports handle the actual I/O, the dispatcher handles decisions.

use async_trait::async_trait;
use futures::StreamExt;
use hickory_proto::op::Message;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::cache::AnswerCache;
use crate::dns::{DnsQuery, cache_ttl, response_from_cache};
use crate::error::{Error, Result};
use crate::group::{CandidateAnswer, GroupRole, Race, UpstreamGroup};
use crate::matcher::{DomainMatcher, IpMatcher};
use crate::stats::Stats;
use crate::transport::QueryHandler;
use crate::validator::{ResponseValidator, Verdict};

/// Which upstream group(s) a query is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Listed in the local domain set: local group only, no validation.
    ForcedLocal,
    /// Listed in the remote domain set: remote group only.
    ForcedRemote,
    /// Race both groups and arbitrate.
    Race,
}

/// Everything the dispatcher needs, injected at startup.
pub struct DispatcherConfig {
    pub local: UpstreamGroup,
    pub remote: UpstreamGroup,
    pub local_domains: Option<Arc<dyn DomainMatcher>>,
    pub remote_domains: Option<Arc<dyn DomainMatcher>>,
    pub trusted_ips: Arc<dyn IpMatcher>,
    /// How long a remote answer waits for a qualifying local one.
    pub grace: Duration,
    pub cache: Arc<AnswerCache>,
    pub stats: Arc<Stats>,
}

/// The answer picked for a request.
#[derive(Debug)]
struct Accepted {
    role: GroupRole,
    upstream: String,
    response: Message,
}

/// Split-horizon dispatcher.
///
/// Immutable after construction apart from the cache and stats, so one
/// instance is shared by every listener task.
pub struct Dispatcher {
    local: UpstreamGroup,
    remote: UpstreamGroup,
    local_domains: Option<Arc<dyn DomainMatcher>>,
    remote_domains: Option<Arc<dyn DomainMatcher>>,
    validator: ResponseValidator,
    grace: Duration,
    cache: Arc<AnswerCache>,
    stats: Arc<Stats>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            local: config.local,
            remote: config.remote,
            local_domains: config.local_domains,
            remote_domains: config.remote_domains,
            validator: ResponseValidator::new(config.trusted_ips),
            grace: config.grace,
            cache: config.cache,
            stats: config.stats,
        }
    }

    /// Route for `name` (no trailing dot). The local list is checked first,
    /// so a name on both lists is forced local.
    pub fn classify(&self, name: &str) -> Route {
        if self
            .local_domains
            .as_ref()
            .is_some_and(|m| m.matches(name))
        {
            return Route::ForcedLocal;
        }
        if self
            .remote_domains
            .as_ref()
            .is_some_and(|m| m.matches(name))
        {
            return Route::ForcedRemote;
        }
        Route::Race
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Resolve one request.
    ///
    /// Returns the accepted response with the request's id, or
    /// [`Error::Exhausted`] when every contacted upstream failed.
    pub async fn resolve(&self, request: &Message) -> Result<Message> {
        let started = Instant::now();
        let key = DnsQuery::parse(request)?;

        if let Some(cached) = self.cache.get(&key) {
            debug!(domain = %key.domain, qtype = key.qtype, "Cache hit");
            self.stats.record_cached(started.elapsed());
            return Ok(response_from_cache(request.id(), &cached));
        }

        let route = self.classify(key.name());
        let outcome = match route {
            Route::ForcedLocal => first_success(self.local.race(request)).await,
            Route::ForcedRemote => first_success(self.remote.race(request)).await,
            Route::Race => self.arbitrate(request).await,
        };

        let accepted = match outcome {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!(domain = %key.domain, ?route, error = %e, "Resolution failed");
                self.stats.record_failed(started.elapsed());
                return Err(e);
            }
        };

        debug!(
            domain = %key.domain,
            qtype = key.qtype,
            ?route,
            group = %accepted.role,
            upstream = %accepted.upstream,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Answer accepted"
        );
        self.stats.record_answered(accepted.role, started.elapsed());

        let mut response = accepted.response;
        response.set_id(request.id());
        if let Some(ttl) = cache_ttl(&response) {
            self.cache.put(key, response.clone(), ttl);
        }
        Ok(response)
    }

    /// Race both groups under the grace window.
    ///
    /// Returning drops both races, which cancels whatever is still in flight.
    async fn arbitrate(&self, request: &Message) -> Result<Accepted> {
        let mut local = self.local.race(request);
        let mut remote = self.remote.race(request);
        let mut local_done = false;
        let mut remote_done = false;
        // Whether the local group has produced any response at all.
        let mut local_answered = false;
        let mut fallback_local: Option<Accepted> = None;
        let mut pending_remote: Option<Accepted> = None;

        let mut grace = pin!(sleep(self.grace));
        let mut grace_armed = false;

        loop {
            if let Some(remote_answer) = pending_remote.take() {
                if local_done && !local_answered {
                    return Ok(remote_answer);
                }
                pending_remote = Some(remote_answer);
            }
            if remote_done && pending_remote.is_none() {
                if let Some(local_answer) = fallback_local.take() {
                    return Ok(local_answer);
                }
                if local_done {
                    return Err(Error::Exhausted);
                }
            }

            tokio::select! {
                biased;

                candidate = local.next(), if !local_done => match candidate {
                    Some(candidate) => {
                        let Some((accepted, trusted, verdict)) = self.judge_local(candidate) else {
                            continue;
                        };
                        local_answered = true;
                        if trusted || verdict.is_acceptable() {
                            return Ok(accepted);
                        }
                        if fallback_local.is_none() {
                            fallback_local = Some(accepted);
                        }
                    }
                    None => local_done = true,
                },

                candidate = remote.next(), if !remote_done && pending_remote.is_none() => match candidate {
                    Some(candidate) => {
                        let Some(accepted) = take_success(candidate) else {
                            continue;
                        };
                        // Nothing to range-check against; first such answer wins.
                        if self.validator.validate(&accepted.response) == Verdict::NoAddress {
                            debug!(upstream = %accepted.upstream, "Remote answer without addresses");
                            return Ok(accepted);
                        }
                        grace.as_mut().reset(Instant::now() + self.grace);
                        grace_armed = true;
                        pending_remote = Some(accepted);
                    }
                    None => remote_done = true,
                },

                _ = &mut grace, if grace_armed => {
                    grace_armed = false;
                    if let Some(remote_answer) = pending_remote.take() {
                        debug!(upstream = %remote_answer.upstream, "Grace window elapsed");
                        return Ok(remote_answer);
                    }
                }
            }
        }
    }

    /// Validate a local candidate. `None` if the exchange itself failed.
    fn judge_local(&self, candidate: CandidateAnswer) -> Option<(Accepted, bool, Verdict)> {
        let trusted = candidate.trusted;
        let accepted = take_success(candidate)?;
        let verdict = self.validator.validate(&accepted.response);
        debug!(
            upstream = %accepted.upstream,
            trusted,
            ?verdict,
            "Local candidate"
        );
        Some((accepted, trusted, verdict))
    }
}

#[async_trait]
impl QueryHandler for Dispatcher {
    async fn handle(&self, request: &Message) -> Result<Message> {
        self.resolve(request).await
    }
}

/// Accept the first successful candidate of a single race.
async fn first_success(mut race: Race) -> Result<Accepted> {
    while let Some(candidate) = race.next().await {
        if let Some(accepted) = take_success(candidate) {
            return Ok(accepted);
        }
    }
    Err(Error::Exhausted)
}

/// Unwrap a candidate's response, logging and discarding failures.
fn take_success(candidate: CandidateAnswer) -> Option<Accepted> {
    match candidate.result {
        Ok(response) => Some(Accepted {
            role: candidate.role,
            upstream: candidate.upstream,
            response,
        }),
        Err(e) => {
            debug!(
                group = %candidate.role,
                upstream = %candidate.upstream,
                elapsed_ms = candidate.elapsed.as_secs_f64() * 1000.0,
                error = %e,
                "Upstream failed"
            );
            None
        }
    }
}
