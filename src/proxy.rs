//! DNS proxy orchestration.
//!
//! Builds the dispatcher from configuration, binds transports and runs the
//! periodic maintenance task.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::AnswerCache;
use crate::dispatch::{Dispatcher, DispatcherConfig};
use crate::error::{Error, Result};
use crate::group::{GroupRole, UpstreamGroup};
use crate::matcher::{DomainMatcher, DomainSet, IpMatcher, NetList};
use crate::stats::Stats;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};
use crate::upstream::{UpstreamHandle, UpstreamSpec};

/// Interval between statistics reports and cache purges.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the DNS proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the UDP and TCP listeners bind to.
    pub bind_addr: SocketAddr,
    /// Total cache capacity; small values disable the cache.
    pub cache_capacity: usize,
    /// Local upstreams, first one trusted.
    pub local_upstreams: Vec<UpstreamSpec>,
    /// Files listing the trusted IP ranges.
    pub local_ip_files: Vec<PathBuf>,
    /// Files listing domains always resolved locally.
    pub local_domain_files: Vec<PathBuf>,
    /// Grace window a remote answer waits for a trusted local one.
    pub local_latency: Duration,
    /// Remote upstreams, first one trusted.
    pub remote_upstreams: Vec<UpstreamSpec>,
    /// Files listing domains always resolved remotely.
    pub remote_domain_files: Vec<PathBuf>,
}

/// Build a group where the first upstream is trusted.
fn build_group(role: GroupRole, specs: &[UpstreamSpec]) -> UpstreamGroup {
    let handles = specs
        .iter()
        .enumerate()
        .map(|(idx, spec)| UpstreamHandle::new(spec.connect(), idx == 0))
        .collect();
    UpstreamGroup::new(role, handles)
}

fn load_domains(role: GroupRole, paths: &[PathBuf]) -> Result<Option<Arc<dyn DomainMatcher>>> {
    if paths.is_empty() {
        return Ok(None);
    }
    let set = DomainSet::from_files(paths)?;
    info!(group = %role, rules = set.len(), "Loaded domain list");
    Ok(Some(Arc::new(set)))
}

/// Turn the configuration into a ready dispatcher, loading every rule file.
pub fn build_dispatcher(config: &ProxyConfig) -> Result<Dispatcher> {
    if config.local_upstreams.is_empty() {
        return Err(Error::Config("at least one local upstream is required".into()));
    }
    if config.remote_upstreams.is_empty() {
        return Err(Error::Config("at least one remote upstream is required".into()));
    }

    let trusted_ips = NetList::from_files(&config.local_ip_files)?;
    info!(ranges = trusted_ips.len(), "Loaded trusted IP ranges");

    let cache = AnswerCache::with_capacity(config.cache_capacity);
    if !cache.is_enabled() {
        info!("Answer cache disabled");
    }

    Ok(Dispatcher::new(DispatcherConfig {
        local: build_group(GroupRole::Local, &config.local_upstreams),
        remote: build_group(GroupRole::Remote, &config.remote_upstreams),
        local_domains: load_domains(GroupRole::Local, &config.local_domain_files)?,
        remote_domains: load_domains(GroupRole::Remote, &config.remote_domain_files)?,
        trusted_ips: Arc::new(trusted_ips),
        grace: config.local_latency,
        cache: Arc::new(cache),
        stats: Arc::new(Stats::new()),
    }))
}

/// Run the DNS proxy with the given configuration.
///
/// Starts UDP and TCP transports on the bind address. Runs until the
/// returned future is dropped.
pub async fn run(config: ProxyConfig) -> Result<()> {
    let dispatcher = Arc::new(build_dispatcher(&config)?);

    let udp = UdpTransport::bind(config.bind_addr)
        .await
        .map_err(|source| Error::Listen {
            addr: config.bind_addr,
            source,
        })?;
    let tcp = TcpTransport::bind(config.bind_addr)
        .await
        .map_err(|source| Error::Listen {
            addr: config.bind_addr,
            source,
        })?;

    let upstream_list = |specs: &[UpstreamSpec]| {
        specs.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
    };
    info!(addr = %config.bind_addr, "DNS proxy listening");
    info!(
        local = %upstream_list(&config.local_upstreams),
        remote = %upstream_list(&config.remote_upstreams),
        grace_ms = config.local_latency.as_millis() as u64,
        "Racing upstreams"
    );

    udp.start(dispatcher.clone());
    tcp.start(dispatcher.clone());

    // Report stats and purge the cache every minute
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let purged = dispatcher.cache().purge_expired();
            let stats = dispatcher.stats().snapshot_and_reset();
            info!(
                uptime_secs = stats.uptime_secs,
                cache = dispatcher.cache().len(),
                purged,
                requests = stats.requests,
                cached = stats.cached,
                local = stats.local,
                remote = stats.remote,
                failed = stats.failed,
                avg_response_ms = %format!("{:.2}", stats.avg_response_ms),
                "stats"
            );
        }
    });

    // Keep running until cancelled
    std::future::pending::<()>().await;

    Ok(())
}
