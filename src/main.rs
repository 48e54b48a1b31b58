use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use splitdns::proxy::{self, ProxyConfig};
use splitdns::upstream::UpstreamSpec;

#[derive(Parser)]
#[command(name = "splitdns")]
#[command(about = "Split-horizon DNS dispatcher", long_about = None)]
struct Args {
    /// Address to listen on for UDP and TCP queries
    #[arg(short, long)]
    server: SocketAddr,

    /// Total answer cache capacity (8 or fewer disables the cache)
    #[arg(short, long, default_value_t = 0)]
    cache: usize,

    /// Local upstream, [udp|tcp]://HOST[:PORT][?socks5=ADDR&netaddr=ADDR]; the first is trusted
    #[arg(long = "local-upstream", required = true, value_parser = parse_upstream)]
    local_upstreams: Vec<UpstreamSpec>,

    /// File of trusted IP ranges for local answers
    #[arg(long = "local-ip", required = true)]
    local_ips: Vec<PathBuf>,

    /// File of domains always resolved by the local upstreams
    #[arg(long = "local-domain")]
    local_domains: Vec<PathBuf>,

    /// Milliseconds a remote answer waits for a trusted local answer
    #[arg(long = "local-latency", default_value_t = 50)]
    local_latency: u64,

    /// Remote upstream, same format as --local-upstream; the first is trusted
    #[arg(long = "remote-upstream", required = true, value_parser = parse_upstream)]
    remote_upstreams: Vec<UpstreamSpec>,

    /// File of domains always resolved by the remote upstreams
    #[arg(long = "remote-domain")]
    remote_domains: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    debug: bool,
}

fn parse_upstream(s: &str) -> Result<UpstreamSpec, String> {
    s.parse::<UpstreamSpec>().map_err(|e| e.to_string())
}

impl Args {
    fn into_config(self) -> ProxyConfig {
        ProxyConfig {
            bind_addr: self.server,
            cache_capacity: self.cache,
            local_upstreams: self.local_upstreams,
            local_ip_files: self.local_ips,
            local_domain_files: self.local_domains,
            local_latency: Duration::from_millis(self.local_latency),
            remote_upstreams: self.remote_upstreams,
            remote_domain_files: self.remote_domains,
        }
    }
}

/// `RUST_LOG` wins over the `--debug` flag when set.
fn init_logging(debug: bool) -> anyhow::Result<()> {
    let default_level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env()
        .context("invalid RUST_LOG filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug)?;

    let config = args.into_config();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    rt.block_on(async {
        tokio::select! {
            result = proxy::run(config) => result.map_err(|e| anyhow::anyhow!("proxy stopped: {}", e)),
            result = wait_for_shutdown() => {
                info!("Shutting down");
                result
            }
        }
    })
}
