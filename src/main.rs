use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use relay::balancer::LoadBalancer;
use relay::cache::ResponseCache;
use relay::config::Config;
use relay::limiter::{self, ClientIpExtractor};
use relay::proxy::{ProbeHandler, ProxyHandler, ProxyServer};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_PAUSE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "A health-checked, caching, rate-limited HTTP reverse proxy")]
struct Args {
    #[arg(short, long, default_value = "config/config.toml")]
    config: String,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("relay={},access=info", level))
        .init();

    info!("starting relay");

    let config = Config::from_file(&args.config)
        .await
        .context("failed to load configuration")?;

    // Assemble the pipeline
    let load_balancer = Arc::new(LoadBalancer::new(&config.load_balancer));
    load_balancer.pool().start();

    let cache = if config.cache.disabled {
        info!("response cache disabled");
        None
    } else {
        Some(Arc::new(ResponseCache::new(&config.cache)))
    };

    let limiter = limiter::from_config(&config.rate_limiter);
    let extractor = Arc::new(
        ClientIpExtractor::new(&config.rate_limiter.trusted_proxies)
            .context("invalid trusted_proxies configuration")?,
    );

    let handler = ProxyHandler::new(
        Arc::clone(&load_balancer),
        cache.clone(),
        Arc::clone(&limiter),
        extractor,
    );
    let probe = ProbeHandler::new(load_balancer.pool().readiness());

    let proxy_addr = resolve(&config.proxy.host, config.proxy.port)?;
    let probe_addr = resolve(&config.proxy.host, config.proxy.probe_port)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = ProxyServer::new(proxy_addr, probe_addr, handler, probe);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    // Wait for shutdown signal
    signal::ctrl_c()
        .await
        .context("failed to install CTRL+C signal handler")?;
    warn!("shutdown signal received, draining");

    // Stop the health checker first so it cannot flip readiness back, then
    // advertise not-ready and give orchestrators a moment to stop sending
    // traffic before the listeners go away.
    load_balancer.pool().stop();
    load_balancer.pool().readiness().store(false, Ordering::SeqCst);
    tokio::time::sleep(DRAIN_PAUSE).await;

    let _ = shutdown_tx.send(true);
    if let Some(cache) = &cache {
        cache.stop();
    }
    limiter.stop();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await {
        Ok(joined) => joined.context("server task panicked")??,
        Err(_) => warn!("server shutdown timeout exceeded"),
    }

    info!("relay shutdown complete");
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve listener address {}:{}", host, port))?
        .next()
        .with_context(|| format!("no address for {}:{}", host, port))
}
