//! Proxy and probe listeners.

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Result;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Server};
use tokio::sync::watch;
use tracing::{error, info};

use super::handler::ProxyHandler;
use super::probe::ProbeHandler;

/// Runs the proxy listener and the administrative probe listener until the
/// shutdown signal fires. The two listeners are separate sockets so
/// orchestrators can keep probing while the proxy port drains.
pub struct ProxyServer {
    proxy_addr: SocketAddr,
    probe_addr: SocketAddr,
    handler: ProxyHandler,
    probe: ProbeHandler,
}

impl ProxyServer {
    pub fn new(
        proxy_addr: SocketAddr,
        probe_addr: SocketAddr,
        handler: ProxyHandler,
        probe: ProbeHandler,
    ) -> Self {
        Self {
            proxy_addr,
            probe_addr,
            handler,
            probe,
        }
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let handler = self.handler.clone();
        let proxy_service = make_service_fn(move |conn: &AddrStream| {
            let handler = handler.clone();
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let handler = handler.clone();
                    async move { handler.handle(req, remote).await }
                }))
            }
        });

        let probe_handler = self.probe.clone();
        let probe_service = make_service_fn(move |_conn: &AddrStream| {
            let probe = probe_handler.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let probe = probe.clone();
                    async move { probe.handle(req).await }
                }))
            }
        });

        let mut proxy_shutdown = shutdown.clone();
        let proxy_server = Server::try_bind(&self.proxy_addr)?
            .serve(proxy_service)
            .with_graceful_shutdown(async move {
                let _ = proxy_shutdown.changed().await;
            });

        let mut probe_shutdown = shutdown;
        let probe_server = Server::try_bind(&self.probe_addr)?
            .serve(probe_service)
            .with_graceful_shutdown(async move {
                let _ = probe_shutdown.changed().await;
            });

        info!("proxy server listening on {}", self.proxy_addr);
        info!("probe server listening on {}", self.probe_addr);

        let (proxy_result, probe_result) = tokio::join!(proxy_server, probe_server);
        if let Err(e) = proxy_result {
            error!("proxy server error: {}", e);
        }
        if let Err(e) = probe_result {
            error!("probe server error: {}", e);
        }

        Ok(())
    }
}
