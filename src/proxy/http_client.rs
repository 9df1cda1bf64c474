//! Shared upstream HTTP client.

use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use once_cell::sync::Lazy;

use crate::error::{RelayError, RelayResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 100;

/// Single client instance reused for every upstream request so connection
/// pooling amortizes across the process. Supports both http and https
/// upstreams; redirect responses are returned verbatim (hyper's client
/// never follows them).
static SHARED_CLIENT: Lazy<Client<HttpsConnector<HttpConnector>, Body>> = Lazy::new(build_client);

fn build_client() -> Client<HttpsConnector<HttpConnector>, Body> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(CONNECT_TIMEOUT));
    http.set_keepalive(Some(KEEP_ALIVE));

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder()
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build::<_, Body>(https)
}

/// Execute an upstream request on the shared client
pub async fn dispatch(req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    SHARED_CLIENT.request(req).await
}

/// Lightweight GET returning only the status code, bounded by `timeout`.
/// Used by the health checker.
pub async fn get_status(url: &str, timeout: Duration) -> RelayResult<StatusCode> {
    let uri: Uri = url
        .parse()
        .map_err(|e| RelayError::health_check(format!("invalid health url {}: {}", url, e)))?;
    let req = Request::builder()
        .method(hyper::Method::GET)
        .uri(uri)
        .body(Body::empty())?;

    let response = tokio::time::timeout(timeout, SHARED_CLIENT.request(req))
        .await
        .map_err(|_| RelayError::timeout(timeout, "health probe"))??;
    Ok(response.status())
}
