//! Request pipeline, upstream client, listeners and probes.

pub mod handler;
pub mod http_client;
pub mod probe;
pub mod server;

pub use handler::ProxyHandler;
pub use probe::ProbeHandler;
pub use server::ProxyServer;

use hyper::{Body, Response, StatusCode};

/// Plain-text response with the given status
pub(crate) fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .expect("building static response should not fail")
}
