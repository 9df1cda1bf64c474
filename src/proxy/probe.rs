//! Liveness and readiness endpoints.
//!
//! Served on the administrative listener, physically separate from the
//! proxy listener so orchestrators can probe while the proxy port is
//! drained or saturated.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hyper::{Body, Method, Request, Response, StatusCode};

use super::text_response;

#[derive(Clone)]
pub struct ProbeHandler {
    ready: Arc<AtomicBool>,
}

impl ProbeHandler {
    pub fn new(ready: Arc<AtomicBool>) -> Self {
        Self { ready }
    }

    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let response = match (req.method(), req.uri().path()) {
            (&Method::GET, "/healthz") => text_response(StatusCode::OK, "OK"),
            (&Method::GET, "/readyz") => {
                if self.ready.load(Ordering::SeqCst) {
                    text_response(StatusCode::OK, "OK")
                } else {
                    text_response(StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
                }
            }
            _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
        };
        Ok(response)
    }
}
