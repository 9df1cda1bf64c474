//! The request pipeline.
//!
//! Order of operations: rate limit, cache lookup, readiness gate, backend
//! selection, upstream dispatch, response relay, conditional cache insert.
//! Every recoverable failure maps to a status code; nothing propagates to
//! the connection.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::body::HttpBody;
use hyper::header::{HeaderValue, HOST, RETRY_AFTER};
use hyper::{Body, Request, Response, StatusCode, Uri};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::http_client;
use super::text_response;
use crate::balancer::LoadBalancer;
use crate::cache::{policy, strip_hop_by_hop, ResponseCache};
use crate::error::RelayError;
use crate::limiter::{ClientIpExtractor, RateLimiter};

const REQUEST_ID_HEADER: &str = "x-request-id";
const CACHE_HEADER: &str = "x-cache";

/// Cache decision and backend attribution captured by the pipeline for the
/// access line. `HIT` and `MISS` are the wire-visible outcomes; the
/// `NOT_CACHED` reason is logging only.
#[derive(Debug)]
pub struct ResponseMeta {
    cache_status: &'static str,
    cache_reason: &'static str,
    backend: String,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            cache_status: "UNKNOWN",
            cache_reason: "",
            backend: "-".to_string(),
        }
    }
}

impl ResponseMeta {
    fn set_cache_decision(&mut self, status: &'static str, reason: &'static str, backend: &str) {
        self.cache_status = status;
        self.cache_reason = reason;
        self.backend = backend.to_string();
    }

    pub fn cache_status(&self) -> &str {
        self.cache_status
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }
}

#[derive(Clone)]
pub struct ProxyHandler {
    load_balancer: Arc<LoadBalancer>,
    cache: Option<Arc<ResponseCache>>,
    limiter: Arc<dyn RateLimiter>,
    extractor: Arc<ClientIpExtractor>,
}

impl ProxyHandler {
    pub fn new(
        load_balancer: Arc<LoadBalancer>,
        cache: Option<Arc<ResponseCache>>,
        limiter: Arc<dyn RateLimiter>,
        extractor: Arc<ClientIpExtractor>,
    ) -> Self {
        Self {
            load_balancer,
            cache,
            limiter,
            extractor,
        }
    }

    /// Entry point for the hyper service. Emits the access line once the
    /// pipeline completes; errors never escape to the connection.
    pub async fn handle(
        &self,
        mut req: Request<Body>,
        peer: SocketAddr,
    ) -> Result<Response<Body>, Infallible> {
        let start = Instant::now();

        // propagate the inbound request id, or mint one
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if !req.headers().contains_key(REQUEST_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
        }

        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let mut meta = ResponseMeta::default();
        let response = match self.process(req, peer, &mut meta).await {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "request processing error");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let bytes = response.body().size_hint().exact().unwrap_or(0);
        info!(
            target: "access",
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            bytes,
            backend = %meta.backend,
            cache = meta.cache_status,
            reason = meta.cache_reason,
            latency_ms = start.elapsed().as_millis() as u64,
            "request complete"
        );

        Ok(response)
    }

    async fn process(
        &self,
        req: Request<Body>,
        peer: SocketAddr,
        meta: &mut ResponseMeta,
    ) -> Result<Response<Body>, RelayError> {
        // 1. Admission control before any other work.
        let client_ip = self.extractor.extract(peer, req.headers());
        let (admitted, retry_after) = self.limiter.allow(&client_ip.to_string());
        if !admitted {
            debug!(client = %client_ip, "rate limit exceeded");
            let seconds = retry_after.as_secs_f64().ceil() as u64;
            return Ok(Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .header(RETRY_AFTER, seconds)
                .header(hyper::header::CONTENT_TYPE, "text/plain")
                .body(Body::from("Too Many Requests"))?);
        }

        // 2. Cache lookup.
        let host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let resource_key = ResponseCache::resource_key(req.method(), &host, &path_and_query);

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&resource_key, req.headers()).await {
                let (body, headers) = entry.into_parts();
                let mut response = Response::new(Body::from(body));
                *response.headers_mut() = headers;
                response
                    .headers_mut()
                    .insert(CACHE_HEADER, HeaderValue::from_static("HIT"));
                *response.status_mut() = StatusCode::OK;
                meta.set_cache_decision("HIT", "cached entry", "-");
                return Ok(response);
            }
        }

        // 3. Readiness gate.
        if !self.load_balancer.is_ready() {
            return Ok(text_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable",
            ));
        }

        // 4. Backend selection.
        let backend = match self.load_balancer.next() {
            Ok(backend) => backend,
            Err(e) => {
                warn!(error = %e, "no backend available");
                return Ok(text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service Unavailable",
                ));
            }
        };

        // 5. Outbound request: same method and body, backend base URL plus
        //    the inbound path and query, headers minus the hop-by-hop set.
        let (parts, body) = req.into_parts();
        let outbound_uri: Uri = match format!("{}{}", backend.url(), path_and_query).parse() {
            Ok(uri) => uri,
            Err(e) => {
                warn!(backend = %backend.name(), error = %e, "failed to build upstream uri");
                return Ok(text_response(StatusCode::BAD_REQUEST, "Bad Request"));
            }
        };

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method.clone();
        *outbound.headers_mut() = strip_hop_by_hop(&parts.headers);
        if let Some(authority) = outbound_uri.authority() {
            match HeaderValue::from_str(authority.as_str()) {
                Ok(value) => {
                    outbound.headers_mut().insert(HOST, value);
                }
                Err(e) => {
                    warn!(backend = %backend.name(), error = %e, "invalid upstream authority");
                    return Ok(text_response(StatusCode::BAD_REQUEST, "Bad Request"));
                }
            }
        }
        *outbound.uri_mut() = outbound_uri;

        // 6. Dispatch. The guard returns the connection slot on every exit
        //    path, including panics.
        let _connections = backend.acquire_connection();
        debug!(backend = %backend.name(), uri = %outbound.uri(), "forwarding request");

        let upstream = match http_client::dispatch(outbound).await {
            Ok(response) => response,
            Err(e) => {
                warn!(backend = %backend.name(), error = %e, "upstream request failed");
                return Ok(text_response(StatusCode::BAD_GATEWAY, "Bad Gateway"));
            }
        };

        // 7. Read the full upstream body; it is needed for the cache
        //    decision as well as the relay.
        let (upstream_parts, upstream_body) = upstream.into_parts();
        let body_bytes = match hyper::body::to_bytes(upstream_body).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(backend = %backend.name(), error = %e, "failed to read upstream body");
                return Ok(text_response(
                    StatusCode::BAD_GATEWAY,
                    "Error reading backend response",
                ));
            }
        };

        // 8. Relay: headers minus hop-by-hop, then status, then body.
        let mut response = Response::new(Body::from(body_bytes.clone()));
        *response.headers_mut() = strip_hop_by_hop(&upstream_parts.headers);
        *response.status_mut() = upstream_parts.status;

        // 9. Conditional insert. Failures here must never affect the
        //    response already built for the client.
        if let Some(cache) = &self.cache {
            match policy::cacheability(&parts.method, upstream_parts.status, &upstream_parts.headers)
            {
                None => {
                    cache
                        .insert(resource_key, &parts.headers, &upstream_parts.headers, body_bytes)
                        .await;
                    meta.set_cache_decision("MISS", "stored", backend.name());
                }
                Some(reason) => {
                    meta.set_cache_decision("NOT_CACHED", reason, backend.name());
                }
            }
        } else {
            meta.set_cache_decision("NOT_CACHED", "cache disabled", backend.name());
        }

        Ok(response)
    }
}
