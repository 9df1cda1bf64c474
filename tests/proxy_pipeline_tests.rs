//! End-to-end pipeline tests against in-process backends.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, HeaderMap, Request, Response, Server, StatusCode};

use relay::balancer::LoadBalancer;
use relay::cache::ResponseCache;
use relay::config::{
    BackendConfig, CacheConfig, HealthCheckerConfig, LoadBalancerConfig, PoolConfig,
    RateLimiterConfig,
};
use relay::limiter::{ClientIpExtractor, FixedWindow, RateLimiter};
use relay::proxy::ProxyHandler;

/// A test backend: counts requests and builds responses from the request
type ResponseFn = Arc<dyn Fn(&hyper::http::request::Parts) -> Response<Body> + Send + Sync>;

async fn spawn_backend(respond: ResponseFn) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_for_service = Arc::clone(&hits);

    let make_svc = make_service_fn(move |_| {
        let respond = Arc::clone(&respond);
        let hits = Arc::clone(&hits_for_service);
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let respond = Arc::clone(&respond);
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let (parts, _body) = req.into_parts();
                    Ok::<_, Infallible>(respond(&parts))
                }
            }))
        }
    });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    (addr, hits)
}

fn backend_config(name: &str, addr: SocketAddr) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        url: format!("http://{}", addr),
        health_url: format!("http://{}/health", addr),
        weight: 1,
        max_conns: 100,
    }
}

fn load_balancer_for(backends: Vec<BackendConfig>) -> Arc<LoadBalancer> {
    let lb = Arc::new(LoadBalancer::new(&LoadBalancerConfig {
        lb_type: "round-robin".to_string(),
        pool: PoolConfig {
            backends,
            health_checker: HealthCheckerConfig::default(),
        },
    }));
    // mark everything healthy without waiting for probe rounds
    for backend in lb.pool().snapshot() {
        backend.update_health(true);
    }
    lb.pool().refresh_readiness();
    lb
}

fn generous_limiter() -> Arc<dyn RateLimiter> {
    Arc::new(FixedWindow::new(&RateLimiterConfig {
        limit: 1000,
        ..Default::default()
    }))
}

fn extractor() -> Arc<ClientIpExtractor> {
    Arc::new(ClientIpExtractor::new(&[]).unwrap())
}

fn test_cache() -> Arc<ResponseCache> {
    Arc::new(ResponseCache::new(&CacheConfig {
        disabled: false,
        default_ttl: 300,
        max_age: 3600,
        purge_interval: 600,
    }))
}

fn peer() -> SocketAddr {
    "127.0.0.1:54321".parse().unwrap()
}

async fn read_body(response: Response<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let status = response.status();
    let headers = response.headers().clone();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, headers, body.to_vec())
}

#[tokio::test]
async fn test_basic_forward() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (addr, hits) = spawn_backend(Arc::new(|parts| {
            assert_eq!(parts.method, hyper::Method::GET);
            assert_eq!(parts.uri.path(), "/hello");
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain")
                .body(Body::from("hello world"))
                .unwrap()
        }))
        .await;

        let handler = ProxyHandler::new(
            load_balancer_for(vec![backend_config("b0", addr)]),
            Some(test_cache()),
            generous_limiter(),
            extractor(),
        );

        let req = Request::get("/hello").body(Body::empty()).unwrap();
        let response = handler.handle(req, peer()).await.unwrap();
        let (status, headers, body) = read_body(response).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello world");
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
        // a plain forward carries no X-Cache header
        assert!(!headers.contains_key("x-cache"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_cache_hit_suppresses_second_backend_call() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (addr, hits) = spawn_backend(Arc::new(|_| {
            Response::builder()
                .status(StatusCode::OK)
                .header("cache-control", "max-age=60")
                .body(Body::from(r#"{"v":1}"#))
                .unwrap()
        }))
        .await;

        let handler = ProxyHandler::new(
            load_balancer_for(vec![backend_config("b0", addr)]),
            Some(test_cache()),
            generous_limiter(),
            extractor(),
        );

        // prime
        let req = Request::get("/data").body(Body::empty()).unwrap();
        let response = handler.handle(req, peer()).await.unwrap();
        let (status, headers, body) = read_body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"v":1}"#);
        assert!(!headers.contains_key("x-cache"));

        // second request is served from cache
        let req = Request::get("/data").body(Body::empty()).unwrap();
        let response = handler.handle(req, peer()).await.unwrap();
        let (status, headers, body) = read_body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"v":1}"#);
        assert_eq!(headers.get("x-cache").unwrap(), "HIT");
        assert_eq!(hits.load(Ordering::SeqCst), 1, "backend called twice");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_vary_produces_distinct_variants() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (addr, hits) = spawn_backend(Arc::new(|parts| {
            let lang = parts
                .headers
                .get("accept-language")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_uppercase();
            Response::builder()
                .status(StatusCode::OK)
                .header("vary", "Accept-Language")
                .header("cache-control", "max-age=60")
                .body(Body::from(lang))
                .unwrap()
        }))
        .await;

        let handler = ProxyHandler::new(
            load_balancer_for(vec![backend_config("b0", addr)]),
            Some(test_cache()),
            generous_limiter(),
            extractor(),
        );

        let request = |lang: &str| {
            Request::get("/page")
                .header("accept-language", lang)
                .body(Body::empty())
                .unwrap()
        };

        // prime the English variant
        let (_, _, body) = read_body(handler.handle(request("en"), peer()).await.unwrap()).await;
        assert_eq!(body, b"EN");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // same variant: served from cache
        let (_, headers, body) =
            read_body(handler.handle(request("en"), peer()).await.unwrap()).await;
        assert_eq!(body, b"EN");
        assert_eq!(headers.get("x-cache").unwrap(), "HIT");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // different variant: miss, goes to the backend
        let (_, headers, body) =
            read_body(handler.handle(request("fr"), peer()).await.unwrap()).await;
        assert_eq!(body, b"FR");
        assert!(!headers.contains_key("x-cache"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_round_robin_across_three_backends() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut configs = Vec::new();
        let mut hit_counters = Vec::new();
        for i in 0..3 {
            let body = format!("backend-{}", i);
            let (addr, hits) = spawn_backend(Arc::new(move |_| {
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from(body.clone()))
                    .unwrap()
            }))
            .await;
            configs.push(backend_config(&format!("b{}", i), addr));
            hit_counters.push(hits);
        }

        // cache disabled so every request reaches a backend
        let handler = ProxyHandler::new(
            load_balancer_for(configs),
            None,
            generous_limiter(),
            extractor(),
        );

        let mut bodies = Vec::new();
        for _ in 0..6 {
            let req = Request::get("/").body(Body::empty()).unwrap();
            let (_, _, body) = read_body(handler.handle(req, peer()).await.unwrap()).await;
            bodies.push(String::from_utf8(body).unwrap());
        }

        assert_eq!(
            bodies,
            vec![
                "backend-0",
                "backend-1",
                "backend-2",
                "backend-0",
                "backend-1",
                "backend-2"
            ]
        );
        for hits in &hit_counters {
            assert_eq!(hits.load(Ordering::SeqCst), 2);
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (addr, _hits) = spawn_backend(Arc::new(|_| {
            Response::builder()
                .status(StatusCode::OK)
                .body(Body::from("ok"))
                .unwrap()
        }))
        .await;

        let limiter: Arc<dyn RateLimiter> = Arc::new(FixedWindow::new(&RateLimiterConfig {
            limit: 2,
            ..Default::default()
        }));
        let handler = ProxyHandler::new(
            load_balancer_for(vec![backend_config("b0", addr)]),
            None,
            limiter,
            extractor(),
        );

        for _ in 0..2 {
            let req = Request::get("/").body(Body::empty()).unwrap();
            let (status, _, body) = read_body(handler.handle(req, peer()).await.unwrap()).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"ok");
        }

        let req = Request::get("/").body(Body::empty()).unwrap();
        let (status, headers, body) = read_body(handler.handle(req, peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, b"Too Many Requests");
        assert_eq!(headers.get("retry-after").unwrap(), "1");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_no_healthy_backend_returns_503() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let lb = Arc::new(LoadBalancer::new(&LoadBalancerConfig {
            lb_type: "round-robin".to_string(),
            pool: PoolConfig {
                backends: vec![BackendConfig {
                    name: "down".to_string(),
                    url: "http://127.0.0.1:9".to_string(),
                    health_url: "http://127.0.0.1:9/health".to_string(),
                    weight: 1,
                    max_conns: 100,
                }],
                health_checker: HealthCheckerConfig::default(),
            },
        }));
        // no backend ever probed healthy
        let handler = ProxyHandler::new(lb, None, generous_limiter(), extractor());

        let req = Request::get("/").body(Body::empty()).unwrap();
        let (status, _, body) = read_body(handler.handle(req, peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, b"Service Unavailable");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_upstream_transport_failure_returns_502() {
    tokio::time::timeout(Duration::from_secs(10), async {
        // reserve a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handler = ProxyHandler::new(
            load_balancer_for(vec![backend_config("dead", addr)]),
            None,
            generous_limiter(),
            extractor(),
        );

        let req = Request::get("/").body(Body::empty()).unwrap();
        let (status, _, body) = read_body(handler.handle(req, peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, b"Bad Gateway");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_hop_by_hop_headers_not_relayed() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (addr, _hits) = spawn_backend(Arc::new(|parts| {
            // hop-by-hop request headers must not reach the backend
            assert!(!parts.headers.contains_key("proxy-authorization"));
            assert!(parts.headers.contains_key("x-custom"));
            Response::builder()
                .status(StatusCode::OK)
                .header("keep-alive", "timeout=5")
                .header("x-upstream", "yes")
                .body(Body::from("ok"))
                .unwrap()
        }))
        .await;

        let handler = ProxyHandler::new(
            load_balancer_for(vec![backend_config("b0", addr)]),
            None,
            generous_limiter(),
            extractor(),
        );

        let req = Request::get("/")
            .header("proxy-authorization", "Basic abc")
            .header("x-custom", "1")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = read_body(handler.handle(req, peer()).await.unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        assert!(!headers.contains_key("keep-alive"));
        assert_eq!(headers.get("x-upstream").unwrap(), "yes");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_post_body_forwarded_and_not_cached() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (addr, hits) = spawn_backend(Arc::new(|_| {
            Response::builder()
                .status(StatusCode::OK)
                .header("cache-control", "max-age=60")
                .body(Body::from("created"))
                .unwrap()
        }))
        .await;

        let handler = ProxyHandler::new(
            load_balancer_for(vec![backend_config("b0", addr)]),
            Some(test_cache()),
            generous_limiter(),
            extractor(),
        );

        for _ in 0..2 {
            let req = Request::post("/submit")
                .body(Body::from(r#"{"name":"x"}"#))
                .unwrap();
            let (status, headers, _) = read_body(handler.handle(req, peer()).await.unwrap()).await;
            assert_eq!(status, StatusCode::OK);
            assert!(!headers.contains_key("x-cache"));
        }
        // POST is never served from cache
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_upstream_error_status_relayed_verbatim() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let (addr, _hits) = spawn_backend(Arc::new(|_| {
            Response::builder()
                .status(StatusCode::IM_A_TEAPOT)
                .body(Body::from("short and stout"))
                .unwrap()
        }))
        .await;

        let handler = ProxyHandler::new(
            load_balancer_for(vec![backend_config("b0", addr)]),
            Some(test_cache()),
            generous_limiter(),
            extractor(),
        );

        let req = Request::get("/teapot").body(Body::empty()).unwrap();
        let (status, headers, body) = read_body(handler.handle(req, peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(body, b"short and stout");
        assert!(!headers.contains_key("x-cache"));
    })
    .await
    .expect("test timed out");
}
