//! Relay - a layer-7 HTTP reverse proxy
//!
//! Relay accepts client requests on a listener port, selects a healthy
//! upstream backend from a configured pool, forwards the request, and
//! returns the backend's response. Around the forwarding core it keeps:
//! - a backend pool with background health checking and per-backend backoff
//! - pluggable balancing strategies (round-robin, least-connections,
//!   random-weight)
//! - an in-memory response cache with `Vary`-aware keys and TTL eviction
//! - a per-client rate limit with trusted-proxy client resolution
//! - liveness and readiness probes on a separate administrative port

pub mod balancer;
pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;
pub mod proxy;

// Re-export commonly used types
pub use balancer::{Backend, LoadBalancer, Pool};
pub use cache::{CacheEntry, ResponseCache};
pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use limiter::{ClientIpExtractor, RateLimiter};
pub use proxy::{ProbeHandler, ProxyHandler, ProxyServer};
