//! Configuration loading and validation.
//!
//! The configuration is a TOML file with four sections: the proxy listener,
//! the response cache, the load balancer (backend pool plus health checker)
//! and the rate limiter. Missing values fall back to conservative defaults;
//! `validate()` rejects configurations the proxy cannot run with.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level configuration for the proxy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listener addresses for the proxy and the probe endpoints
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Response cache tuning
    #[serde(default)]
    pub cache: CacheConfig,
    /// Backend pool, health checker and balancing strategy
    pub load_balancer: LoadBalancerConfig,
    /// Per-client admission control
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
}

/// Proxy listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            probe_port: default_probe_port(),
        }
    }
}

/// Response cache configuration. Durations are in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub disabled: bool,
    /// Fallback TTL when the response carries no freshness information
    #[serde(default = "default_cache_ttl")]
    pub default_ttl: u64,
    /// Upper bound applied to every derived TTL
    #[serde(default = "default_cache_max_age")]
    pub max_age: u64,
    /// How often the background sweep removes expired entries
    #[serde(default = "default_purge_interval")]
    pub purge_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            default_ttl: default_cache_ttl(),
            max_age: default_cache_max_age(),
            purge_interval: default_purge_interval(),
        }
    }
}

impl CacheConfig {
    pub fn get_default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    pub fn get_max_age(&self) -> Duration {
        Duration::from_secs(self.max_age)
    }

    pub fn get_purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval)
    }
}

/// Load balancer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadBalancerConfig {
    /// Strategy name: "round-robin", "least-connections" or "random-weight".
    /// Unknown values fall back to round-robin.
    #[serde(rename = "type", default = "default_lb_type")]
    pub lb_type: String,
    pub pool: PoolConfig,
}

/// Backend pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub health_checker: HealthCheckerConfig,
}

/// Single backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub name: String,
    pub url: String,
    /// Absolute URL or a path joined onto `url`. Defaults to `url` + "/health".
    #[serde(default)]
    pub health_url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Maximum concurrent connections; 0 means unlimited
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,
}

/// Health checker configuration. Durations are in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckerConfig {
    #[serde(default = "default_check_interval")]
    pub interval: u64,
    #[serde(default = "default_check_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            interval: default_check_interval(),
            timeout: default_check_timeout(),
            max_concurrent_checks: default_max_concurrent_checks(),
        }
    }
}

impl HealthCheckerConfig {
    pub fn get_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimiterConfig {
    /// Limiter name: "fixed-window", "token-bucket" or "leaky-bucket".
    /// Unknown values fall back to fixed-window.
    #[serde(rename = "type", default = "default_limiter_type")]
    pub limiter_type: String,
    /// Requests per second admitted by the fixed-window limiter
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    /// Bucket capacity for the token and leaky bucket limiters
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Tokens per second (token bucket) or drain rate (leaky bucket)
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u32,
    /// CIDRs or bare IPs whose X-Forwarded-For headers are honored
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limiter_type: default_limiter_type(),
            limit: default_rate_limit(),
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_probe_port() -> u16 {
    8085
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_max_age() -> u64 {
    86_400
}

fn default_purge_interval() -> u64 {
    600
}

fn default_lb_type() -> String {
    "round-robin".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_max_conns() -> usize {
    100
}

fn default_check_interval() -> u64 {
    10
}

fn default_check_timeout() -> u64 {
    5
}

fn default_max_concurrent_checks() -> usize {
    10
}

fn default_limiter_type() -> String {
    "fixed-window".to_string()
}

fn default_rate_limit() -> u32 {
    5
}

fn default_capacity() -> u32 {
    50
}

fn default_refill_rate() -> u32 {
    5
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_defaults();
        config.validate()?;

        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fill in derived values that serde defaults cannot express
    fn apply_defaults(&mut self) {
        for (i, backend) in self.load_balancer.pool.backends.iter_mut().enumerate() {
            if backend.name.is_empty() {
                backend.name = format!("backend{}", i);
            }

            let base = backend.url.trim_end_matches('/');
            if backend.health_url.is_empty() {
                backend.health_url = format!("{}/health", base);
            } else if backend.health_url.starts_with('/') {
                backend.health_url = format!("{}{}", base, backend.health_url);
            }
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        let pool = &self.load_balancer.pool;
        if pool.backends.is_empty() {
            return Err(anyhow::anyhow!("at least one backend must be configured"));
        }

        for backend in &pool.backends {
            if !backend.url.starts_with("http://") && !backend.url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "backend {} url must be a valid HTTP/HTTPS URL: {}",
                    backend.name,
                    backend.url
                ));
            }
            if backend.weight == 0 {
                return Err(anyhow::anyhow!(
                    "backend {} weight must be greater than 0",
                    backend.name
                ));
            }
        }

        if pool.health_checker.interval == 0 {
            return Err(anyhow::anyhow!(
                "health checker interval must be greater than 0"
            ));
        }
        if pool.health_checker.timeout == 0 {
            return Err(anyhow::anyhow!(
                "health checker timeout must be greater than 0"
            ));
        }
        if pool.health_checker.max_concurrent_checks == 0 {
            return Err(anyhow::anyhow!(
                "health checker max_concurrent_checks must be greater than 0"
            ));
        }

        if self.rate_limiter.limit == 0 {
            return Err(anyhow::anyhow!("rate limiter limit must be greater than 0"));
        }
        if self.rate_limiter.capacity == 0 {
            return Err(anyhow::anyhow!(
                "rate limiter capacity must be greater than 0"
            ));
        }
        if self.rate_limiter.refill_rate == 0 {
            return Err(anyhow::anyhow!(
                "rate limiter refill_rate must be greater than 0"
            ));
        }

        if !self.cache.disabled {
            if self.cache.default_ttl == 0 {
                return Err(anyhow::anyhow!("cache default_ttl must be greater than 0"));
            }
            if self.cache.purge_interval == 0 {
                return Err(anyhow::anyhow!(
                    "cache purge_interval must be greater than 0"
                ));
            }
        }

        Ok(())
    }
}
