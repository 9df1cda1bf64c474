//! Client address resolution behind trusted proxies.

use std::net::{IpAddr, SocketAddr};

use hyper::HeaderMap;

use crate::error::{RelayError, RelayResult};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// A trusted network in CIDR form
#[derive(Debug, Clone, Copy)]
struct TrustedNet {
    addr: IpAddr,
    prefix: u8,
}

impl TrustedNet {
    fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let net = u32::from(net);
                let ip = u32::from(ip);
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                (net & mask) == (ip & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let net = u128::from(net);
                let ip = u128::from(ip);
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                (net & mask) == (ip & mask)
            }
            _ => false,
        }
    }
}

/// Resolves the rate-limit key for a request, honoring `X-Forwarded-For`
/// only when the immediate peer is a trusted proxy.
pub struct ClientIpExtractor {
    trusted: Vec<TrustedNet>,
}

impl ClientIpExtractor {
    /// Parse the trusted proxy list. Entries are CIDRs or bare IPs; bare
    /// IPs are promoted to /32 or /128. Empty entries are ignored.
    pub fn new(trusted_proxies: &[String]) -> RelayResult<Self> {
        let mut trusted = Vec::new();
        for entry in trusted_proxies {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            if let Some((addr, prefix)) = entry.split_once('/') {
                let addr: IpAddr = addr.parse().map_err(|_| {
                    RelayError::config(format!("invalid trusted proxy: {}", entry))
                })?;
                let prefix: u8 = prefix.parse().map_err(|_| {
                    RelayError::config(format!("invalid trusted proxy: {}", entry))
                })?;
                let max = if addr.is_ipv4() { 32 } else { 128 };
                if prefix > max {
                    return Err(RelayError::config(format!(
                        "invalid trusted proxy prefix: {}",
                        entry
                    )));
                }
                trusted.push(TrustedNet { addr, prefix });
            } else {
                let addr: IpAddr = entry.parse().map_err(|_| {
                    RelayError::config(format!("invalid trusted proxy: {}", entry))
                })?;
                let prefix = if addr.is_ipv4() { 32 } else { 128 };
                trusted.push(TrustedNet { addr, prefix });
            }
        }
        Ok(Self { trusted })
    }

    /// Resolve the client address for a request.
    ///
    /// The `X-Forwarded-For` list is walked right to left and the first
    /// address outside every trusted network wins; when every hop is
    /// trusted the leftmost is returned. Unparseable entries are skipped.
    pub fn extract(&self, peer: SocketAddr, headers: &HeaderMap) -> IpAddr {
        let peer_ip = peer.ip();

        if self.trusted.is_empty() || !self.is_trusted(peer_ip) {
            return peer_ip;
        }

        if let Some(forwarded) = headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            let hops: Vec<IpAddr> = forwarded
                .split(',')
                .filter_map(|hop| hop.trim().parse().ok())
                .collect();

            for ip in hops.iter().rev() {
                if !self.is_trusted(*ip) {
                    return *ip;
                }
            }

            if let Some(first) = hops.first() {
                return *first;
            }
        }

        peer_ip
    }

    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.trusted.iter().any(|net| net.contains(ip))
    }
}
