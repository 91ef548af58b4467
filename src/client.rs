//! Outbound HTTP clients and the SSRF policy that picks between them.
//!
//! Two clients exist for the life of the process:
//!
//! - the **restricted** client refuses to connect to any address outside
//!   operator-approved public ranges. Filtering happens inside the DNS
//!   resolver, so a hostile name that resolves to a loopback or RFC 1918
//!   address never produces a connection attempt. Literal-IP destinations
//!   skip DNS entirely and are vetted in [`ClientPool::select`] instead.
//! - the **normal** client carries no IP restriction and is used only for
//!   hosts the operator explicitly allow-listed (e.g. a self-hosted push
//!   server on a private range).
//!
//! Neither client follows redirects. That is load-bearing: a malicious
//! endpoint answering with a redirect to an internal address must never be
//! followed.

// Rust guideline compliant 2026-02

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::{redirect, Client, Url};

use crate::constants::{GATEWAY_TIMEOUT, PROXY_TIMEOUT};

/// A CIDR range, `a.b.c.d/len` or `hhhh::/len`. A bare address is treated
/// as a single-host range.
#[derive(Debug, Clone, Copy)]
pub struct IpRange {
    base: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, len)) => {
                let prefix: u8 = len
                    .parse()
                    .map_err(|_| anyhow!("invalid prefix length in {s:?}"))?;
                (addr, Some(prefix))
            }
            None => (s, None),
        };
        let base: IpAddr = addr
            .parse()
            .map_err(|_| anyhow!("invalid IP address in {s:?}"))?;
        let max = match base {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = prefix.unwrap_or(max);
        if prefix > max {
            return Err(anyhow!("prefix length {prefix} out of range in {s:?}"));
        }
        Ok(Self { base, prefix })
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.base, ip) {
            (IpAddr::V4(base), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix)
                };
                u32::from(base) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(base), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix)
                };
                u128::from(base) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Destination-address policy of the restricted client.
#[derive(Debug, Default)]
pub struct IpPolicy {
    permitted: Vec<IpRange>,
}

impl IpPolicy {
    /// Parses the operator's extra permitted ranges. Fails startup on any
    /// unparsable entry.
    pub fn parse_ranges(ranges: &[String]) -> Result<Self> {
        let permitted = ranges
            .iter()
            .map(|r| IpRange::parse(r).with_context(|| format!("permitted IP range {r:?}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { permitted })
    }

    /// Whether the restricted client may connect to `ip`: globally
    /// routable addresses, plus anything the operator explicitly
    /// permitted.
    #[must_use]
    pub fn permits(&self, ip: IpAddr) -> bool {
        if self.permitted.iter().any(|r| r.contains(ip)) {
            return true;
        }
        is_global(ip)
    }
}

fn is_global(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_multicast()
                || v4.is_documentation()
                // "this network" 0.0.0.0/8
                || octets[0] == 0
                // carrier-grade NAT 100.64.0.0/10
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
                // benchmarking 198.18.0.0/15
                || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
                // reserved 240.0.0.0/4
                || octets[0] >= 240)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_global(IpAddr::V4(mapped));
            }
            let segments = v6.segments();
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                // unique local fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // link local fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
                // documentation 2001:db8::/32
                || (segments[0] == 0x2001 && segments[1] == 0x0db8))
        }
    }
}

/// DNS resolver that drops every address the policy forbids. Resolution
/// failing outright and resolution yielding only forbidden addresses look
/// the same to the caller: the request errors before a socket is opened.
#[derive(Debug, Clone)]
struct RestrictedDns {
    policy: Arc<IpPolicy>,
}

impl Resolve for RestrictedDns {
    fn resolve(&self, name: Name) -> Resolving {
        let policy = Arc::clone(&self.policy);
        Box::pin(async move {
            let host = name.as_str().to_string();
            let addrs = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            let permitted: Vec<SocketAddr> = addrs.filter(|a| policy.permits(a.ip())).collect();
            if permitted.is_empty() {
                return Err(format!("{host} resolves to no permitted address").into());
            }
            Ok(Box::new(permitted.into_iter()) as Addrs)
        })
    }
}

/// The two outbound clients plus the selection rule. Holds no mutable
/// state; safe to share across every in-flight dispatch.
#[derive(Debug)]
pub struct ClientPool {
    restricted: Client,
    normal: Client,
    policy: Arc<IpPolicy>,
    proxy_timeout: Duration,
}

impl ClientPool {
    pub fn new(allowed_ips: &[String]) -> Result<Self> {
        Self::with_timeouts(allowed_ips, GATEWAY_TIMEOUT, PROXY_TIMEOUT)
    }

    /// Custom timeouts, for tests that cannot wait out the real ones.
    pub fn with_timeouts(
        allowed_ips: &[String],
        gateway_timeout: Duration,
        proxy_timeout: Duration,
    ) -> Result<Self> {
        let policy = Arc::new(IpPolicy::parse_ranges(allowed_ips)?);
        let restricted = Client::builder()
            .timeout(gateway_timeout)
            .redirect(redirect::Policy::none())
            .dns_resolver(Arc::new(RestrictedDns {
                policy: Arc::clone(&policy),
            }))
            .build()
            .context("unable to build restricted client")?;
        let normal = Client::builder()
            .timeout(gateway_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .context("unable to build normal client")?;
        Ok(Self {
            restricted,
            normal,
            policy,
            proxy_timeout,
        })
    }

    /// Chooses the client for a destination. Pure function of the target
    /// host and the allow-list verdict the caller already made.
    ///
    /// Returns `None` for a literal-IP destination outside the permitted
    /// ranges - those never reach the resolver, so they are vetted here.
    #[must_use]
    pub fn select(&self, target: &Url, host_allowed: bool) -> Option<&Client> {
        if host_allowed {
            return Some(&self.normal);
        }
        match target.host() {
            Some(url::Host::Ipv4(ip)) if !self.policy.permits(IpAddr::V4(ip)) => None,
            Some(url::Host::Ipv6(ip)) if !self.policy.permits(IpAddr::V6(ip)) => None,
            _ => Some(&self.restricted),
        }
    }

    /// Client used for trust probes: same restrictions as gateway
    /// deliveries.
    #[must_use]
    pub fn restricted(&self) -> &Client {
        &self.restricted
    }

    /// Client used for proxy deliveries to operator-fixed backends.
    #[must_use]
    pub fn normal(&self) -> &Client {
        &self.normal
    }

    /// Per-request timeout applied to proxy deliveries.
    #[must_use]
    pub fn proxy_timeout(&self) -> Duration {
        self.proxy_timeout
    }
}

/// Reads at most `cap` bytes of a response body, then drops the rest.
pub(crate) async fn read_limited(mut response: reqwest::Response, cap: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        let room = cap - out.len();
        if chunk.len() >= room {
            out.extend_from_slice(&chunk[..room]);
            break;
        }
        out.extend_from_slice(&chunk);
    }
    out
}
