//! Endpoint health cache - the circuit breaker in front of outbound
//! deliveries.
//!
//! Every classified delivery outcome is written back here so the next
//! dispatch to a recently failing endpoint short-circuits without a new
//! network attempt. Entries can be keyed by host (`scheme://host`) or by
//! full URL; lookups consult the host key first.

// Rust guideline compliant 2026-01

use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::Url;

use crate::constants::{HEALTH_TTL, HEALTH_TTL_REFUSED};

/// Cached delivery verdict for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// No verdict on file. Never stored, only returned.
    NotCached,
    /// The endpoint timed out or reported overload; synthesize 429.
    TemporaryUnavailable,
    /// The endpoint does not exist or refused the delivery; synthesize 404.
    Refused,
}

#[derive(Debug)]
pub struct HealthCache {
    entries: DashMap<String, (HealthStatus, Instant)>,
    default_ttl: Duration,
    refused_ttl: Duration,
}

impl Default for HealthCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttls(HEALTH_TTL, HEALTH_TTL_REFUSED)
    }

    /// Custom lifetimes, for tests that need fast expiry.
    #[must_use]
    pub fn with_ttls(default_ttl: Duration, refused_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            refused_ttl,
        }
    }

    /// Verdict for a destination: host-keyed entry first, then the full
    /// URL, else [`HealthStatus::NotCached`].
    #[must_use]
    pub fn status_for(&self, url: &Url) -> HealthStatus {
        if let Some(status) = self.lookup(&host_key(url)) {
            return status;
        }
        if let Some(status) = self.lookup(url.as_str()) {
            return status;
        }
        HealthStatus::NotCached
    }

    /// Records a verdict for the destination's host (`scheme://host`).
    pub fn set_host(&self, url: &Url, status: HealthStatus) {
        self.set(host_key(url), status);
    }

    /// Records a verdict for the exact destination URL.
    pub fn set_url(&self, url: &Url, status: HealthStatus) {
        self.set(url.as_str().to_string(), status);
    }

    fn set(&self, key: String, status: HealthStatus) {
        match status {
            // NotCached is the absence of an entry.
            HealthStatus::NotCached => {
                self.entries.remove(&key);
            }
            HealthStatus::TemporaryUnavailable => {
                self.entries
                    .insert(key, (status, Instant::now() + self.default_ttl));
            }
            HealthStatus::Refused => {
                self.entries
                    .insert(key, (status, Instant::now() + self.refused_ttl));
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<HealthStatus> {
        let (status, expires_at) = self.entries.get(key).map(|e| *e)?;
        if expires_at > Instant::now() {
            Some(status)
        } else {
            self.entries.remove(key);
            None
        }
    }
}

/// `scheme://host[:port]` cache key for a destination.
pub(crate) fn host_key(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}://{}:{port}", url.scheme(), url.host_str().unwrap_or("")),
        None => format!("{}://{}", url.scheme(), url.host_str().unwrap_or("")),
    }
}
