//! Endpoint trust cache - "is this really a UnifiedPush receiver?"
//!
//! Gateway dispatch accepts arbitrary caller-supplied destinations. Before
//! the first delivery to a URL we probe it with a bounded GET and require a
//! discovery document announcing UnifiedPush version 1. The verdict is
//! cached: confirmed receivers for ten minutes, everything else for one
//! minute so a misconfigured but legitimate endpoint recovers quickly.
//!
//! Concurrent first-probes of the same URL are tolerated as redundant work;
//! whichever finishes last wins the cache slot.

// Rust guideline compliant 2026-01

use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::{Client, StatusCode, Url};

use crate::client::read_limited;
use crate::constants::{TRUST_PROBE_READ_LIMIT, TRUST_TTL_CONFIRMED, TRUST_TTL_REJECTED};
use crate::translator::Discovery;

#[derive(Debug, Clone, Copy)]
struct Entry {
    confirmed: bool,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TrustCache {
    entries: DashMap<String, Entry>,
    confirmed_ttl: Duration,
    rejected_ttl: Duration,
}

impl Default for TrustCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttls(TRUST_TTL_CONFIRMED, TRUST_TTL_REJECTED)
    }

    /// Custom lifetimes, for tests that need fast expiry.
    #[must_use]
    pub fn with_ttls(confirmed_ttl: Duration, rejected_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            confirmed_ttl,
            rejected_ttl,
        }
    }

    /// Whether `url` is a confirmed UnifiedPush receiver, probing it if no
    /// fresh verdict is cached. `client` must already suppress redirects.
    pub async fn check(&self, url: &Url, client: &Client) -> bool {
        let key = url.as_str();
        if let Some(entry) = self.entries.get(key).map(|e| *e) {
            if entry.expires_at > Instant::now() {
                return entry.confirmed;
            }
        }

        let confirmed = probe(client, url).await;
        let ttl = if confirmed {
            self.confirmed_ttl
        } else {
            self.rejected_ttl
        };
        self.entries.insert(
            key.to_string(),
            Entry {
                confirmed,
                expires_at: Instant::now() + ttl,
            },
        );
        confirmed
    }
}

/// One active discovery probe: HTTP 200 plus a JSON body whose
/// `unifiedpush.version` equals 1. Transport errors, other statuses,
/// oversized reads and schema mismatches all count as "not a receiver".
async fn probe(client: &Client, url: &Url) -> bool {
    let response = match client.get(url.clone()).send().await {
        Ok(r) => r,
        Err(e) => {
            log::debug!("[Trust] probe of {url} failed: {e}");
            return false;
        }
    };
    if response.status() != StatusCode::OK {
        log::debug!("[Trust] probe of {url}: status {}", response.status());
        return false;
    }
    let body = read_limited(response, TRUST_PROBE_READ_LIMIT).await;
    match serde_json::from_slice::<Discovery>(&body) {
        Ok(doc) => doc.unifiedpush.version == 1,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Probe behavior (call counting, confirmation rules) is covered by the
    // integration tests against a mock server; here only the entry
    // lifecycle is exercised.

    fn seed(cache: &TrustCache, url: &str, confirmed: bool, ttl: Duration) {
        cache.entries.insert(
            url.to_string(),
            Entry {
                confirmed,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_probe() {
        let cache = TrustCache::new();
        let url = Url::parse("https://push.example.invalid/up").expect("url");
        seed(&cache, url.as_str(), true, Duration::from_secs(60));

        // The host does not resolve; reaching the network would fail and
        // return false.
        let client = Client::new();
        assert!(cache.check(&url, &client).await);
    }

    #[tokio::test]
    async fn test_expired_entry_reprobes() {
        let cache = TrustCache::new();
        let url = Url::parse("https://push.example.invalid/up").expect("url");
        seed(&cache, url.as_str(), true, Duration::from_millis(0));

        let client = Client::new();
        // Entry expired; the re-probe hits an unresolvable host and the
        // verdict flips to unconfirmed.
        assert!(!cache.check(&url, &client).await);
    }
}
