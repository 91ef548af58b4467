//! Configuration loading, validation and hot-reload snapshots.
//!
//! Configuration comes from a TOML file merged with `UP_*` environment
//! overrides. After parsing, [`Config::defaults`] validates every enabled
//! backend section and derives the handful of fields that are computed
//! rather than configured (user agent string, normalized mount paths).
//!
//! Handlers never touch a mutable global. They take an [`Arc`] snapshot from
//! the [`ConfigHandle`] at the start of a request; a reload builds a brand
//! new `Config` and swaps the snapshot under the write lock, so in-flight
//! requests keep the configuration they started with.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Crate version, embedded in the outbound User-Agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level configuration. One immutable snapshot per reload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub listen_addr: String,
    /// Log every request and include error causes in the log.
    pub verbose: bool,
    /// Operator-chosen suffix appended to the User-Agent, e.g. a hostname.
    pub user_agent_id: String,

    pub gateway: GatewaySection,
    pub rewrite: RewriteSection,

    /// Derived: full User-Agent string. Set by [`Config::defaults`].
    #[serde(skip)]
    user_agent: String,
    /// Derived: maximum UnifiedPush payload size. Always
    /// [`crate::constants::MAX_UP_SIZE`]; kept here so the limit travels
    /// with the snapshot.
    #[serde(skip)]
    pub max_up_size: usize,
}

/// Settings shared by gateway-shaped translators.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Hosts (`host` or `host:port`) that skip the trust probe and are
    /// dispatched through the unrestricted client.
    pub allowed_hosts: Vec<String>,
    /// Extra CIDR ranges the restricted client may connect to, e.g. a
    /// private range hosting a self-hosted push server.
    pub allowed_ips: Vec<String>,
    pub matrix: MatrixConfig,
    pub generic: GenericConfig,
    pub aesgcm: AesgcmConfig,
    pub transparent_draft4: TransparentConfig,
}

/// Settings for proxy-shaped translators.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RewriteSection {
    pub fcm: FcmConfig,
    pub fcm_v1: FcmV1Config,
    pub webpush_fcm: WebPushFcmConfig,
    pub gotify: GotifyConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenericConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AesgcmConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransparentConfig {
    pub enable: bool,
    /// `host` or `host:port` of the draft-4 push server requests are
    /// rewritten to.
    pub address: String,
    pub scheme: String,
    /// Mount path. Normalized to end in `/` so it registers as a subtree.
    pub bind_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FcmConfig {
    pub enable: bool,
    /// Legacy Firebase server key.
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FcmV1Config {
    pub enable: bool,
    /// Default service-account JSON path.
    pub credentials_path: String,
    /// Per-inbound-host service-account JSON paths, for operators serving
    /// several apps from one gateway.
    pub credentials_paths: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebPushFcmConfig {
    pub enable: bool,
    /// Path of the PEM-encoded VAPID private key.
    pub credentials_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GotifyConfig {
    pub enable: bool,
    pub address: String,
    pub scheme: String,
}

impl Config {
    /// Validates enabled sections and derives computed fields.
    ///
    /// Returns `true` when the configuration is unusable and startup (or a
    /// reload) must be aborted. Idempotent: running it again on an already
    /// valid configuration derives the same fields and succeeds.
    pub fn defaults(&mut self) -> bool {
        if self.listen_addr.is_empty() {
            self.listen_addr = "127.0.0.1:5000".to_string();
        }
        // Forced, ignoring anything a user may have tried to configure.
        self.max_up_size = crate::constants::MAX_UP_SIZE;

        self.user_agent = format!("Pushbridge/{}", VERSION);
        if !self.user_agent_id.is_empty() {
            self.user_agent = format!("{} ({})", self.user_agent, self.user_agent_id);
        }

        let mut failed = false;
        failed |= self.gateway.transparent_draft4.defaults();
        failed |= self.rewrite.fcm.defaults();
        failed |= self.rewrite.fcm_v1.defaults();
        failed |= self.rewrite.webpush_fcm.defaults();
        failed |= self.rewrite.gotify.defaults();
        failed
    }

    /// Full User-Agent attached to every outbound request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Whether `host` (in `host` or `host:port` form) is on the operator
    /// allow-list.
    #[must_use]
    pub fn is_allowed_host(&self, host: &str) -> bool {
        self.gateway.allowed_hosts.iter().any(|h| h == host)
    }

    /// Applies `UP_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        env_string("UP_LISTEN", &mut self.listen_addr);
        env_bool("UP_VERBOSE", &mut self.verbose);
        env_string("UP_UAID", &mut self.user_agent_id);
        env_list("UP_GATEWAY_ALLOWEDHOSTS", &mut self.gateway.allowed_hosts);
        env_list("UP_GATEWAY_ALLOWEDIPS", &mut self.gateway.allowed_ips);

        env_bool("UP_GATEWAY_MATRIX_ENABLE", &mut self.gateway.matrix.enable);
        env_bool("UP_GATEWAY_GENERIC_ENABLE", &mut self.gateway.generic.enable);
        env_bool("UP_GATEWAY_AESGCM_ENABLE", &mut self.gateway.aesgcm.enable);

        let td4 = &mut self.gateway.transparent_draft4;
        env_bool("UP_GATEWAY_TRANSPARENT_DRAFT4_ENABLE", &mut td4.enable);
        env_string("UP_GATEWAY_TRANSPARENT_DRAFT4_ADDRESS", &mut td4.address);
        env_string("UP_GATEWAY_TRANSPARENT_DRAFT4_SCHEME", &mut td4.scheme);
        env_string("UP_GATEWAY_TRANSPARENT_DRAFT4_PATH", &mut td4.bind_path);

        env_bool("UP_REWRITE_FCM_ENABLE", &mut self.rewrite.fcm.enable);
        env_string("UP_REWRITE_FCM_KEY", &mut self.rewrite.fcm.key);
        env_bool("UP_REWRITE_FCMV1_ENABLE", &mut self.rewrite.fcm_v1.enable);
        env_string(
            "UP_REWRITE_FCMV1_CREDENTIALS_PATH",
            &mut self.rewrite.fcm_v1.credentials_path,
        );
        env_bool(
            "UP_REWRITE_WEBPUSH_FCM_ENABLE",
            &mut self.rewrite.webpush_fcm.enable,
        );
        env_string(
            "UP_REWRITE_WEBPUSH_FCM_CREDENTIALS_PATH",
            &mut self.rewrite.webpush_fcm.credentials_path,
        );
        env_bool("UP_REWRITE_GOTIFY_ENABLE", &mut self.rewrite.gotify.enable);
        env_string("UP_REWRITE_GOTIFY_ADDRESS", &mut self.rewrite.gotify.address);
        env_string("UP_REWRITE_GOTIFY_SCHEME", &mut self.rewrite.gotify.scheme);
    }
}

impl TransparentConfig {
    fn defaults(&mut self) -> bool {
        if !self.enable {
            return false;
        }
        if self.bind_path.is_empty() {
            self.bind_path = "/".to_string();
        }
        if !self.bind_path.ends_with('/') {
            self.bind_path.push('/');
        }
        if self.address.is_empty() {
            log::error!("[Config] transparent_draft4 address cannot be empty");
            return true;
        }
        self.scheme = self.scheme.to_lowercase();
        if self.scheme != "http" && self.scheme != "https" {
            log::error!("[Config] transparent_draft4 scheme must be http or https");
            return true;
        }
        false
    }
}

impl FcmConfig {
    fn defaults(&mut self) -> bool {
        if self.enable && self.key.is_empty() {
            log::error!("[Config] fcm key cannot be empty");
            return true;
        }
        false
    }
}

impl FcmV1Config {
    fn defaults(&mut self) -> bool {
        if self.enable && self.credentials_path.is_empty() && self.credentials_paths.is_empty() {
            log::error!("[Config] fcm_v1 credentials path cannot be empty");
            return true;
        }
        false
    }
}

impl WebPushFcmConfig {
    fn defaults(&mut self) -> bool {
        if self.enable && self.credentials_path.is_empty() {
            log::error!("[Config] webpush_fcm credentials path cannot be empty");
            return true;
        }
        false
    }
}

impl GotifyConfig {
    fn defaults(&mut self) -> bool {
        if !self.enable {
            return false;
        }
        if self.address.is_empty() {
            log::error!("[Config] gotify address cannot be empty");
            return true;
        }
        self.scheme = self.scheme.to_lowercase();
        if self.scheme != "http" && self.scheme != "https" {
            // Scheme is recoverable: assume TLS and warn.
            log::warn!("[Config] gotify scheme missing or invalid, assuming https");
            self.scheme = "https".to_string();
        }
        false
    }
}

/// Reads, parses and validates the configuration file plus environment
/// overrides. Used at startup and for every reload.
pub fn load(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file {}", path.display()))?;
    let mut config: Config =
        toml::from_str(&raw).with_context(|| format!("error parsing {}", path.display()))?;
    config.apply_env_overrides();
    if config.defaults() {
        bail!("configuration validation failed");
    }
    Ok(config)
}

/// Shared holder for the active configuration snapshot.
///
/// Readers get an `Arc<Config>` that stays valid for however long they hold
/// it; [`ConfigHandle::replace`] swaps in a new snapshot without mutating the
/// old one.
#[derive(Debug)]
pub struct ConfigHandle {
    inner: RwLock<Arc<Config>>,
}

impl ConfigHandle {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Current snapshot. Cheap; takes the read lock only for the clone.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Installs a freshly loaded configuration.
    pub fn replace(&self, config: Config) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(config);
    }
}

fn env_string(name: &str, slot: &mut String) {
    if let Ok(value) = env::var(name) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

fn env_bool(name: &str, slot: &mut bool) {
    if let Ok(value) = env::var(name) {
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" => *slot = true,
            "0" | "false" | "no" => *slot = false,
            _ => {}
        }
    }
}

fn env_list(name: &str, slot: &mut Vec<String>) {
    if let Ok(value) = env::var(name) {
        if !value.is_empty() {
            *slot = value.split(',').map(|s| s.trim().to_string()).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config: Config = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:5000"
            user_agent_id = "unit-test"

            [gateway]
            allowed_hosts = ["push.example.com:443"]

            [gateway.matrix]
            enable = true

            [rewrite.gotify]
            enable = true
            address = "gotify.example.com"
            scheme = "HTTPS"
            "#,
        )
        .expect("parse");
        assert!(!config.defaults(), "config should validate");
        config
    }

    #[test]
    fn test_defaults_idempotent() {
        let mut config = valid_config();
        let ua = config.user_agent().to_string();
        let scheme = config.rewrite.gotify.scheme.clone();
        assert!(!config.defaults());
        assert_eq!(config.user_agent(), ua);
        assert_eq!(config.rewrite.gotify.scheme, scheme);
        assert_eq!(config.max_up_size, crate::constants::MAX_UP_SIZE);
    }

    #[test]
    fn test_user_agent_includes_operator_id() {
        let config = valid_config();
        assert!(config.user_agent().starts_with("Pushbridge/"));
        assert!(config.user_agent().ends_with("(unit-test)"));
    }

    #[test]
    fn test_gotify_scheme_coerced() {
        let config = valid_config();
        assert_eq!(config.rewrite.gotify.scheme, "https");
    }

    #[test]
    fn test_gotify_requires_address() {
        let mut config = Config::default();
        config.rewrite.gotify.enable = true;
        assert!(config.defaults(), "empty gotify address must fail");
    }

    #[test]
    fn test_transparent_path_normalized_once() {
        let mut config = Config::default();
        config.gateway.transparent_draft4.enable = true;
        config.gateway.transparent_draft4.address = "push.internal".to_string();
        config.gateway.transparent_draft4.scheme = "HTTP".to_string();
        config.gateway.transparent_draft4.bind_path = "/draft4".to_string();
        assert!(!config.defaults());
        assert_eq!(config.gateway.transparent_draft4.bind_path, "/draft4/");
        assert!(!config.defaults());
        assert_eq!(config.gateway.transparent_draft4.bind_path, "/draft4/");
        assert_eq!(config.gateway.transparent_draft4.scheme, "http");
    }

    #[test]
    fn test_allowed_host_lookup() {
        let config = valid_config();
        assert!(config.is_allowed_host("push.example.com:443"));
        assert!(!config.is_allowed_host("push.example.com"));
        assert!(!config.is_allowed_host("evil.example.com"));
    }

    #[test]
    fn test_snapshot_swap() {
        let handle = ConfigHandle::new(valid_config());
        let before = handle.snapshot();

        let mut next = valid_config();
        next.verbose = true;
        handle.replace(next);

        assert!(!before.verbose, "old snapshot must be unchanged");
        assert!(handle.snapshot().verbose);
    }

    #[test]
    fn test_fcm_requires_key() {
        let mut config = Config::default();
        config.rewrite.fcm.enable = true;
        assert!(config.defaults());
        config.rewrite.fcm.key = "server-key".to_string();
        assert!(!config.defaults());
    }
}
