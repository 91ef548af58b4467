//! Pushbridge - UnifiedPush gateway daemon.
//!
//! Accepts UnifiedPush dispatch requests, rewrites them into one or more
//! backend-correct outbound requests (FCM legacy and v1, WebPush-over-FCM
//! with VAPID, Matrix push, Gotify, generic/aesgcm WebPush endpoints),
//! delivers them safely to untrusted destinations, and translates the
//! backend's answer back into a UnifiedPush-correct response.
//!
//! # Architecture
//!
//! - **server** - accept loop and routing; one task per connection
//! - **translator** - per-backend request/response rewriting, in two
//!   shapes (fan-out gateways, single-backend proxies)
//! - **dispatch** - executes translated requests and classifies outcomes
//! - **cache** - endpoint trust probing and the delivery-health circuit
//!   breaker
//! - **client** - restricted/normal outbound clients and the SSRF policy
//! - **vapid** - key handling and the periodically refreshed bearer token
//! - **config** - TOML + environment configuration with reload snapshots

// Rust guideline compliant 2026-02

pub mod cache;
pub mod client;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod google_auth;
pub mod server;
pub mod translator;
pub mod vapid;

// Re-export the types a deployment wires together.
pub use cache::{HealthCache, HealthStatus, TrustCache};
pub use client::ClientPool;
pub use config::{Config, ConfigHandle};
pub use dispatch::Dispatcher;
pub use error::ProxyError;
pub use server::AppState;
pub use translator::{Registry, Translator};
