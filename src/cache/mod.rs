//! Endpoint trust and health caches.
//!
//! Both caches are plain in-memory maps with per-entry expiry, constructed
//! by the supervisor and handed to the dispatcher - tests inject fresh
//! instances instead of sharing process globals. Nothing is persisted;
//! restarting the gateway forgets every verdict.

// Rust guideline compliant 2026-01

pub mod health;
pub mod trust;

pub use health::{HealthCache, HealthStatus};
pub use trust::TrustCache;
