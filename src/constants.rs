//! Application-wide constants for pushbridge.
//!
//! This module centralizes magic numbers so every size bound, timeout and
//! cache lifetime is documented in one place. Constants are grouped by
//! domain.

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Payload bounds
// ============================================================================

/// Maximum UnifiedPush message size in bytes.
///
/// Fixed by the UnifiedPush specification; deliberately not operator
/// configurable. Proxy dispatch reads exactly one byte more so an oversized
/// request can be told apart from one that is exactly at the limit.
pub const MAX_UP_SIZE: usize = 4096;

/// Upper bound for a gateway request body read.
///
/// Gateway bodies wrap the push payload in backend JSON (Matrix notification
/// envelope and friends), so they are allowed a small multiple of
/// [`MAX_UP_SIZE`]. Should be enough for any gateway.
pub const GATEWAY_READ_LIMIT: usize = 20_000;

/// How much of a backend response body is read before the connection is
/// released. Backend status bodies (FCM result JSON, relayed draft-4
/// responses) are small; anything longer is truncated.
pub const RESPONSE_READ_LIMIT: usize = 5000;

/// How much of a trust-probe response body is read. A discovery document is
/// a few dozen bytes; 1000 ought to be enough.
pub const TRUST_PROBE_READ_LIMIT: usize = 1000;

// ============================================================================
// Timeouts
// ============================================================================

/// Outbound timeout for gateway deliveries (subscriber-chosen endpoints,
/// possibly slow home servers).
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound timeout for proxy deliveries. The fixed backends (FCM, Gotify)
/// answer fast or not at all.
pub const PROXY_TIMEOUT: Duration = Duration::from_secs(2);

/// Drain window granted to in-flight connections on shutdown.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

// ============================================================================
// Cache lifetimes
// ============================================================================

/// How long a confirmed "this is a real UnifiedPush receiver" verdict is
/// trusted before re-probing.
pub const TRUST_TTL_CONFIRMED: Duration = Duration::from_secs(10 * 60);

/// How long an unconfirmed verdict is kept. Shorter than
/// [`TRUST_TTL_CONFIRMED`] so a misconfigured but legitimate endpoint
/// recovers quickly.
pub const TRUST_TTL_REJECTED: Duration = Duration::from_secs(60);

/// Default health-cache entry lifetime (temporarily unavailable hosts).
pub const HEALTH_TTL: Duration = Duration::from_secs(60);

/// Health-cache lifetime for refused hosts. Dead or hostile endpoints stay
/// short-circuited for longer.
pub const HEALTH_TTL_REFUSED: Duration = Duration::from_secs(10 * 60);

// ============================================================================
// VAPID
// ============================================================================

/// Lifetime embedded in a freshly minted VAPID token.
pub const VAPID_TOKEN_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

/// Interval between VAPID token regenerations. Well inside
/// [`VAPID_TOKEN_LIFETIME`] so in-flight requests never hold an expired
/// token.
pub const VAPID_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

// ============================================================================
// FCM
// ============================================================================

/// Base64-encoded payload length above which an FCM data message is split
/// into two parts (FCM caps the whole message at 4 KiB).
pub const FCM_SPLIT_THRESHOLD: usize = 3800;

/// Where the base64 text is cut when splitting.
pub const FCM_SPLIT_POINT: usize = 3000;
