//! Status-carrying error type shared by translators and the dispatcher.
//!
//! A [`ProxyError`] pairs the UnifiedPush-correct status code the caller
//! should see with the internal cause. The cause is only ever logged (at
//! debug level unless the operator enabled verbose logging); it must never
//! leak into a response body.

// Rust guideline compliant 2026-02

use std::fmt;

use reqwest::StatusCode;

/// Error carrying the HTTP status the inbound caller should receive.
#[derive(Debug)]
pub struct ProxyError {
    code: StatusCode,
    source: anyhow::Error,
}

impl ProxyError {
    /// Wraps an existing error under a client-facing status code.
    pub fn new(code: StatusCode, source: anyhow::Error) -> Self {
        Self { code, source }
    }

    /// Builds an error from a plain message.
    pub fn msg(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            source: anyhow::anyhow!(message.into()),
        }
    }

    /// The status code to surface to the inbound caller.
    #[must_use]
    pub fn code(&self) -> StatusCode {
        self.code
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatch failed with {}: {}", self.code, self.source)
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_and_message_survive() {
        let err = ProxyError::msg(StatusCode::BAD_REQUEST, "missing token");
        assert_eq!(err.code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("missing token"));
        assert!(err.to_string().contains("400"));
    }
}
