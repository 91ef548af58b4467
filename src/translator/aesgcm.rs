//! Aesgcm gateway: like the generic gateway, but carries WebPush draft-4
//! ("aesgcm") encryption parameters into the body.
//!
//! Older WebPush senders put the ECDH public key and salt in `Crypto-Key`
//! and `Encryption` headers. UnifiedPush apps behind a plain endpoint never
//! see response headers, so the gateway folds them into a legacy header
//! block prepended to the ciphertext:
//!
//! ```text
//! aesgcm
//! Encryption: salt="..."
//! Crypto-Key: dh="..."
//! <ciphertext>
//! ```
//!
//! Bodies that are not aesgcm-encoded (aes128gcm carries its parameters in
//! the payload already) pass through unchanged.

// Rust guideline compliant 2026-01

use reqwest::StatusCode;

use super::generic::{destination, passthrough_status};
use super::{Discovery, Gateway, Inbound, OutboundRequest, OutboundResult, Rendered};
use crate::error::ProxyError;

/// Shortest plausible `Crypto-Key` value: a base64url P-256 point is 87
/// characters, but the header may arrive wrapped in `dh="..."`. Heuristic,
/// not precise.
const MIN_CRYPTO_KEY_LEN: usize = 65;

/// Shortest plausible `Encryption` value (16-byte salt, base64url).
const MIN_ENCRYPTION_LEN: usize = 16;

#[derive(Debug)]
pub struct AesgcmGateway {
    discovery: Vec<u8>,
}

impl Default for AesgcmGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl AesgcmGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: Discovery::payload(1, "aesgcm"),
        }
    }
}

impl Gateway for AesgcmGateway {
    fn path(&self) -> &str {
        "/aesgcm/"
    }

    fn discovery(&self) -> &[u8] {
        &self.discovery
    }

    fn requires_endpoint_trust(&self) -> bool {
        true
    }

    fn translate(
        &self,
        body: &[u8],
        inbound: &Inbound,
    ) -> Result<Vec<OutboundRequest>, ProxyError> {
        let endpoint = destination(inbound)?;

        let forwarded = if inbound.header("content-encoding") == "aesgcm" {
            let crypto_key = inbound.header("crypto-key");
            let encryption = inbound.header("encryption");
            if crypto_key.len() < MIN_CRYPTO_KEY_LEN || encryption.len() < MIN_ENCRYPTION_LEN {
                return Err(ProxyError::msg(
                    StatusCode::BAD_REQUEST,
                    "not real aesgcm: headers too short",
                ));
            }
            let mut rewritten =
                format!("aesgcm\nEncryption: {encryption}\nCrypto-Key: {crypto_key}\n")
                    .into_bytes();
            rewritten.extend_from_slice(body);
            rewritten
        } else {
            body.to_vec()
        };

        Ok(vec![OutboundRequest::post(endpoint, forwarded)?])
    }

    fn render(&self, results: &[OutboundResult]) -> Rendered {
        passthrough_status(results)
    }
}
