//! WebPush-over-FCM proxy (`/wpfcm`).
//!
//! Endpoints handed out by FCM's WebPush bridge look like
//! `https://<gateway>/wpfcm?t=<registration token>`. The body is already
//! RFC 8291 ciphertext and passes through untouched; the proxy's job is the
//! envelope: forward or default the `TTL`, `Urgency` and `Content-Encoding`
//! headers, and attach the current VAPID credential.

// Rust guideline compliant 2026-02

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_ENCODING};
use reqwest::StatusCode;

use super::{DispatchStatus, Inbound, OutboundRequest, OutboundResult, Proxy};
use crate::config::WebPushFcmConfig;
use crate::error::ProxyError;
use crate::vapid::{TokenMinter, VapidKey};

const SEND_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// Audience claimed in the VAPID token; the origin of the push resource.
const AUDIENCE: &str = "https://fcm.googleapis.com";

#[derive(Debug)]
pub struct WebPushFcmProxy {
    minter: Arc<TokenMinter>,
    endpoint_base: String,
}

impl WebPushFcmProxy {
    /// Reads the VAPID private key and mints the initial token.
    pub fn load(config: &WebPushFcmConfig) -> Result<Self> {
        let pem = fs::read_to_string(&config.credentials_path)
            .with_context(|| format!("unable to read {}", config.credentials_path))?;
        let key = VapidKey::decode_private(&pem)
            .with_context(|| format!("unable to decode {}", config.credentials_path))?;
        let minter = Arc::new(TokenMinter::new(key, AUDIENCE)?);
        Ok(Self {
            minter,
            endpoint_base: SEND_ENDPOINT.to_string(),
        })
    }

    /// Builds a proxy around an existing minter (tests).
    #[must_use]
    pub fn with_minter(minter: Arc<TokenMinter>) -> Self {
        Self {
            minter,
            endpoint_base: SEND_ENDPOINT.to_string(),
        }
    }

    /// Points the proxy at a different send endpoint (tests).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_base = endpoint.into();
        self
    }

    /// The minter whose refresh loop the supervisor schedules.
    #[must_use]
    pub fn minter(&self) -> &Arc<TokenMinter> {
        &self.minter
    }
}

fn valid_token(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | ':'))
}

/// Forwards the inbound header when present and non-empty, else the
/// default.
fn forward_or(
    headers: &mut reqwest::header::HeaderMap,
    inbound: &Inbound,
    name: HeaderName,
    default: &'static str,
) {
    let value = inbound
        .headers
        .get(&name)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(default));
    headers.insert(name, value);
}

#[async_trait::async_trait]
impl Proxy for WebPushFcmProxy {
    fn path(&self) -> &str {
        "/wpfcm"
    }

    async fn translate(
        &self,
        body: &[u8],
        inbound: &Inbound,
    ) -> Result<Vec<OutboundRequest>, ProxyError> {
        let token = inbound.query_get("t").unwrap_or("");
        if token.is_empty() || !valid_token(token) {
            return Err(ProxyError::msg(
                StatusCode::INTERNAL_SERVER_ERROR,
                "registration token not valid",
            ));
        }

        let mut request =
            OutboundRequest::post(format!("{}/{token}", self.endpoint_base), body.to_vec())?;
        forward_or(
            &mut request.headers,
            inbound,
            HeaderName::from_static("ttl"),
            "86400",
        );
        forward_or(
            &mut request.headers,
            inbound,
            HeaderName::from_static("urgency"),
            "normal",
        );
        forward_or(&mut request.headers, inbound, CONTENT_ENCODING, "aes128gcm");
        let credential = self.minter.current();
        request.headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&credential).map_err(|e| {
                ProxyError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::new(e))
            })?,
        );
        Ok(vec![request])
    }

    fn verdict(&self, result: &OutboundResult) -> DispatchStatus {
        match result.status.as_u16() {
            400..=499 => DispatchStatus::with_note(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("push service rejected the request ({})", result.status),
            ),
            500..=599 => DispatchStatus::with_note(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            _ => DispatchStatus::new(result.status),
        }
    }
}
