//! Gotify proxy (`/UP`): wraps a raw push body into a Gotify message.
//!
//! The caller's query string (carrying the Gotify app token) is forwarded
//! untouched; only scheme, host and path are rewritten.

// Rust guideline compliant 2026-01

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;

use super::{DispatchStatus, Inbound, OutboundRequest, OutboundResult, Proxy};
use crate::config::GotifyConfig;
use crate::error::ProxyError;

#[derive(Debug)]
pub struct GotifyProxy {
    address: String,
    scheme: String,
}

impl GotifyProxy {
    #[must_use]
    pub fn new(config: &GotifyConfig) -> Self {
        Self {
            address: config.address.clone(),
            scheme: config.scheme.clone(),
        }
    }
}

#[derive(Serialize)]
struct GotifyMessage<'a> {
    message: &'a str,
}

#[async_trait::async_trait]
impl Proxy for GotifyProxy {
    fn path(&self) -> &str {
        "/UP"
    }

    async fn translate(
        &self,
        body: &[u8],
        inbound: &Inbound,
    ) -> Result<Vec<OutboundRequest>, ProxyError> {
        let mut target = format!("{}://{}/message", self.scheme, self.address);
        if !inbound.raw_query.is_empty() {
            target.push('?');
            target.push_str(&inbound.raw_query);
        }

        let message = String::from_utf8_lossy(body);
        let payload = serde_json::to_vec(&GotifyMessage { message: &message }).map_err(|e| {
            ProxyError::new(StatusCode::BAD_GATEWAY, anyhow::Error::new(e))
        })?;

        let mut request = OutboundRequest::post(target, payload)?;
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(vec![request])
    }

    fn verdict(&self, result: &OutboundResult) -> DispatchStatus {
        match result.status.as_u16() {
            200 => DispatchStatus::new(StatusCode::ACCEPTED),
            // Bad or revoked app token: the subscription is gone.
            401 | 403 => DispatchStatus::with_note(StatusCode::NOT_FOUND, "gotify refused token"),
            400 => DispatchStatus::with_note(StatusCode::BAD_GATEWAY, "gotify rejected message"),
            other => DispatchStatus::with_note(
                StatusCode::BAD_GATEWAY,
                format!("unexpected gotify status {other}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::Method;

    fn proxy() -> GotifyProxy {
        GotifyProxy::new(&GotifyConfig {
            enable: true,
            address: "gotify.example.com".to_string(),
            scheme: "https".to_string(),
        })
    }

    #[tokio::test]
    async fn test_wraps_body_and_forwards_query() {
        let inbound = Inbound::new(
            Method::POST,
            "/UP?token=app-token",
            HeaderMap::new(),
            "gateway.example.com".to_string(),
        );
        let requests = proxy()
            .translate(b"hello push", &inbound)
            .await
            .expect("translate");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].target,
            "https://gotify.example.com/message?token=app-token"
        );
        assert_eq!(requests[0].body, br#"{"message":"hello push"}"#);
    }

    #[test]
    fn test_verdict_mapping() {
        let proxy = proxy();
        let result = |status: StatusCode| OutboundResult {
            target: "https://gotify.example.com/message".to_string(),
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
            synthesized: false,
        };
        assert_eq!(proxy.verdict(&result(StatusCode::OK)).status, StatusCode::ACCEPTED);
        assert_eq!(
            proxy.verdict(&result(StatusCode::UNAUTHORIZED)).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            proxy.verdict(&result(StatusCode::FORBIDDEN)).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            proxy.verdict(&result(StatusCode::BAD_REQUEST)).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            proxy.verdict(&result(StatusCode::INTERNAL_SERVER_ERROR)).status,
            StatusCode::BAD_GATEWAY
        );
    }
}
