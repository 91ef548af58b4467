//! Matrix push gateway (`/_matrix/push/v1/notify`).
//!
//! A Matrix homeserver POSTs one notification carrying a `devices` array;
//! each device names the UnifiedPush endpoint it registered as its pushkey.
//! The gateway strips the `devices` key (it leaks sibling endpoints) and
//! forwards the remaining notification to every pushkey. The response lists
//! the pushkeys whose endpoint rejected the delivery so the homeserver can
//! unregister them.

// Rust guideline compliant 2026-02

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;

use super::{Discovery, Gateway, Inbound, OutboundRequest, OutboundResult, Rendered};
use crate::error::ProxyError;

#[derive(Debug)]
pub struct MatrixGateway {
    discovery: Vec<u8>,
}

impl Default for MatrixGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: Discovery::payload(1, "matrix"),
        }
    }
}

impl Gateway for MatrixGateway {
    fn path(&self) -> &str {
        "/_matrix/push/v1/notify"
    }

    fn discovery(&self) -> &[u8] {
        &self.discovery
    }

    fn translate(
        &self,
        body: &[u8],
        _inbound: &Inbound,
    ) -> Result<Vec<OutboundRequest>, ProxyError> {
        let mut doc: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
            ProxyError::new(
                StatusCode::BAD_REQUEST,
                anyhow::anyhow!("notification is not valid JSON: {e}"),
            )
        })?;

        let notification = doc
            .get_mut("notification")
            .and_then(serde_json::Value::as_object_mut)
            .ok_or_else(|| {
                ProxyError::msg(StatusCode::BAD_REQUEST, "body carries no notification")
            })?;

        let devices = notification.remove("devices").unwrap_or_default();
        let pushkeys: Vec<String> = devices
            .as_array()
            .map(|devices| {
                devices
                    .iter()
                    .filter_map(|d| d.get("pushkey").and_then(serde_json::Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if pushkeys.is_empty() {
            return Err(ProxyError::msg(
                StatusCode::BAD_REQUEST,
                "notification carries no device pushkeys",
            ));
        }

        let forwarded = serde_json::to_vec(&doc).map_err(|e| {
            ProxyError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::new(e))
        })?;

        pushkeys
            .into_iter()
            .map(|pushkey| {
                let mut request = OutboundRequest::post(pushkey, forwarded.clone())?;
                request
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Ok(request)
            })
            .collect()
    }

    fn render(&self, results: &[OutboundResult]) -> Rendered {
        // A pushkey is rejected when its endpoint answered (or was
        // synthesized as) 401..=404. Timeouts (429) are transient and must
        // not unregister the device.
        let rejected: Vec<&str> = results
            .iter()
            .filter(|r| r.status.as_u16() > 400 && r.status.as_u16() <= 404)
            .map(|r| r.target.as_str())
            .collect();

        #[derive(Serialize)]
        struct RejectedList<'a> {
            rejected: Vec<&'a str>,
        }

        let body = serde_json::to_vec(&RejectedList { rejected })
            .expect("rejected list serialization cannot fail");
        let mut rendered = Rendered::status(StatusCode::OK);
        rendered
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        rendered.body = body;
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn inbound() -> Inbound {
        Inbound::new(
            Method::POST,
            "/_matrix/push/v1/notify",
            reqwest::header::HeaderMap::new(),
            "gateway.example.com".to_string(),
        )
    }

    #[test]
    fn test_fans_out_per_device_and_strips_devices_key() {
        let gateway = MatrixGateway::new();
        let body = br#"{"notification":{"devices":[{"pushkey":"https://a"},{"pushkey":"https://b"}],"counts":{"unread":1}}}"#;

        let requests = gateway.translate(body, &inbound()).expect("translate");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].target, "https://a");
        assert_eq!(requests[1].target, "https://b");
        for request in &requests {
            assert_eq!(
                request.body, br#"{"notification":{"counts":{"unread":1}}}"#,
                "devices key must be stripped from the forwarded body"
            );
            assert_eq!(
                request.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
                Some("application/json")
            );
        }
    }

    #[test]
    fn test_rejects_body_without_devices() {
        let gateway = MatrixGateway::new();
        for body in [
            &br#"{"notification":{"counts":{"unread":1}}}"#[..],
            &br#"{"notification":{"devices":[]}}"#[..],
            &br#"{}"#[..],
            &b"not json"[..],
        ] {
            let err = gateway.translate(body, &inbound()).unwrap_err();
            assert_eq!(err.code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_render_collects_rejected_pushkeys_in_order() {
        let gateway = MatrixGateway::new();
        let results = vec![
            OutboundResult {
                target: "https://a".to_string(),
                status: StatusCode::OK,
                headers: reqwest::header::HeaderMap::new(),
                body: Vec::new(),
                synthesized: false,
            },
            OutboundResult::synthesized("https://b".to_string(), StatusCode::NOT_FOUND),
            OutboundResult::synthesized("https://c".to_string(), StatusCode::FORBIDDEN),
            OutboundResult::synthesized("https://d".to_string(), StatusCode::TOO_MANY_REQUESTS),
        ];

        let rendered = gateway.render(&results);
        assert_eq!(rendered.status, StatusCode::OK);
        assert_eq!(
            rendered.body,
            br#"{"rejected":["https://b","https://c"]}"#.to_vec(),
            "404 and 403 reject; 200 and 429 do not"
        );
    }

    #[test]
    fn test_render_empty_rejected_list() {
        let gateway = MatrixGateway::new();
        let rendered = gateway.render(&[]);
        assert_eq!(rendered.body, br#"{"rejected":[]}"#.to_vec());
    }
}
