//! Legacy FCM proxy (`/FCM`) - server-key authenticated data messages.
//!
//! The push payload is wrapped into `{"to": <token>, "data": {...}}`.
//! Callers on the v2 scheme (`?v2`) get the body base64-encoded; FCM caps a
//! message at 4 KiB, so an encoded body over the threshold is split into
//! two messages sharing a random message id with part-sequence markers, and
//! the receiving app concatenates the `b` fields.
//!
//! The newer service-account variant lives in [`super::fcm_v1`]; this one
//! stays for operators still holding a legacy server key.

// Rust guideline compliant 2026-02

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{DispatchStatus, Inbound, OutboundRequest, OutboundResult, Proxy};
use crate::config::FcmConfig;
use crate::constants::{FCM_SPLIT_POINT, FCM_SPLIT_THRESHOLD};
use crate::error::ProxyError;

const FCM_LEGACY_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// FCM data-message payload map. `BTreeMap` keeps the serialized key order
/// stable.
pub(super) type DataMap = BTreeMap<&'static str, String>;

/// Builds the v2 data payloads for a push body, splitting when the encoded
/// form exceeds the FCM message cap. Both parts share one random non-zero
/// message id; `s` marks the part sequence.
pub(super) fn v2_payloads(body: &[u8], instance: &str) -> Vec<DataMap> {
    let encoded = BASE64.encode(body);
    if encoded.len() < FCM_SPLIT_THRESHOLD {
        return vec![DataMap::from([
            ("b", encoded),
            ("i", instance.to_string()),
        ])];
    }

    let message_id = ((rand::random::<u64>()) >> 1) + 1;
    let message_id = message_id.to_string();
    let (first, second) = encoded.split_at(FCM_SPLIT_POINT);
    vec![
        DataMap::from([
            ("b", first.to_string()),
            ("i", instance.to_string()),
            ("m", message_id.clone()),
            ("s", "1".to_string()),
        ]),
        DataMap::from([
            ("b", second.to_string()),
            ("i", instance.to_string()),
            ("m", message_id),
            ("s", "2".to_string()),
        ]),
    ]
}

/// Builds the v1-scheme data payload: raw body plus exactly one of
/// `instance` / `app`.
pub(super) fn v1_payload(body: &[u8], instance: &str, app: &str) -> Result<DataMap, ProxyError> {
    match (instance.is_empty(), app.is_empty()) {
        (false, true) => Ok(DataMap::from([
            ("body", String::from_utf8_lossy(body).into_owned()),
            ("instance", instance.to_string()),
        ])),
        (true, false) => Ok(DataMap::from([
            ("app", app.to_string()),
            ("body", String::from_utf8_lossy(body).into_owned()),
        ])),
        _ => Err(ProxyError::msg(
            StatusCode::NOT_FOUND,
            "exactly one of instance/app query params required",
        )),
    }
}

/// Data payloads for one inbound dispatch, v2 or v1 scheme.
pub(super) fn data_payloads(body: &[u8], inbound: &Inbound) -> Result<Vec<DataMap>, ProxyError> {
    let instance = inbound.query_get("instance").unwrap_or("");
    if inbound.query_has("v2") {
        Ok(v2_payloads(body, instance))
    } else {
        Ok(vec![v1_payload(
            body,
            instance,
            inbound.query_get("app").unwrap_or(""),
        )?])
    }
}

#[derive(Debug)]
pub struct FcmProxy {
    key: String,
    endpoint: String,
}

impl FcmProxy {
    #[must_use]
    pub fn new(config: &FcmConfig) -> Self {
        Self {
            key: config.key.clone(),
            endpoint: FCM_LEGACY_ENDPOINT.to_string(),
        }
    }

    /// Points the proxy at a different send endpoint (tests, regional
    /// deployments).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
struct LegacyMessage<'a> {
    to: &'a str,
    data: &'a DataMap,
}

/// Legacy send API result body. FCM capitalizes the field names; accept
/// both spellings.
#[derive(Debug, Default, Deserialize)]
struct LegacyResponse {
    #[serde(default, alias = "Results")]
    results: Vec<LegacyResult>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyResult {
    #[serde(default, alias = "Error")]
    error: String,
}

#[async_trait::async_trait]
impl Proxy for FcmProxy {
    fn path(&self) -> &str {
        "/FCM"
    }

    async fn translate(
        &self,
        body: &[u8],
        inbound: &Inbound,
    ) -> Result<Vec<OutboundRequest>, ProxyError> {
        let token = inbound.query_get("token").unwrap_or("");
        let authorization = HeaderValue::from_str(&format!("key={}", self.key))
            .map_err(|e| ProxyError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::new(e)))?;

        data_payloads(body, inbound)?
            .iter()
            .map(|data| {
                let payload = serde_json::to_vec(&LegacyMessage { to: token, data }).map_err(
                    |e| ProxyError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::new(e)),
                )?;
                let mut request = OutboundRequest::post(self.endpoint.clone(), payload)?;
                request
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                request.headers.insert(AUTHORIZATION, authorization.clone());
                Ok(request)
            })
            .collect()
    }

    fn verdict(&self, result: &OutboundResult) -> DispatchStatus {
        let Ok(response) = serde_json::from_slice::<LegacyResponse>(&result.body) else {
            return DispatchStatus::with_note(
                StatusCode::BAD_GATEWAY,
                "FCM response is not in the expected schema",
            );
        };
        let error = response
            .results
            .first()
            .map(|r| r.error.as_str())
            .unwrap_or("");

        match error {
            "" => DispatchStatus::new(StatusCode::CREATED),
            "MissingRegistration" | "InvalidRegistration" | "NotRegistered" => {
                DispatchStatus::with_note(StatusCode::NOT_FOUND, "registration token gone")
            }
            "Unavailable" | "InternalServerError" | "DeviceMessageRateExceeded"
            | "TopicsMessageRateExceeded" => {
                DispatchStatus::with_note(StatusCode::TOO_MANY_REQUESTS, "slow down")
            }
            other => {
                DispatchStatus::with_note(StatusCode::BAD_GATEWAY, format!("FCM error: {other}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::Method;

    fn proxy() -> FcmProxy {
        FcmProxy::new(&FcmConfig {
            enable: true,
            key: "testkey".to_string(),
        })
    }

    fn inbound(path_and_query: &str) -> Inbound {
        Inbound::new(
            Method::POST,
            path_and_query,
            HeaderMap::new(),
            "example.com".to_string(),
        )
    }

    fn result_with_body(body: &str) -> OutboundResult {
        OutboundResult {
            target: FCM_LEGACY_ENDPOINT.to_string(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec(),
            synthesized: false,
        }
    }

    #[tokio::test]
    async fn test_wraps_body_with_instance() {
        let requests = proxy()
            .translate(b"content", &inbound("/FCM?token=a&instance=b"))
            .await
            .expect("translate");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("key=testkey")
        );
        let value: serde_json::Value =
            serde_json::from_slice(&requests[0].body).expect("payload json");
        assert_eq!(
            value,
            serde_json::json!({"to": "a", "data": {"body": "content", "instance": "b"}})
        );
    }

    #[tokio::test]
    async fn test_wraps_body_with_app() {
        let requests = proxy()
            .translate(b"content", &inbound("/FCM?token=a&app=x"))
            .await
            .expect("translate");
        let value: serde_json::Value =
            serde_json::from_slice(&requests[0].body).expect("payload json");
        assert_eq!(
            value,
            serde_json::json!({"to": "a", "data": {"app": "x", "body": "content"}})
        );
    }

    #[tokio::test]
    async fn test_instance_and_app_are_exclusive() {
        for query in ["/FCM?token=a", "/FCM?token=a&instance=b&app=x"] {
            let err = proxy()
                .translate(b"content", &inbound(query))
                .await
                .unwrap_err();
            assert_eq!(err.code(), StatusCode::NOT_FOUND, "{query}");
        }
    }

    #[tokio::test]
    async fn test_v2_small_body_single_message() {
        let requests = proxy()
            .translate(b"content", &inbound("/FCM?v2&token=a&instance=myinst"))
            .await
            .expect("translate");
        assert_eq!(requests.len(), 1);
        let value: serde_json::Value =
            serde_json::from_slice(&requests[0].body).expect("payload json");
        assert_eq!(
            value,
            serde_json::json!({"to": "a", "data": {"b": "Y29udGVudA==", "i": "myinst"}})
        );
    }

    #[tokio::test]
    async fn test_v2_oversized_body_splits_and_reassembles() {
        // 4096 raw bytes encode to 5464 base64 characters, over the split
        // threshold.
        let body: Vec<u8> = (0..4096_usize).map(|i| (i % 256) as u8).collect();
        let requests = proxy()
            .translate(&body, &inbound("/FCM?v2&token=a&instance=myinst"))
            .await
            .expect("translate");
        assert_eq!(requests.len(), 2);

        let first: serde_json::Value =
            serde_json::from_slice(&requests[0].body).expect("part one");
        let second: serde_json::Value =
            serde_json::from_slice(&requests[1].body).expect("part two");

        assert_eq!(first["data"]["s"], "1");
        assert_eq!(second["data"]["s"], "2");
        assert_eq!(
            first["data"]["m"], second["data"]["m"],
            "both parts share one message id"
        );
        assert_ne!(first["data"]["m"], "0");
        assert_eq!(first["data"]["b"].as_str().map(str::len), Some(FCM_SPLIT_POINT));

        let reassembled = format!(
            "{}{}",
            first["data"]["b"].as_str().expect("b"),
            second["data"]["b"].as_str().expect("b"),
        );
        assert_eq!(
            BASE64.decode(reassembled).expect("base64"),
            body,
            "concatenating the b fields reconstructs the original body"
        );
    }

    #[test]
    fn test_verdict_mapping() {
        let proxy = proxy();
        let cases = [
            (r#"{"results":[{"error":""}]}"#, StatusCode::CREATED),
            (r#"{"Results":[{"Error":""}]}"#, StatusCode::CREATED),
            (r#"{"results":[{"error":"NotRegistered"}]}"#, StatusCode::NOT_FOUND),
            (
                r#"{"results":[{"error":"InvalidRegistration"}]}"#,
                StatusCode::NOT_FOUND,
            ),
            (
                r#"{"results":[{"error":"Unavailable"}]}"#,
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                r#"{"results":[{"error":"MismatchSenderId"}]}"#,
                StatusCode::BAD_GATEWAY,
            ),
            ("definitely not json", StatusCode::BAD_GATEWAY),
        ];
        for (body, expected) in cases {
            assert_eq!(
                proxy.verdict(&result_with_body(body)).status,
                expected,
                "{body}"
            );
        }
    }
}
