//! FCM v1 proxy (`/FCMv1`) - service-account authenticated send API.
//!
//! Same data-message scheme as the legacy proxy (including the v2
//! oversized-payload split), but messages go to the per-project
//! `messages:send` endpoint with a Bearer token minted from a
//! service-account file. Operators serving several apps map inbound Host
//! values to separate credential files.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;

use super::fcm::{data_payloads, DataMap};
use super::{DispatchStatus, Inbound, OutboundRequest, OutboundResult, Proxy};
use crate::config::FcmV1Config;
use crate::error::ProxyError;
use crate::google_auth::TokenSource;

/// Where v1 messages for a project are sent, and how they are
/// authenticated. Split out as a trait so tests can stand in for the
/// Google token exchange.
#[async_trait::async_trait]
pub(crate) trait MessageAuthority: Send + Sync {
    /// The project's `messages:send` URL.
    fn api_url(&self) -> String;
    /// A currently valid Bearer token.
    async fn token(&self) -> Result<String, ProxyError>;
}

struct GoogleAuthority {
    source: TokenSource,
}

#[async_trait::async_trait]
impl MessageAuthority for GoogleAuthority {
    fn api_url(&self) -> String {
        format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            self.source.project_id()
        )
    }

    async fn token(&self) -> Result<String, ProxyError> {
        self.source
            .token()
            .await
            .map_err(|e| ProxyError::new(StatusCode::INTERNAL_SERVER_ERROR, e))
    }
}

pub struct FcmV1Proxy {
    default_authority: Option<Arc<dyn MessageAuthority>>,
    by_host: HashMap<String, Arc<dyn MessageAuthority>>,
}

impl std::fmt::Debug for FcmV1Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmV1Proxy")
            .field("hosts", &self.by_host.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FcmV1Proxy {
    /// Reads every configured service-account file. Files referenced by
    /// several hosts are loaded once and shared.
    pub fn load(config: &FcmV1Config) -> anyhow::Result<Self> {
        let mut by_path: HashMap<String, Arc<dyn MessageAuthority>> = HashMap::new();
        let mut authority_for = |path: &str| -> anyhow::Result<Arc<dyn MessageAuthority>> {
            if let Some(existing) = by_path.get(path) {
                return Ok(Arc::clone(existing));
            }
            let authority: Arc<dyn MessageAuthority> = Arc::new(GoogleAuthority {
                source: TokenSource::from_file(path)?,
            });
            by_path.insert(path.to_string(), Arc::clone(&authority));
            Ok(authority)
        };

        let default_authority = if config.credentials_path.is_empty() {
            None
        } else {
            Some(authority_for(&config.credentials_path)?)
        };
        let mut by_host = HashMap::new();
        for (host, path) in &config.credentials_paths {
            by_host.insert(host.clone(), authority_for(path)?);
        }
        Ok(Self {
            default_authority,
            by_host,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_authorities(
        default_authority: Option<Arc<dyn MessageAuthority>>,
        by_host: HashMap<String, Arc<dyn MessageAuthority>>,
    ) -> Self {
        Self {
            default_authority,
            by_host,
        }
    }

    fn authority_for(&self, host: &str) -> Result<&Arc<dyn MessageAuthority>, ProxyError> {
        self.by_host
            .get(host)
            .or(self.default_authority.as_ref())
            .ok_or_else(|| {
                ProxyError::msg(
                    StatusCode::NOT_FOUND,
                    format!("endpoint doesn't exist, wrong host {host:?}"),
                )
            })
    }
}

#[derive(Serialize)]
struct V1Message<'a> {
    message: V1Payload<'a>,
}

#[derive(Serialize)]
struct V1Payload<'a> {
    token: &'a str,
    data: &'a DataMap,
}

#[async_trait::async_trait]
impl Proxy for FcmV1Proxy {
    fn path(&self) -> &str {
        "/FCMv1"
    }

    async fn translate(
        &self,
        body: &[u8],
        inbound: &Inbound,
    ) -> Result<Vec<OutboundRequest>, ProxyError> {
        let authority = self.authority_for(&inbound.host)?;
        let token = inbound.query_get("token").unwrap_or("");
        let bearer = authority.token().await?;
        let authorization = HeaderValue::from_str(&format!("Bearer {bearer}"))
            .map_err(|e| ProxyError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::new(e)))?;
        let api_url = authority.api_url();

        data_payloads(body, inbound)?
            .iter()
            .map(|data| {
                let payload = serde_json::to_vec(&V1Message {
                    message: V1Payload { token, data },
                })
                .map_err(|e| {
                    ProxyError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow::Error::new(e))
                })?;
                let mut request = OutboundRequest::post(api_url.clone(), payload)?;
                request
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                request.headers.insert(AUTHORIZATION, authorization.clone());
                Ok(request)
            })
            .collect()
    }

    fn verdict(&self, result: &OutboundResult) -> DispatchStatus {
        match result.status.as_u16() {
            // Our credentials or payload were rejected; the app server did
            // nothing wrong and must not be told otherwise.
            400..=499 => DispatchStatus::with_note(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("FCM rejected the request ({})", result.status),
            ),
            500..=599 => DispatchStatus::with_note(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            _ => DispatchStatus::new(result.status),
        }
    }
}
