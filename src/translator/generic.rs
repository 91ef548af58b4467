//! Generic gateway: forwards a push body verbatim to an endpoint named in
//! the request itself.
//!
//! The endpoint travels base64url-encoded (no padding) as the first path
//! segment after the mount point - `/generic/<endpoint>/...` - which keeps
//! it out of query-string logs and works for callers that can only
//! configure a single URL (Nextcloud). A `fwdurl` query parameter is
//! accepted as fallback. The dispatch pipeline probes the decoded endpoint
//! before anything is delivered to it.

// Rust guideline compliant 2026-01

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::StatusCode;

use super::{Discovery, Gateway, Inbound, OutboundRequest, OutboundResult, Rendered};
use crate::error::ProxyError;

#[derive(Debug)]
pub struct GenericGateway {
    discovery: Vec<u8>,
}

impl Default for GenericGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: Discovery::payload(1, "generic"),
        }
    }
}

/// Extracts the destination endpoint from the path segment after the mount
/// point, else from the `fwdurl` query parameter.
pub(super) fn destination(inbound: &Inbound) -> Result<String, ProxyError> {
    let segment = inbound.path.splitn(4, '/').nth(2).unwrap_or("");
    if !segment.is_empty() {
        let decoded = BASE64URL.decode(segment).map_err(|e| {
            ProxyError::new(
                StatusCode::BAD_REQUEST,
                anyhow::anyhow!("encoded endpoint is not valid base64: {e}"),
            )
        })?;
        return String::from_utf8(decoded).map_err(|_| {
            ProxyError::msg(StatusCode::BAD_REQUEST, "encoded endpoint is not UTF-8")
        });
    }
    if let Some(fwdurl) = inbound.query_get("fwdurl") {
        if !fwdurl.is_empty() {
            return Ok(fwdurl.to_string());
        }
    }
    Err(ProxyError::msg(
        StatusCode::BAD_REQUEST,
        "no destination endpoint in path or query",
    ))
}

/// Render shared by the endpoint-in-request gateways: the backend status
/// passes straight through, one delivery per dispatch.
pub(super) fn passthrough_status(results: &[OutboundResult]) -> Rendered {
    let status = results
        .first()
        .map_or(StatusCode::INTERNAL_SERVER_ERROR, |r| r.status);
    let mut rendered = Rendered::status(status);
    rendered
        .headers
        .insert(HeaderName::from_static("ttl"), HeaderValue::from_static("0"));
    rendered
}

impl Gateway for GenericGateway {
    fn path(&self) -> &str {
        "/generic/"
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
        Ok(vec![OutboundRequest::post(endpoint, body.to_vec())?])
    }

    fn render(&self, results: &[OutboundResult]) -> Rendered {
        passthrough_status(results)
    }
}
