//! Transparent draft-4 gateway: relays whole requests to one configured
//! push server, rewriting aesgcm encryption headers into the body on the
//! way through.
//!
//! Unlike the other gateways the destination is operator-fixed, the inbound
//! path is preserved, and the backend's response (status, headers, body) is
//! relayed back to the caller.

// Rust guideline compliant 2026-02

use reqwest::header::{HeaderMap, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use reqwest::StatusCode;

use super::{Discovery, Gateway, Inbound, OutboundRequest, OutboundResult, Rendered};
use crate::config::TransparentConfig;
use crate::error::ProxyError;

#[derive(Debug)]
pub struct TransparentGateway {
    address: String,
    scheme: String,
    bind_path: String,
    discovery: Vec<u8>,
}

impl TransparentGateway {
    /// `config` must have passed validation: address non-empty, scheme
    /// http/https, bind path `/`-terminated.
    #[must_use]
    pub fn new(config: &TransparentConfig) -> Self {
        Self {
            address: config.address.clone(),
            scheme: config.scheme.clone(),
            bind_path: config.bind_path.clone(),
            discovery: Discovery::default_payload(),
        }
    }
}

impl Gateway for TransparentGateway {
    fn path(&self) -> &str {
        &self.bind_path
    }

    fn discovery(&self) -> &[u8] {
        &self.discovery
    }

    fn translate(
        &self,
        body: &[u8],
        inbound: &Inbound,
    ) -> Result<Vec<OutboundRequest>, ProxyError> {
        let mut target = format!("{}://{}{}", self.scheme, self.address, inbound.path);
        if !inbound.raw_query.is_empty() {
            target.push('?');
            target.push_str(&inbound.raw_query);
        }

        let forwarded = if inbound.header("content-encoding") == "aesgcm" {
            let mut rewritten = format!(
                "aesgcm\r\nEncryption: {}\r\nCrypto-Key: {}\r\n",
                inbound.header("encryption"),
                inbound.header("crypto-key"),
            )
            .into_bytes();
            rewritten.extend_from_slice(body);
            rewritten
        } else {
            body.to_vec()
        };

        let mut request = OutboundRequest::post(target, forwarded)?;
        request.headers = relay_headers(&inbound.headers);
        Ok(vec![request])
    }

    fn render(&self, results: &[OutboundResult]) -> Rendered {
        let Some(result) = results.first() else {
            return Rendered::status(StatusCode::INTERNAL_SERVER_ERROR);
        };
        let mut rendered = Rendered::status(result.status);
        rendered.headers = relay_headers(&result.headers);
        rendered.body = result.body.clone();
        rendered
    }
}

/// Clones a header map minus the fields the transports manage themselves.
fn relay_headers(headers: &HeaderMap) -> HeaderMap {
    let mut relayed = headers.clone();
    relayed.remove(HOST);
    relayed.remove(CONTENT_LENGTH);
    relayed.remove(TRANSFER_ENCODING);
    relayed
}
