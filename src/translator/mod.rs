//! Translator contract and backend registry.
//!
//! A translator rewrites one inbound UnifiedPush dispatch into one or more
//! backend-correct outbound requests, and maps the backend's answer back
//! onto a UnifiedPush-correct response. Two capability shapes exist:
//!
//! - [`Gateway`] - receives notifications addressed to *this* server and
//!   fans them out to subscriber endpoints named in the request body. May
//!   produce several outbound requests and renders an aggregate response.
//! - [`Proxy`] - receives a push already addressed via this server's own
//!   URL and forwards it to one operator-fixed backend. Renders a bare
//!   status code.
//!
//! The shape is resolved once at registration time into the [`Translator`]
//! enum; nothing downstream inspects types per request.

// Rust guideline compliant 2026-02

pub mod aesgcm;
pub mod fcm;
pub mod fcm_v1;
pub mod generic;
pub mod gotify;
pub mod matrix;
pub mod transparent;
pub mod webpush_fcm;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ProxyError;
use crate::vapid::TokenMinter;

/// UnifiedPush discovery document, served on GET and demanded from
/// endpoints by the trust probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Discovery {
    #[serde(default)]
    pub unifiedpush: DiscoveryUp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryUp {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
}

#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde skip predicate signature")]
fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl Discovery {
    /// The plain `{"unifiedpush":{"version":1}}` document.
    #[must_use]
    pub fn default_payload() -> Vec<u8> {
        Self::payload(1, "")
    }

    /// Serialized document for a named gateway variant.
    ///
    /// Runs at registration time on static input, hence the expect.
    #[must_use]
    pub fn payload(version: u32, gateway: &str) -> Vec<u8> {
        serde_json::to_vec(&Self {
            unifiedpush: DiscoveryUp {
                version,
                gateway: gateway.to_string(),
            },
        })
        .expect("discovery document serialization")
    }
}

/// Immutable view of the inbound HTTP request handed to a translator.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub method: Method,
    /// Request path, percent-encoded as received.
    pub path: String,
    /// Raw query string (no leading `?`).
    pub raw_query: String,
    /// Decoded query pairs, in order of appearance.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    /// Value of the Host header.
    pub host: String,
}

impl Inbound {
    /// Builds an inbound view from a path-and-query string.
    #[must_use]
    pub fn new(method: Method, path_and_query: &str, headers: HeaderMap, host: String) -> Self {
        let (path, raw_query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (path_and_query.to_string(), String::new()),
        };
        let query = url::form_urlencoded::parse(raw_query.as_bytes())
            .into_owned()
            .collect();
        Self {
            method,
            path,
            raw_query,
            query,
            headers,
            host,
        }
    }

    /// First value of a query parameter, if present.
    #[must_use]
    pub fn query_get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a query parameter is present at all (flags like `v2` carry
    /// no value).
    #[must_use]
    pub fn query_has(&self, key: &str) -> bool {
        self.query.iter().any(|(k, _)| k == key)
    }

    /// Header value as a string, empty when absent or not valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// One fully-formed outbound delivery. Owned by the dispatch pipeline once
/// produced; only the User-Agent header is attached afterwards.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    /// Destination exactly as the caller supplied it. Gateway renders echo
    /// this, not the normalized URL.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    /// POST to a caller- or operator-supplied destination string.
    ///
    /// An unparsable destination is a translation error: the dispatch never
    /// had anything it could deliver to.
    pub fn post(target: impl Into<String>, body: Vec<u8>) -> Result<Self, ProxyError> {
        let target = target.into();
        let url = Url::parse(&target).map_err(|e| {
            ProxyError::new(
                StatusCode::BAD_REQUEST,
                anyhow::anyhow!("invalid destination {target:?}: {e}"),
            )
        })?;
        Ok(Self {
            method: Method::POST,
            url,
            target,
            headers: HeaderMap::new(),
            body,
        })
    }
}

/// Outcome of one outbound delivery, real or synthesized.
#[derive(Debug)]
pub struct OutboundResult {
    /// Destination string from the originating [`OutboundRequest`].
    pub target: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Response body, truncated at the pipeline's read bound.
    pub body: Vec<u8>,
    /// True when no network call produced this status (trust refusal or
    /// health-cache short circuit or transport failure).
    pub synthesized: bool,
}

impl OutboundResult {
    /// A placeholder standing in for a delivery that was skipped or failed.
    #[must_use]
    pub fn synthesized(target: String, status: StatusCode) -> Self {
        Self {
            target,
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
            synthesized: true,
        }
    }
}

/// Final client-facing response produced by a gateway render.
#[derive(Debug)]
pub struct Rendered {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Rendered {
    #[must_use]
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

/// UnifiedPush status a proxy derived from its backend's response, with an
/// optional note for verbose logging.
#[derive(Debug)]
pub struct DispatchStatus {
    pub status: StatusCode,
    pub note: String,
}

impl DispatchStatus {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            note: String::new(),
        }
    }

    #[must_use]
    pub fn with_note(status: StatusCode, note: impl Into<String>) -> Self {
        Self {
            status,
            note: note.into(),
        }
    }
}

/// Fan-out translator: caller-supplied destinations, aggregate response.
pub trait Gateway: Send + Sync {
    /// Mount path. Paths ending in `/` register as subtrees.
    fn path(&self) -> &str;

    /// Discovery payload served on inbound GET.
    fn discovery(&self) -> &[u8];

    /// Whether destinations must pass the endpoint trust probe before the
    /// first delivery. True for gateways that accept an arbitrary
    /// caller-named endpoint URL; protocols with their own rejection
    /// contract (Matrix) and operator-fixed destinations stay false.
    fn requires_endpoint_trust(&self) -> bool {
        false
    }

    /// Rewrites the inbound dispatch into outbound deliveries, one per
    /// destination, in destination order.
    fn translate(&self, body: &[u8], inbound: &Inbound)
        -> Result<Vec<OutboundRequest>, ProxyError>;

    /// Renders the aggregate response once every delivery is resolved.
    /// `results` is one-to-one and in order with the translated requests.
    fn render(&self, results: &[OutboundResult]) -> Rendered;
}

/// Single-backend translator: operator-fixed destination, bare status
/// response.
#[async_trait]
pub trait Proxy: Send + Sync {
    /// Mount path.
    fn path(&self) -> &str;

    /// Rewrites the inbound dispatch. Usually one request; FCM data
    /// messages may split an oversized payload into two.
    async fn translate(
        &self,
        body: &[u8],
        inbound: &Inbound,
    ) -> Result<Vec<OutboundRequest>, ProxyError>;

    /// Maps the backend's success/failure semantics onto a
    /// UnifiedPush-correct status.
    fn verdict(&self, result: &OutboundResult) -> DispatchStatus;
}

/// A registered translator, shape resolved once at registration.
pub enum Translator {
    Gateway(Box<dyn Gateway>),
    Proxy(Box<dyn Proxy>),
}

impl fmt::Debug for Translator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway(g) => write!(f, "Translator::Gateway({})", g.path()),
            Self::Proxy(p) => write!(f, "Translator::Proxy({})", p.path()),
        }
    }
}

/// A mounted translator.
#[derive(Debug)]
pub struct Route {
    pub path: String,
    pub translator: Translator,
}

/// Everything registration produced: the route table plus background state
/// the supervisor owns (currently only the VAPID minter).
#[derive(Debug)]
pub struct Registry {
    pub routes: Vec<Route>,
    /// Present when the WebPush-FCM translator is enabled; `main` schedules
    /// the periodic token refresh for it.
    pub vapid: Option<Arc<TokenMinter>>,
}

/// Builds every enabled translator from the startup configuration, running
/// each one's expensive initialization (key and credential loading).
///
/// The route set is fixed for the process lifetime; configuration reloads
/// swap operational settings but do not re-register routes.
pub fn build_registry(config: &Config) -> Result<Registry> {
    let mut routes = Vec::new();
    let mut vapid = None;

    let mut mount = |translator: Translator| {
        let path = match &translator {
            Translator::Gateway(g) => g.path().to_string(),
            Translator::Proxy(p) => p.path().to_string(),
        };
        if path.is_empty() {
            return;
        }
        log::info!("[Translator] mounted {path}");
        routes.push(Route { path, translator });
    };

    if config.gateway.matrix.enable {
        mount(Translator::Gateway(Box::new(matrix::MatrixGateway::new())));
    }
    if config.gateway.generic.enable {
        mount(Translator::Gateway(Box::new(generic::GenericGateway::new())));
    }
    if config.gateway.aesgcm.enable {
        mount(Translator::Gateway(Box::new(aesgcm::AesgcmGateway::new())));
    }
    if config.gateway.transparent_draft4.enable {
        mount(Translator::Gateway(Box::new(
            transparent::TransparentGateway::new(&config.gateway.transparent_draft4),
        )));
    }

    if config.rewrite.fcm.enable {
        mount(Translator::Proxy(Box::new(fcm::FcmProxy::new(
            &config.rewrite.fcm,
        ))));
    }
    if config.rewrite.fcm_v1.enable {
        mount(Translator::Proxy(Box::new(fcm_v1::FcmV1Proxy::load(
            &config.rewrite.fcm_v1,
        )?)));
    }
    if config.rewrite.webpush_fcm.enable {
        let proxy = webpush_fcm::WebPushFcmProxy::load(&config.rewrite.webpush_fcm)?;
        vapid = Some(Arc::clone(proxy.minter()));
        mount(Translator::Proxy(Box::new(proxy)));
    }
    if config.rewrite.gotify.enable {
        mount(Translator::Proxy(Box::new(gotify::GotifyProxy::new(
            &config.rewrite.gotify,
        ))));
    }

    Ok(Registry { routes, vapid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_payloads() {
        assert_eq!(
            Discovery::default_payload(),
            br#"{"unifiedpush":{"version":1}}"#
        );
        assert_eq!(
            Discovery::payload(1, "matrix"),
            br#"{"unifiedpush":{"version":1,"gateway":"matrix"}}"#
        );
    }

    #[test]
    fn test_inbound_query_parsing() {
        let inbound = Inbound::new(
            Method::POST,
            "/FCM?v2&token=a&instance=myinst",
            HeaderMap::new(),
            "example.com".to_string(),
        );
        assert_eq!(inbound.path, "/FCM");
        assert!(inbound.query_has("v2"));
        assert_eq!(inbound.query_get("token"), Some("a"));
        assert_eq!(inbound.query_get("instance"), Some("myinst"));
        assert_eq!(inbound.query_get("missing"), None);
        assert!(!inbound.query_has("missing"));
    }

    #[test]
    fn test_outbound_target_preserved_verbatim() {
        let req = OutboundRequest::post("https://a", Vec::new()).expect("parse");
        // Url normalization adds a trailing slash; the caller-supplied form
        // must survive for gateway renders.
        assert_eq!(req.target, "https://a");
        assert_eq!(req.url.as_str(), "https://a/");
    }

    #[test]
    fn test_outbound_rejects_garbage_destination() {
        let err = OutboundRequest::post("::not a url::", Vec::new()).unwrap_err();
        assert_eq!(err.code(), StatusCode::BAD_REQUEST);
    }
}
