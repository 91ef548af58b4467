//! The dispatch pipeline: executes translated requests under the trust,
//! health and SSRF policies and classifies every outcome.
//!
//! Per outbound request the gateway path runs
//! `client selection -> trust check -> health check -> execute ->
//! classify -> health update`; proxies skip the caches because their
//! destination is operator-fixed. Whatever happens, the translator's render
//! step runs exactly once per inbound request.
//!
//! Transport failures never surface raw. They are folded into synthesized
//! responses - 404 for endpoints that should be dropped, 429 for endpoints
//! worth retrying - and recorded in the health cache so the next dispatch
//! short-circuits without a network attempt.

// Rust guideline compliant 2026-02

use std::time::Duration;

use reqwest::header::{HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode, Url};

use crate::cache::{HealthCache, HealthStatus, TrustCache};
use crate::client::{read_limited, ClientPool};
use crate::config::Config;
use crate::constants::RESPONSE_READ_LIMIT;
use crate::error::ProxyError;
use crate::translator::{Gateway, Inbound, OutboundRequest, OutboundResult, Proxy, Rendered};

/// Executes translated requests. Owns the client pool and both caches;
/// shared by every in-flight request.
#[derive(Debug)]
pub struct Dispatcher {
    clients: ClientPool,
    trust: TrustCache,
    health: HealthCache,
}

impl Dispatcher {
    #[must_use]
    pub fn new(clients: ClientPool) -> Self {
        Self::with_caches(clients, TrustCache::new(), HealthCache::new())
    }

    /// Injects specific cache instances (tests).
    #[must_use]
    pub fn with_caches(clients: ClientPool, trust: TrustCache, health: HealthCache) -> Self {
        Self {
            clients,
            trust,
            health,
        }
    }

    #[must_use]
    pub fn health(&self) -> &HealthCache {
        &self.health
    }

    /// Full gateway dispatch: translate, deliver to every destination in
    /// order, render the aggregate response.
    pub async fn gateway(
        &self,
        gateway: &dyn Gateway,
        body: &[u8],
        inbound: &Inbound,
        config: &Config,
    ) -> Rendered {
        let requests = match gateway.translate(body, inbound) {
            Ok(requests) => requests,
            Err(e) => return error_response(&e, config),
        };

        let trust_required = gateway.requires_endpoint_trust();
        let mut results = Vec::with_capacity(requests.len());
        for mut request in requests {
            attach_user_agent(&mut request, config);
            results.push(self.deliver_gateway(request, trust_required, config).await);
        }
        gateway.render(&results)
    }

    /// Full proxy dispatch: translate, deliver sequentially to the fixed
    /// backend, map the backend's answer onto a status.
    pub async fn proxy(
        &self,
        proxy: &dyn Proxy,
        body: &[u8],
        inbound: &Inbound,
        config: &Config,
    ) -> Rendered {
        let requests = match proxy.translate(body, inbound).await {
            Ok(requests) => requests,
            Err(e) => return error_response(&e, config),
        };

        let mut last = None;
        for mut request in requests {
            attach_user_agent(&mut request, config);
            let target = request.target.clone();
            match execute(
                self.clients.normal(),
                request,
                Some(self.clients.proxy_timeout()),
            )
            .await
            {
                Ok(result) => last = Some(result),
                Err(e) => {
                    log_detail(config, &format!("delivery to {target} failed: {e}"));
                    return Rendered::status(StatusCode::BAD_GATEWAY);
                }
            }
        }
        let Some(result) = last else {
            return Rendered::status(StatusCode::BAD_GATEWAY);
        };

        let verdict = proxy.verdict(&result);
        if !verdict.note.is_empty() {
            log_detail(config, &format!("{}: {}", verdict.status, verdict.note));
        }
        Rendered::status(verdict.status)
    }

    /// One gateway delivery with the full trust/health/SSRF gauntlet.
    async fn deliver_gateway(
        &self,
        request: OutboundRequest,
        trust_required: bool,
        config: &Config,
    ) -> OutboundResult {
        let url = request.url.clone();
        let target = request.target.clone();
        let host_allowed = config.is_allowed_host(&host_with_port(&url));

        // Client selection comes first: a forbidden literal-IP destination
        // must be rejected before anything - the trust probe included -
        // touches the network.
        let Some(client) = self.clients.select(&url, host_allowed) else {
            log::warn!("[Gateway] destination address not permitted: {target}");
            self.health.set_host(&url, HealthStatus::Refused);
            return OutboundResult::synthesized(target, StatusCode::NOT_FOUND);
        };

        // Trust: never seen this destination? Probe it for a UnifiedPush
        // discovery document first. Allow-listed hosts are exempt.
        if trust_required && !host_allowed && !self.trust.check(&url, client).await {
            log::warn!("[Gateway] refusing untrusted destination {target}");
            return OutboundResult::synthesized(target, StatusCode::FORBIDDEN);
        }

        // Health: short-circuit endpoints that recently failed.
        match self.health.status_for(&url) {
            HealthStatus::Refused => {
                log::debug!("[Gateway] {target} cached as refused");
                return OutboundResult::synthesized(target, StatusCode::NOT_FOUND);
            }
            HealthStatus::TemporaryUnavailable => {
                log::debug!("[Gateway] {target} cached as temporarily unavailable");
                return OutboundResult::synthesized(target, StatusCode::TOO_MANY_REQUESTS);
            }
            HealthStatus::NotCached => {}
        }

        match execute(client, request, None).await {
            Ok(mut result) => {
                match result.status.as_u16() {
                    200 | 201 => {} // healthy; nothing worth caching
                    429 => {
                        self.health
                            .set_host(&url, HealthStatus::TemporaryUnavailable);
                    }
                    500..=599 => {
                        self.health
                            .set_host(&url, HealthStatus::TemporaryUnavailable);
                    }
                    other => {
                        // Anything unexpected, redirects included, drops
                        // the endpoint.
                        log::debug!("[Gateway] {target} answered {other}, treating as refused");
                        self.health.set_host(&url, HealthStatus::Refused);
                        result.status = StatusCode::NOT_FOUND;
                    }
                }
                result
            }
            Err(e) => {
                if e.is_timeout() {
                    log::debug!("[Gateway] delivery to {target} timed out");
                    self.health
                        .set_host(&url, HealthStatus::TemporaryUnavailable);
                    OutboundResult::synthesized(target, StatusCode::TOO_MANY_REQUESTS)
                } else {
                    // DNS misses, unsupported schemes, forbidden addresses
                    // and TLS failures all land here.
                    log::debug!("[Gateway] delivery to {target} failed: {e}");
                    self.health.set_host(&url, HealthStatus::Refused);
                    OutboundResult::synthesized(target, StatusCode::NOT_FOUND)
                }
            }
        }
    }
}

/// Sends one outbound request and reads a bounded slice of the response.
async fn execute(
    client: &Client,
    request: OutboundRequest,
    timeout: Option<Duration>,
) -> Result<OutboundResult, reqwest::Error> {
    let OutboundRequest {
        method,
        url,
        target,
        headers,
        body,
    } = request;

    let mut outbound = reqwest::Request::new(method, url);
    *outbound.headers_mut() = headers;
    *outbound.body_mut() = Some(body.into());
    if let Some(timeout) = timeout {
        *outbound.timeout_mut() = Some(timeout);
    }

    let response = client.execute(outbound).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = read_limited(response, RESPONSE_READ_LIMIT).await;
    Ok(OutboundResult {
        target,
        status,
        headers,
        body,
        synthesized: false,
    })
}

fn attach_user_agent(request: &mut OutboundRequest, config: &Config) {
    if let Ok(value) = HeaderValue::from_str(config.user_agent()) {
        request.headers.insert(USER_AGENT, value);
    }
}

/// Renders a translation error: the embedded status code goes out, the
/// cause stays in the log.
fn error_response(error: &ProxyError, config: &Config) -> Rendered {
    log_detail(config, &error.to_string());
    Rendered::status(error.code())
}

/// Error detail is operator-sensitive noise: info-level when verbose is
/// configured, debug otherwise.
fn log_detail(config: &Config, message: &str) {
    if config.verbose {
        log::info!("[Dispatch] {message}");
    } else {
        log::debug!("[Dispatch] {message}");
    }
}

/// `host[:port]` as the allow-list expects it.
fn host_with_port(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}:{port}", url.host_str().unwrap_or("")),
        None => url.host_str().unwrap_or("").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_with_port_formats() {
        let url = Url::parse("http://push.example.com:8080/x").expect("url");
        assert_eq!(host_with_port(&url), "push.example.com:8080");
        let url = Url::parse("https://push.example.com/x").expect("url");
        assert_eq!(host_with_port(&url), "push.example.com");
    }

    // Pipeline behavior (classification, cache updates, short circuits) is
    // exercised end-to-end in tests/gateway_dispatch.rs and
    // tests/proxy_dispatch.rs against mock servers.
}
