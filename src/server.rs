//! Inbound HTTP surface: accept loop, routing and per-request plumbing.
//!
//! One task per connection. Every request takes a configuration snapshot,
//! resolves its route (`/`-terminated mount paths match subtrees, others
//! match exactly), reads the body under the bound its dispatch kind
//! allows, and hands off to the dispatcher. `GET` serves the translator's
//! discovery document, anything but `GET`/`POST` is 405, `/health` always
//! answers, and unknown paths get a short 404.

// Rust guideline compliant 2026-02

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HOST, USER_AGENT};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ConfigHandle;
use crate::constants::{GATEWAY_READ_LIMIT, SHUTDOWN_DRAIN};
use crate::dispatch::Dispatcher;
use crate::translator::{Discovery, Inbound, Rendered, Route, Translator};

/// Everything a request handler needs, shared across all connections.
#[derive(Debug)]
pub struct AppState {
    pub config: ConfigHandle,
    pub routes: Vec<Route>,
    pub dispatcher: Dispatcher,
}

/// Accept loop. Runs until `shutdown` fires, then drains in-flight
/// connections for a bounded window.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let tracker = TaskTracker::new();
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("[Server] accept failed: {e}");
                        continue;
                    }
                };
                let state = Arc::clone(&state);
                tracker.spawn(async move {
                    let service = service_fn(move |request| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, Infallible>(handle(request, state, remote).await) }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        log::debug!("[Server] connection from {remote} ended: {e}");
                    }
                });
            }
        }
    }

    tracker.close();
    if tokio::time::timeout(SHUTDOWN_DRAIN, tracker.wait())
        .await
        .is_err()
    {
        log::warn!("[Server] drain window elapsed with connections still open");
    }
    Ok(())
}

async fn handle(
    request: Request<Incoming>,
    state: Arc<AppState>,
    remote: SocketAddr,
) -> Response<Full<Bytes>> {
    let config = state.config.snapshot();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_string());
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    log::info!("{method} {path} {remote} {user_agent}");

    // Always available, unauthenticated, touches nothing.
    if path == "/health" {
        return bytes_response(StatusCode::OK, format!("OK {}\n", config.user_agent()).into_bytes());
    }

    let Some(route) = match_route(&state.routes, &path) else {
        return text(StatusCode::NOT_FOUND, "Endpoint doesn't exist\n");
    };

    match &route.translator {
        Translator::Gateway(gateway) => {
            if method == Method::GET {
                return bytes_response(StatusCode::OK, gateway.discovery().to_vec());
            }
            if method != Method::POST {
                return text(StatusCode::METHOD_NOT_ALLOWED, "");
            }
            let (parts, body) = request.into_parts();
            let Ok(collected) = Limited::new(body, GATEWAY_READ_LIMIT).collect().await else {
                return text(StatusCode::PAYLOAD_TOO_LARGE, "Request is too long\n");
            };
            let inbound = inbound_from(&parts, &path_and_query);
            let rendered = state
                .dispatcher
                .gateway(gateway.as_ref(), &collected.to_bytes(), &inbound, &config)
                .await;
            respond(rendered)
        }
        Translator::Proxy(proxy) => {
            if method == Method::GET {
                return bytes_response(StatusCode::OK, Discovery::default_payload());
            }
            if method != Method::POST {
                return text(StatusCode::METHOD_NOT_ALLOWED, "");
            }
            // One byte over the limit so "too large" is distinguishable
            // from "exactly at the limit".
            let (parts, body) = request.into_parts();
            let Ok(collected) = Limited::new(body, config.max_up_size + 1).collect().await else {
                return text(StatusCode::PAYLOAD_TOO_LARGE, "Request is too long\n");
            };
            let body = collected.to_bytes();
            if body.len() > config.max_up_size {
                return text(StatusCode::PAYLOAD_TOO_LARGE, "Request is too long\n");
            }
            let inbound = inbound_from(&parts, &path_and_query);
            let rendered = state
                .dispatcher
                .proxy(proxy.as_ref(), &body, &inbound, &config)
                .await;
            respond(rendered)
        }
    }
}

/// First route whose mount matches: `/`-terminated paths match their
/// subtree, all others match exactly.
fn match_route<'a>(routes: &'a [Route], path: &str) -> Option<&'a Route> {
    routes.iter().find(|route| {
        if route.path.ends_with('/') {
            path.starts_with(route.path.as_str())
        } else {
            path == route.path
        }
    })
}

fn inbound_from(parts: &hyper::http::request::Parts, path_and_query: &str) -> Inbound {
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    Inbound::new(
        parts.method.clone(),
        path_and_query,
        parts.headers.clone(),
        host,
    )
}

fn respond(rendered: Rendered) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(rendered.body)));
    *response.status_mut() = rendered.status;
    *response.headers_mut() = rendered.headers;
    response
}

fn bytes_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::matrix::MatrixGateway;

    fn routes() -> Vec<Route> {
        vec![
            Route {
                path: "/generic/".to_string(),
                translator: Translator::Gateway(Box::new(MatrixGateway::new())),
            },
            Route {
                path: "/FCM".to_string(),
                translator: Translator::Gateway(Box::new(MatrixGateway::new())),
            },
        ]
    }

    #[test]
    fn test_subtree_mounts_match_prefixes() {
        let routes = routes();
        assert!(match_route(&routes, "/generic/").is_some());
        assert!(match_route(&routes, "/generic/abc/def").is_some());
        assert!(match_route(&routes, "/generic").is_none());
    }

    #[test]
    fn test_exact_mounts_match_exactly() {
        let routes = routes();
        assert!(match_route(&routes, "/FCM").is_some());
        assert!(match_route(&routes, "/FCM/extra").is_none());
        assert!(match_route(&routes, "/unknown").is_none());
    }
}
