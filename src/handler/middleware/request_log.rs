use crate::auth::{SessionSigner, extract_session_token};
use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tracing::{info, warn};

/// Access log settings shared by every request.
#[derive(Clone)]
pub struct AccessLog {
    skip_routes: Vec<String>,
    sessions: SessionSigner,
}

impl AccessLog {
    pub fn new(sessions: SessionSigner) -> Self {
        Self {
            skip_routes: Vec::new(),
            sessions,
        }
    }

    /// Routes that are never logged. A trailing `*` matches a prefix.
    pub fn skip(mut self, route: impl Into<String>) -> Self {
        self.skip_routes.push(route.into());
        self
    }

    fn skips(&self, route: &str) -> bool {
        self.skip_routes.iter().any(|pattern| {
            if let Some(prefix) = pattern.strip_suffix('*') {
                route.starts_with(prefix)
            } else {
                route == pattern
            }
        })
    }

    /// Tenant behind the request's session token, without a database lookup.
    fn session_user(&self, headers: &HeaderMap) -> Option<i64> {
        let token = extract_session_token(headers)?;
        self.sessions.verify(&token, Utc::now())
    }
}

/// First address of the proxy headers, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for header in ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"] {
        let forwarded = headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Logs the matched route template and the caller once the handler returns.
/// Ids in the path and the query string stay out of the log.
pub async fn log_requests(
    State(log): State<Arc<AccessLog>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    if log.skips(&route) {
        return next.run(req).await;
    }
    let user_id = log.session_user(req.headers());
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client_ip = client_ip(req.headers(), peer);

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let cost_ms = started_at.elapsed().as_millis() as u64;
    if response.status().is_server_error() {
        warn!(
            target: "http.access",
            method = method.as_str(),
            route = route.as_str(),
            status,
            cost_ms,
            user_id,
            client_ip = client_ip.as_str(),
        );
    } else {
        info!(
            target: "http.access",
            method = method.as_str(),
            route = route.as_str(),
            status,
            cost_ms,
            user_id,
            client_ip = client_ip.as_str(),
        );
    }
    response
}
