//! The shield's reverse proxy.
//!
//! Pre-filter: blocked IPs are refused before anything is forwarded.
//! Forwarder: method, path, query, headers, and body pass through to
//! `BACKEND_URL`, with `x-forwarded-for` appended. Post-filter: terminal
//! status codes and the biometric-failure header feed the risk score.
//!
//! A small `/shield/*` namespace is reserved for operations: the alert list
//! and the operator flag endpoint.

use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::{RiskShield, BIOMETRIC_FAILURE_HEADER};

/// Largest request body the proxy will buffer.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct ProxyState {
    pub shield: RiskShield,
    pub client: reqwest::Client,
    pub backend_url: String,
    /// Operator token guarding /shield/admin; endpoint disabled when unset.
    pub admin_token: Option<String>,
}

impl ProxyState {
    pub fn new(shield: RiskShield, backend_url: String, admin_token: Option<String>) -> Self {
        Self {
            shield,
            client: reqwest::Client::new(),
            backend_url,
            admin_token,
        }
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/shield/alerts", get(alerts))
        .route("/shield/admin/flag", post(flag))
        .fallback(forward)
        .with_state(state)
}

fn client_ip(req: &Request<Body>) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn refusal(reason: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": {
                "code": "FORBIDDEN",
                "message": format!("blocked: {reason}"),
                "statusCode": 403,
            }
        })),
    )
        .into_response()
}

fn upstream_error(detail: String) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": {
                "code": "UPSTREAM",
                "message": detail,
                "statusCode": 502,
                "retryable": true,
            }
        })),
    )
        .into_response()
}

async fn forward(State(state): State<ProxyState>, req: Request<Body>) -> Response {
    let ip = client_ip(&req);

    // Pre-filter: refuse blocked IPs without touching the backend.
    if let Some(reason) = state.shield.blocked_reason(&ip) {
        return refusal(&reason);
    }

    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let url = format!("{}{}", state.backend_url.trim_end_matches('/'), path_and_query);

    let headers = req.headers().clone();
    let body = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return upstream_error("request body too large".to_string()),
    };

    let reqwest_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return upstream_error("unsupported method".to_string()),
    };
    let mut outbound = state.client.request(reqwest_method, &url);
    for (name, value) in &headers {
        if matches!(name.as_str(), "host" | "content-length") {
            continue;
        }
        outbound = outbound.header(name.as_str(), value.as_bytes());
    }
    outbound = outbound.header("x-forwarded-for", ip.as_str());

    let backend_resp = match outbound.body(body.to_vec()).send().await {
        Ok(resp) => resp,
        Err(e) => return upstream_error(format!("backend unreachable: {e}")),
    };

    let status = backend_resp.status().as_u16();
    let biometric_failure = backend_resp.headers().contains_key(BIOMETRIC_FAILURE_HEADER);

    // Post-filter: terminal codes and the biometric signal update risk.
    state.shield.observe_response(&ip, status, biometric_failure);

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in backend_resp.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder = builder.header(name, value);
        }
    }
    let bytes = match backend_resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return upstream_error(format!("backend body: {e}")),
    };
    builder
        .body(Body::from(bytes))
        .unwrap_or_else(|_| upstream_error("response build failed".to_string()))
}

async fn alerts(State(state): State<ProxyState>) -> Json<serde_json::Value> {
    Json(json!({ "alerts": state.shield.alerts() }))
}

#[derive(Debug, Deserialize)]
struct FlagRequest {
    ip: String,
}

async fn flag(
    State(state): State<ProxyState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<FlagRequest>,
) -> Response {
    let Some(expected) = &state.admin_token else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let presented = headers
        .get("x-shield-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != expected {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let score = state.shield.flag(&body.ip);
    Json(json!({ "ip": body.ip, "risk": score })).into_response()
}
