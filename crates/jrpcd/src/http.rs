//! HTTP front: accepts JSON-RPC POSTs and hands bodies to the engine.
//!
//! Every path is served identically. Anything other than POST is a 405;
//! a missing content type is a 400 and a non-JSON one a 415, before the
//! body is even looked at.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tracing::{debug, error};

use jrpcd_core::proxy::{ProxyEngine, ProxyError};

/// Builds the router: a single fallback handler so the check applies to
/// any request path.
pub fn app(engine: Arc<ProxyEngine>) -> Router {
    Router::new().fallback(handle_rpc).with_state(engine)
}

async fn handle_rpc(
    State(engine): State<Arc<ProxyEngine>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        error!(method = %method, "unsupported method");
        return (StatusCode::METHOD_NOT_ALLOWED, "Invalid method").into_response();
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if content_type.is_empty() {
        error!("missing content type");
        return (StatusCode::BAD_REQUEST, "Missing content type").into_response();
    }
    if !content_type.starts_with("application/json") {
        error!(content_type = content_type.as_str(), "invalid content type");
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Invalid content type").into_response();
    }

    debug!(body = %String::from_utf8_lossy(&body), "request received");

    match engine.process(&body).await {
        Ok(payload) => {
            debug!(body = %String::from_utf8_lossy(&payload), "sending response to client");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                payload,
            )
                .into_response()
        }
        Err(err @ ProxyError::Decode(_)) => {
            error!(error = %err, "failed to decode request");
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Err(err) => {
            error!(error = %err, "dispatch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
