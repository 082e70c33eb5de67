//! Request pipeline: cache lookup, routing, fan-out and write-back.
//!
//! One [`ProxyEngine::process`] call handles one client HTTP exchange.
//! Requests served from cache never reach an upstream; the rest are
//! grouped by their first matching route and each populated route gets
//! one concurrent upstream POST with in-route failover. The exchange is
//! all-or-nothing: if any route exhausts its backends the whole dispatch
//! fails. Fresh non-error responses are persisted after the reply is
//! under way.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use futures::future::join_all;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::{
    cache::CacheStore,
    codec::{self, DecodeError, RawObject, RpcRequest},
    route::Route,
};

/// Timeout applied to each backend attempt, keeping failover bounded.
pub const BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Client body could not be decoded; maps to HTTP 400.
    #[error("Failed to decode request: {0}")]
    Decode(#[from] DecodeError),

    /// A route exhausted all its backends; maps to HTTP 500.
    #[error("Failed to forward request")]
    Forward,

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Per-process dispatch engine.
///
/// Holds the immutable route table, the shared cache handle and a pooled
/// HTTP client. Cheap to share behind an `Arc`; every method takes
/// `&self` and concurrent exchanges do not contend.
pub struct ProxyEngine {
    routes: Vec<Route>,
    cache: CacheStore,
    client: reqwest::Client,
}

impl ProxyEngine {
    pub fn new(routes: Vec<Route>, cache: CacheStore) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder().timeout(BACKEND_TIMEOUT).build()?;
        Ok(Self { routes, cache, client })
    }

    /// Runs the full dispatch protocol for one client body and returns the
    /// encoded response payload.
    pub async fn process(&self, body: &[u8]) -> Result<Vec<u8>, ProxyError> {
        let (requests, batch) = codec::decode_requests(body)?;
        debug!(requests = requests.len(), batch, "decoded request envelope");

        let mut responses: Vec<RawObject> = Vec::with_capacity(requests.len());
        // Serialized id -> fingerprint, for binding fresh responses to
        // cache keys during write-back.
        let mut write_keys: HashMap<String, String> = HashMap::new();
        let mut buckets: HashMap<usize, Vec<&RpcRequest>> = HashMap::new();
        let mut unroutable = false;

        for request in &requests {
            if request.method().is_empty() {
                let mut synthetic = RawObject::new();
                synthetic
                    .insert("id".to_string(), request.id().cloned().unwrap_or(Value::Null));
                synthetic.insert("error".to_string(), Value::String("Missing method".to_string()));
                responses.push(synthetic);
                continue;
            }

            if self.cache.is_enabled() && request.cacheable() {
                if let Some(hit) = self.lookup(request) {
                    responses.push(hit);
                    continue;
                }
                if let Some(id) = request.id() {
                    if let Ok(id_key) = serde_json::to_string(id) {
                        write_keys.insert(id_key, request.fingerprint().to_string());
                    }
                }
            }

            match self.routes.iter().position(|route| route.matches(request)) {
                Some(index) => buckets.entry(index).or_default().push(request),
                None => {
                    error!(method = request.method(), "no route matches request");
                    unroutable = true;
                }
            }
        }

        if unroutable {
            return Err(ProxyError::Forward);
        }

        if !buckets.is_empty() {
            let outcomes = join_all(
                buckets
                    .iter()
                    .map(|(index, bucket)| self.forward(&self.routes[*index], bucket)),
            )
            .await;

            let mut fresh: Vec<RawObject> = Vec::new();
            for outcome in outcomes {
                fresh.append(&mut outcome?);
            }

            self.schedule_write_back(&fresh, &write_keys);
            responses.append(&mut fresh);
        }

        Ok(codec::encode_responses(&responses, batch)?)
    }

    /// Cache lookup for one request. On a hit the live request's id is
    /// injected into the stored mapping before it is returned.
    fn lookup(&self, request: &RpcRequest) -> Option<RawObject> {
        let bytes = self.cache.get(request.fingerprint().as_bytes())?;
        match serde_json::from_slice::<RawObject>(&bytes) {
            Ok(mut cached) => {
                debug!(key = request.fingerprint(), "request served from cache");
                cached.insert(
                    "id".to_string(),
                    request.id().cloned().unwrap_or(Value::Null),
                );
                Some(cached)
            }
            Err(err) => {
                error!(key = request.fingerprint(), error = %err, "failed to decode cached entry");
                None
            }
        }
    }

    /// Sends one route's bucket upstream, trying backends in declared
    /// order. An attempt fails over on transport error, non-200 status or
    /// an undecodable body; the first backend with a parseable JSON-RPC
    /// body wins.
    async fn forward(
        &self,
        route: &Route,
        bucket: &[&RpcRequest],
    ) -> Result<Vec<RawObject>, ProxyError> {
        let payload: Vec<&RawObject> = bucket.iter().map(|request| request.raw()).collect();
        let body = Bytes::from(serde_json::to_vec(&payload)?);

        for backend in &route.backends {
            info!(
                backend = backend.name.as_str(),
                url = %backend.url,
                requests = payload.len(),
                "forwarding requests"
            );

            let response = match self
                .client
                .post(backend.url.as_str())
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    error!(url = %backend.url, error = %err, "backend request failed");
                    continue;
                }
            };

            let status = response.status();
            let data = match response.bytes().await {
                Ok(data) => data,
                Err(err) => {
                    error!(url = %backend.url, error = %err, "failed to read backend body");
                    continue;
                }
            };
            debug!(url = %backend.url, status = %status, "received backend response");

            if status != StatusCode::OK {
                error!(url = %backend.url, status = %status, "unexpected backend status");
                continue;
            }

            match codec::decode_responses(&data) {
                Ok(responses) => return Ok(responses),
                Err(err) => {
                    error!(url = %backend.url, error = %err, "failed to decode backend response");
                }
            }
        }

        Err(ProxyError::Forward)
    }

    /// Persists fresh responses off the response path.
    ///
    /// Only responses that carry an id, have no `error` field and whose id
    /// was recorded during classification are candidates. Stored values
    /// have their `id` stripped; ids are client-chosen and must not leak
    /// across clients. Failures here are logged only.
    fn schedule_write_back(&self, fresh: &[RawObject], write_keys: &HashMap<String, String>) {
        if write_keys.is_empty() || !self.cache.is_enabled() {
            return;
        }

        let mut candidates: Vec<(String, RawObject)> = Vec::new();
        for response in fresh {
            let Some(id) = response.get("id") else {
                continue;
            };
            if response.contains_key("error") {
                continue;
            }
            let Ok(id_key) = serde_json::to_string(id) else {
                continue;
            };
            if let Some(key) = write_keys.get(&id_key) {
                candidates.push((key.clone(), response.clone()));
            }
        }

        if candidates.is_empty() {
            return;
        }

        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(candidates.len());
            for (key, mut response) in candidates {
                response.remove("id");
                match serde_json::to_vec(&response) {
                    Ok(data) => batch.push((key, data)),
                    Err(err) => error!(error = %err, "failed to marshal cached response"),
                }
            }
            if let Err(err) = cache.put_many(batch) {
                error!(error = %err, "failed to cache responses");
            }
        });
    }
}
