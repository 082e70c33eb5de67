//! JSON-RPC envelope codec, request fingerprinting and cacheability.
//!
//! Incoming payloads are kept as raw JSON mappings so that unknown fields
//! survive forwarding untouched. Numbers are carried as their lexical
//! tokens (`serde_json` arbitrary precision), so ids and numeric params
//! beyond 53-bit range round-trip without loss.

use serde_json::{Map, Value};

/// A raw JSON-RPC object as received on the wire.
pub type RawObject = Map<String, Value>;

/// Synthetic body returned when a dispatch produced no responses at all.
pub const NO_RESPONSE_ERROR: &str = "No response from backend";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// Top-level value was neither an object nor an array.
    #[error("unsupported payload type: {0}")]
    UnsupportedPayload(&'static str),
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One decoded JSON-RPC call.
///
/// Holds the raw mapping for verbatim forwarding, the lower-cased method
/// name and the fingerprint used as routing subject and cache key.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    raw: RawObject,
    method: String,
    fingerprint: String,
}

impl RpcRequest {
    pub fn new(raw: RawObject) -> Self {
        let method = raw
            .get("method")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string();

        let mut fingerprint = String::with_capacity(method.len() + 16);
        fingerprint.push_str(&method);
        fingerprint.push('(');
        canonical(raw.get("params").unwrap_or(&Value::Null), &mut fingerprint);
        fingerprint.push(')');

        Self {
            raw,
            method: method.to_lowercase(),
            fingerprint: fingerprint.to_lowercase(),
        }
    }

    pub fn raw(&self) -> &RawObject {
        &self.raw
    }

    /// Lower-cased method name; empty when the field is absent or not a string.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Canonical `method(params)` form, used as route subject and cache key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Client-chosen request id, if any.
    pub fn id(&self) -> Option<&Value> {
        self.raw.get("id")
    }

    /// Whether the result of this call is a pure function of its params.
    ///
    /// Every method is cacheable except `eth_getBlockByNumber`, which is
    /// cacheable only for a concrete `0x`-prefixed block number. Symbolic
    /// tags (`latest`, `pending`, ...) change meaning over time and must
    /// always reach an upstream.
    pub fn cacheable(&self) -> bool {
        match self.method.as_str() {
            "eth_getblockbynumber" => match self.raw.get("params") {
                Some(Value::Array(params)) if params.len() == 2 => {
                    matches!(params.first(), Some(Value::String(s)) if s.starts_with("0x"))
                }
                _ => false,
            },
            _ => true,
        }
    }
}

/// Renders a params value in canonical form.
///
/// Object keys are emitted in ascending lexical order so that two
/// semantically equal params yield identical fingerprints regardless of
/// input key order. Numbers are emitted as their lexical tokens, strings
/// without quoting, `null` as `null`.
fn canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(string) => out.push_str(string),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(' ');
                }
                canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("map[");
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(' ');
                }
                out.push_str(key);
                out.push(':');
                canonical(&map[key.as_str()], out);
            }
            out.push(']');
        }
    }
}

/// Decodes a client payload into requests, reporting whether it was a batch.
///
/// A top-level object is a single request; a top-level array is a batch.
/// Array elements that are not objects are silently dropped. Anything else
/// fails decoding.
pub fn decode_requests(data: &[u8]) -> Result<(Vec<RpcRequest>, bool), DecodeError> {
    match serde_json::from_slice::<Value>(data)? {
        Value::Array(items) => {
            let requests = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(raw) => Some(RpcRequest::new(raw)),
                    _ => None,
                })
                .collect();
            Ok((requests, true))
        }
        Value::Object(raw) => Ok((vec![RpcRequest::new(raw)], false)),
        other => Err(DecodeError::UnsupportedPayload(json_type_name(&other))),
    }
}

/// Decodes a backend body into response mappings.
///
/// Accepts a single object or an array of objects; non-object array
/// elements are dropped.
pub fn decode_responses(data: &[u8]) -> Result<Vec<RawObject>, DecodeError> {
    match serde_json::from_slice::<Value>(data)? {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(raw) => Some(raw),
                _ => None,
            })
            .collect()),
        Value::Object(raw) => Ok(vec![raw]),
        other => Err(DecodeError::UnsupportedPayload(json_type_name(&other))),
    }
}

/// Encodes merged responses back into a client body.
///
/// Batch inputs are always answered with an array, even when empty or of
/// length one. A single request is answered with the first response as a
/// bare object, or a synthetic error object when nothing was produced.
pub fn encode_responses(
    responses: &[RawObject],
    batch: bool,
) -> Result<Vec<u8>, serde_json::Error> {
    if batch {
        return serde_json::to_vec(responses);
    }

    match responses.first() {
        Some(first) => serde_json::to_vec(first),
        None => {
            let mut synthetic = RawObject::new();
            synthetic.insert("error".to_string(), Value::String(NO_RESPONSE_ERROR.to_string()));
            serde_json::to_vec(&synthetic)
        }
    }
}
