use crate::core::error::ClientError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: Value,
    /// `Some(Value::Null)` for an explicit `"result": null`
    pub result: Option<Value>,
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Decode a raw reply body into an envelope
    pub fn from_value(value: Value) -> Result<Self, ClientError> {
        let Value::Object(mut object) = value else {
            return Err(ClientError::Validation(
                "Malformed JSON-RPC response: not an object".to_string(),
            ));
        };

        let error = match object.remove("error") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<JsonRpcErrorObject>(raw)
                    .map_err(|e| ClientError::Validation(format!("Malformed JSON-RPC error: {}", e)))?,
            ),
        };

        Ok(Self {
            id: object.remove("id").unwrap_or(Value::Null),
            result: object.remove("result"),
            error,
        })
    }

    /// The `result` member, or the `error` member as a protocol fault
    pub fn into_result(self) -> Result<Value, ClientError> {
        if let Some(error) = self.error {
            return Err(ClientError::Fault {
                code: error.code,
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| ClientError::Validation("JSON-RPC response has neither result nor error".to_string()))
    }
}

/// Builds envelopes with monotonically increasing ids
#[derive(Debug)]
pub struct JsonRpcEnvelope {
    prefix: String,
    next_id: AtomicU64,
    secret: Option<String>,
}

impl JsonRpcEnvelope {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next_id: AtomicU64::new(1),
            secret: None,
        }
    }

    /// Prepend `token:<secret>` to every call's params
    pub fn with_secret(mut self, secret: Option<&str>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty()).map(String::from);
        self
    }

    pub fn request(&self, method: &str, params: Vec<Value>) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut all = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all.push(Value::String(format!("token:{}", secret)));
        }
        all.extend(params);

        JsonRpcRequest {
            jsonrpc: "2.0",
            id: format!("{}-{}", self.prefix, id),
            method: method.to_string(),
            params: all,
        }
    }
}
