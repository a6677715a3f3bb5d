use crate::error::{AaError, RpcError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC 2.0 over HTTP.
///
/// Cloning is cheap; clones share the connection pool and the request id
/// counter.
#[derive(Debug, Clone)]
pub struct JsonRpcTransport {
    url: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcTransport {
    pub fn new(url: impl Into<String>) -> crate::error::Result<Self> {
        Self::with_headers(url, &[])
    }

    /// Every request carries `headers`, e.g. `("Authorization", "Bearer <jwt>")`.
    pub fn with_headers(
        url: impl Into<String>,
        headers: &[(String, String)],
    ) -> crate::error::Result<Self> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AaError::InvalidArgument(format!("header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AaError::InvalidArgument(format!("header value for {name}: {e}")))?;
            map.insert(name, value);
        }
        let http = reqwest::Client::builder()
            .default_headers(map)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(RpcError::from)?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Sends one request and returns the raw `result` value (possibly `null`).
    pub async fn rpc(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::debug!(method, id, "rpc request");

        let resp = self.http.post(&self.url).json(&req).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        let body = match serde_json::from_str::<Value>(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(RpcError::Http {
                    status: status.as_u16(),
                    body: text,
                })
            }
            Err(e) => return Err(RpcError::UnexpectedResponse(format!("invalid JSON: {e}"))),
        };
        classify_response(status.as_u16(), body)
    }

    /// Like [`Self::rpc`], decoding `result` into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let result = self.rpc(method, params).await?;
        serde_json::from_value(result.clone())
            .map_err(|e| RpcError::UnexpectedResponse(format!("{method}: {e}: {result}")))
    }
}

/// Splits a decoded response into its `result` or a classified error. A
/// JSON-RPC `error` object wins over the HTTP status, since some bundlers
/// answer execution errors with 4xx/5xx.
pub(crate) fn classify_response(status: u16, body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let data = err.get("data").and_then(|d| match d {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        });
        return Err(RpcError::Execution {
            code,
            message,
            data,
        });
    }

    if !(200..300).contains(&status) {
        return Err(RpcError::Http {
            status,
            body: body.to_string(),
        });
    }

    body.get("result")
        .cloned()
        .ok_or_else(|| RpcError::UnexpectedResponse(format!("missing result field: {body}")))
}

#[cfg(test)]
mod tests {
    use super::classify_response;
    use crate::error::RpcError;
    use serde_json::json;

    #[test]
    fn result_is_returned_even_when_null() {
        let out = classify_response(200, json!({ "jsonrpc": "2.0", "id": 1, "result": null }));
        assert_eq!(out.unwrap(), json!(null));
    }

    #[test]
    fn error_object_becomes_execution_error_with_revert_data() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 3, "message": "execution reverted", "data": "0x6ca7b806" }
        });
        let err = classify_response(200, body).unwrap_err();
        assert!(matches!(err, RpcError::Execution { code: 3, .. }));
        assert_eq!(err.revert_data(), Some("0x6ca7b806"));
    }

    #[test]
    fn error_object_wins_over_http_status() {
        let body = json!({ "error": { "code": -32602, "message": "invalid params" } });
        let err = classify_response(400, body).unwrap_err();
        assert!(matches!(err, RpcError::Execution { code: -32602, .. }));
        assert_eq!(err.revert_data(), None);
    }

    #[test]
    fn http_failure_without_error_object() {
        let err = classify_response(502, json!({ "message": "bad gateway" })).unwrap_err();
        assert!(matches!(err, RpcError::Http { status: 502, .. }));
    }

    #[test]
    fn missing_result_is_unexpected() {
        let err = classify_response(200, json!({ "jsonrpc": "2.0", "id": 1 })).unwrap_err();
        assert!(matches!(err, RpcError::UnexpectedResponse(_)));
    }
}
