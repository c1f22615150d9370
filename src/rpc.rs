//! JSON-RPC 2.0 transport to the chain node.
//!
//! One client carries two endpoints: the read endpoint for everything, and an
//! optional broadcast endpoint that `eth_sendRawTransaction` is routed to so
//! transaction submission can go through a dedicated node.

use crate::error::{Result, RpcError};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

const RPC_HTTP_TIMEOUT_MS: u64 = 10_000;
const RPC_ERR_MAX_LEN: usize = 260;
const RETRY_BASE_MS: u64 = 100;
const RETRY_CAP_MS: u64 = 1_800;

#[derive(Debug, Clone)]
pub struct RpcClient {
    base_url: String,
    broadcast_url: Option<String>,
    http: reqwest::Client,
    retries: usize,
}

impl RpcClient {
    pub fn new(base_url: &str, broadcast_url: Option<&str>) -> Result<Self> {
        let parsed = base_url
            .parse::<reqwest::Url>()
            .map_err(|err| RpcError::InvalidUrl {
                url: base_url.to_string(),
                reason: err.to_string(),
            })?;
        if let Some(url) = broadcast_url {
            url.parse::<reqwest::Url>()
                .map_err(|err| RpcError::InvalidUrl {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(RPC_HTTP_TIMEOUT_MS))
            .build()
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Ok(Self {
            base_url: parsed.to_string(),
            broadcast_url: broadcast_url.map(|u| u.to_string()),
            http,
            retries: 3,
        })
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Issue one JSON-RPC call and return the `result` field.
    ///
    /// `eth_sendRawTransaction` goes to the broadcast endpoint when one is
    /// configured; broadcasts are never retried (a timed-out send may still
    /// have landed).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if method == "eth_sendRawTransaction" {
            if let Some(url) = &self.broadcast_url {
                return self.call_once(url, method, &params).await;
            }
            return self.call_once(&self.base_url, method, &params).await;
        }

        let mut last_err = RpcError::Transport("no attempt made".to_string());
        for attempt in 1..=self.retries {
            match self.call_once(&self.base_url, method, &params).await {
                Ok(value) => return Ok(value),
                Err(crate::error::WalletError::Rpc(rpc_err)) => {
                    let retryable = is_retryable(&rpc_err);
                    tracing::debug!(
                        method,
                        attempt,
                        retries = self.retries,
                        retryable,
                        error = %rpc_err,
                        "rpc call failed"
                    );
                    last_err = rpc_err;
                    if !retryable || attempt == self.retries {
                        return Err(last_err.into());
                    }
                }
                Err(other) => return Err(other),
            }
            sleep(Duration::from_millis(retry_backoff_ms(attempt))).await;
        }
        Err(last_err.into())
    }

    async fn call_once(&self, url: &str, method: &str, params: &Value) -> Result<Value> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| RpcError::Transport(compact_error_message(&err.to_string())))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| RpcError::Transport(compact_error_message(&err.to_string())))?;

        if !status.is_success() {
            return Err(RpcError::Transport(format!(
                "HTTP {}: {}",
                status,
                compact_error_message(&body)
            ))
            .into());
        }

        parse_rpc_result(&body).map_err(Into::into)
    }
}

/// Extract the `result` of a JSON-RPC response body, surfacing the node's
/// error object as a typed error.
pub fn parse_rpc_result(body: &str) -> std::result::Result<Value, RpcError> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|err| RpcError::Decode(format!("{err}: {}", compact_error_message(body))))?;

    if let Some(err_obj) = parsed.get("error") {
        if err_obj.is_object() {
            let code = err_obj.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err_obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown JSON-RPC error")
                .to_string();
            return Err(RpcError::Node { code, message });
        }
    }

    match parsed.get("result") {
        None | Some(Value::Null) => Err(RpcError::EmptyResponse),
        Some(result) => Ok(result.clone()),
    }
}

/// Whether a failed call is worth re-issuing.
///
/// Transport faults retry. A null result, an unparseable body or a bad URL
/// will not improve on resend. Node errors are judged by their JSON-RPC
/// code, then by the chain's verdict for the generic server-error band.
fn is_retryable(err: &RpcError) -> bool {
    match err {
        RpcError::Transport(_) => true,
        RpcError::InvalidUrl { .. } | RpcError::EmptyResponse | RpcError::Decode(_) => false,
        RpcError::Node { code, message } => is_retryable_node_error(*code, message),
    }
}

fn is_retryable_node_error(code: i64, message: &str) -> bool {
    // Request-shape rejections: parse error, invalid request, unknown
    // method, invalid params. The call is wrong, not the connection.
    if matches!(code, -32700 | -32600 | -32601 | -32602) {
        return false;
    }
    // Quorum/geth report chain-level verdicts under the generic server
    // codes; those are answers, not failures.
    let msg = message.to_ascii_lowercase();
    let chain_verdicts = [
        "execution reverted",
        "nonce too low",
        "already known",
        "known transaction",
        "insufficient funds",
        "replacement transaction underpriced",
        "gas required exceeds allowance",
    ];
    !chain_verdicts.iter().any(|verdict| msg.contains(verdict))
}

fn retry_backoff_ms(attempt: usize) -> u64 {
    let clamped = attempt.min(8) as u32;
    RETRY_BASE_MS
        .saturating_mul(1u64 << clamped)
        .min(RETRY_CAP_MS)
}

fn compact_error_message(message: &str) -> String {
    let mut compact: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(RPC_ERR_MAX_LEN)
        .collect();
    if message.chars().count() > RPC_ERR_MAX_LEN {
        compact.push_str("...");
    }
    compact
}
