//! Chain client and balance poller
//!
//! Read-only JSON-RPC access to the agent's chain account. Balance reads
//! are informational: no payment path depends on them, and failures here
//! are logged, never surfaced to payment processing.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;

const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Seconds between informational balance log lines.
const POLL_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("malformed rpc response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u32,
    method: &'static str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
}

/// Minimal JSON-RPC client for balance reads.
#[derive(Clone)]
pub struct ChainClient {
    client: reqwest::Client,
    rpc_url: String,
}

impl ChainClient {
    pub fn new(rpc_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            rpc_url,
        }
    }

    /// Native balance of `address` in wei.
    pub async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_getBalance",
            params: json!([address.to_string(), "latest"]),
        };

        let response: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(ChainError::Rpc(err.message));
        }
        let hex = response
            .result
            .ok_or_else(|| ChainError::InvalidResponse("missing result".to_string()))?;

        U256::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }
}

/// Wei to whole-token display value. Logging only, precision loss is fine.
pub fn format_native(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(f64::MAX) / 1e18
}

/// Periodic informational log of the agent's native balance.
///
/// Independent of payment processing: it never takes the state lock and a
/// failed read only produces a log line.
pub struct BalancePoller {
    handle: Option<JoinHandle<()>>,
}

impl BalancePoller {
    pub fn new() -> Self {
        Self { handle: None }
    }

    pub fn start(&mut self, client: ChainClient, address: Address) {
        if self.handle.is_some() {
            return;
        }
        self.handle = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(POLL_INTERVAL_SECS));
            // The first tick fires immediately; skip it, startup already logged.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match client.get_balance(address).await {
                    Ok(balance) if balance > U256::ZERO => {
                        tracing::info!(
                            balance_mon = format_native(balance),
                            "agent listening"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "balance poll failed");
                    }
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::info!("balance poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for BalancePoller {
    fn drop(&mut self) {
        self.stop();
    }
}
