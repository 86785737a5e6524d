use super::digest::Digest;
use super::evidence_chain::IntegrityError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnchorError {
    #[error("anchoring service unreachable: {0}")]
    Network(String),
    #[error("anchoring service rejected the request: {0}")]
    Provider(String),
    #[error("anchor receipt could not be logged: {0}")]
    Ledger(String),
    #[error("refusing to anchor: {0}")]
    Integrity(#[from] IntegrityError),
}

/// Reference to the transaction that durably timestamps one batch hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTxRef {
    pub network: String,
    pub chain: String,
    pub tx_id: String,
    pub confirmed: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Terminal evidence entry written after a batch was anchored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// First entry index of the batch.
    pub batch_start: usize,
    /// One past the last entry index of the batch.
    pub batch_end: usize,
    pub batch_root: Digest,
    pub tx: ChainTxRef,
}

/// External ledger that timestamps evidence batch hashes.
#[async_trait]
pub trait AnchorProvider: Send + Sync {
    async fn anchor(&self, batch_hash: &Digest) -> Result<ChainTxRef, AnchorError>;

    async fn confirm(&self, tx: &ChainTxRef) -> Result<ChainTxRef, AnchorError>;
}

/// In-process backend that accepts every batch and confirms immediately.
#[derive(Debug, Default)]
pub struct LocalAnchor {
    anchored: Mutex<Vec<Digest>>,
}

impl LocalAnchor {
    pub fn new() -> Self { Self::default() }

    /// Batch hashes anchored so far.
    pub fn anchored(&self) -> Vec<Digest> {
        self.anchored.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock").clone()
    }
}

#[async_trait]
impl AnchorProvider for LocalAnchor {
    async fn anchor(&self, batch_hash: &Digest) -> Result<ChainTxRef, AnchorError> {
        self.anchored.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock").push(*batch_hash);
        Ok(ChainTxRef {
            network: "local".to_string(),
            chain: "memory".to_string(),
            tx_id: format!("local:{}", batch_hash.to_hex()),
            confirmed: false,
            timestamp: Some(Utc::now()),
        })
    }

    async fn confirm(&self, tx: &ChainTxRef) -> Result<ChainTxRef, AnchorError> {
        Ok(ChainTxRef { confirmed: true, ..tx.clone() })
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    err: Option<Value>,
    confirmation_status: Option<String>,
}

/// Solana-style fast-finality backend.
///
/// The batch hash is submitted as a memo through the gateway's `sendMemo` method;
/// confirmation is polled with the standard `getSignatureStatuses` call.
#[derive(Debug)]
pub struct SolanaRpcAnchor {
    client: reqwest::Client,
    endpoint: String,
    network: String,
}

impl SolanaRpcAnchor {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    const MEMO_PREFIX: &'static str = "tbus-evidence:";

    /// # Errors
    /// - [`AnchorError::Network`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str, network: &str) -> Result<Self, AnchorError> {
        let client = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AnchorError::Network(e.to_string()))?;
        Ok(Self { client, endpoint: endpoint.to_string(), network: network.to_string() })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, AnchorError> {
        let request = RpcRequest { jsonrpc: "2.0", id: 1, method, params };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnchorError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AnchorError::Network(format!("HTTP {}", response.status())));
        }
        let parsed: RpcResponse = response.json().await.map_err(|e| AnchorError::Provider(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(AnchorError::Provider(format!("RPC error {}: {}", err.code, err.message)));
        }
        parsed.result.ok_or_else(|| AnchorError::Provider("response without result".to_string()))
    }
}

#[async_trait]
impl AnchorProvider for SolanaRpcAnchor {
    async fn anchor(&self, batch_hash: &Digest) -> Result<ChainTxRef, AnchorError> {
        let memo = format!("{}{}", Self::MEMO_PREFIX, batch_hash.to_hex());
        let result = self.rpc_call("sendMemo", json!([memo])).await?;
        let tx_id = result
            .as_str()
            .ok_or_else(|| AnchorError::Provider("memo signature is not a string".to_string()))?;
        Ok(ChainTxRef {
            network: "solana".to_string(),
            chain: self.network.clone(),
            tx_id: tx_id.to_string(),
            confirmed: false,
            timestamp: Some(Utc::now()),
        })
    }

    async fn confirm(&self, tx: &ChainTxRef) -> Result<ChainTxRef, AnchorError> {
        let result = self
            .rpc_call("getSignatureStatuses", json!([[tx.tx_id], {"searchTransactionHistory": true}]))
            .await?;
        let status = result
            .get("value")
            .and_then(Value::as_array)
            .and_then(|statuses| statuses.first())
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value::<SignatureStatus>(v.clone()))
            .transpose()
            .map_err(|e| AnchorError::Provider(e.to_string()))?;
        let confirmed = status.is_some_and(|s| {
            s.err.is_none() && matches!(s.confirmation_status.as_deref(), Some("confirmed" | "finalized"))
        });
        Ok(ChainTxRef { confirmed, timestamp: Some(Utc::now()), ..tx.clone() })
    }
}
