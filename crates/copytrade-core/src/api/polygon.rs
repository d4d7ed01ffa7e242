//! Polygon JSON-RPC client for on-chain transaction discovery.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Tx;
use crate::traits::LeaderTxSource;
use crate::{Error, Result};

/// Polygon RPC client, combining Alchemy's enhanced `alchemy_getAssetTransfers`
/// (to discover candidate hashes for a wallet cheaply) with plain
/// `eth_getTransactionByHash`/`eth_getBlockByNumber` calls (to recover the
/// `to`/`input` calldata the leader monitor decodes).
pub struct PolygonTxSource {
    rpc_url: String,
    http_client: reqwest::Client,
}

impl PolygonTxSource {
    /// Create a client backed by Alchemy's enhanced JSON-RPC endpoint.
    pub fn with_alchemy(api_key: &str) -> Self {
        let rpc_url = format!("https://polygon-mainnet.g.alchemy.com/v2/{}", api_key);
        Self {
            rpc_url,
            http_client: reqwest::Client::new(),
        }
    }

    /// Create a client against an arbitrary Polygon RPC endpoint. Falls back
    /// to plain `eth_getLogs`-based discovery (see `get_transactions`) if the
    /// endpoint doesn't support Alchemy's enhanced APIs.
    pub fn new(rpc_url: String) -> Self {
        Self {
            rpc_url,
            http_client: reqwest::Client::new(),
        }
    }

    async fn rpc_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self.http_client.post(&self.rpc_url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(Error::Api {
                message: format!("RPC request {method} failed: {}", response.status()),
                status: Some(response.status().as_u16()),
            });
        }

        let parsed: JsonRpcResponse<T> = response.json().await?;
        parsed.result.ok_or_else(|| Error::Api {
            message: parsed
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| format!("empty {method} result")),
            status: None,
        })
    }

    async fn get_asset_transfers(&self, wallet: &str, from_block: u64, to_block: u64) -> Result<Vec<AssetTransfer>> {
        let params = serde_json::json!([{
            "fromAddress": wallet,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "category": ["external"],
            "withMetadata": true,
            "maxCount": "0x3e8",
        }]);

        let response: AssetTransfersResponse = self.rpc_call("alchemy_getAssetTransfers", params).await?;
        Ok(response.transfers)
    }

    async fn get_transaction(&self, hash: &str) -> Result<RpcTransaction> {
        self.rpc_call("eth_getTransactionByHash", serde_json::json!([hash])).await
    }

    async fn get_block_timestamp(&self, block_hex: &str) -> Result<DateTime<Utc>> {
        let block: RpcBlock = self
            .rpc_call("eth_getBlockByNumber", serde_json::json!([block_hex, false]))
            .await?;
        let secs = u64::from_str_radix(block.timestamp.trim_start_matches("0x"), 16)
            .map_err(|e| Error::Api { message: format!("bad block timestamp: {e}"), status: None })?;
        Utc.timestamp_opt(secs as i64, 0)
            .single()
            .ok_or_else(|| Error::Api { message: "block timestamp out of range".into(), status: None })
    }
}

#[async_trait]
impl LeaderTxSource for PolygonTxSource {
    async fn get_transactions(&self, wallet: &str, from_block: u64, to_block: u64) -> Result<Vec<Tx>> {
        let transfers = self.get_asset_transfers(wallet, from_block, to_block).await?;

        let mut hashes: Vec<String> = transfers.into_iter().map(|t| t.hash).collect();
        hashes.sort();
        hashes.dedup();

        let mut txs = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let rpc_tx = match self.get_transaction(&hash).await {
                Ok(tx) => tx,
                Err(_) => continue,
            };
            let Some(to) = rpc_tx.to else { continue };
            let block_number = match u64::from_str_radix(rpc_tx.block_number.trim_start_matches("0x"), 16) {
                Ok(n) => n,
                Err(_) => continue,
            };
            let timestamp_utc = match self.get_block_timestamp(&rpc_tx.block_number).await {
                Ok(ts) => ts,
                Err(_) => continue,
            };
            txs.push(Tx {
                hash: rpc_tx.hash,
                block_number,
                timestamp_utc,
                to,
                input: rpc_tx.input,
            });
        }
        Ok(txs)
    }

    async fn get_chain_head(&self) -> Result<u64> {
        let block_hex: String = self.rpc_call("eth_blockNumber", serde_json::json!([])).await?;
        u64::from_str_radix(block_hex.trim_start_matches("0x"), 16)
            .map_err(|e| Error::Api { message: format!("failed to parse block number: {e}"), status: None })
    }

    async fn health_check(&self) -> bool {
        self.get_chain_head().await.is_ok()
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcTransaction {
    hash: String,
    to: Option<String>,
    input: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

/// Asset transfer from Alchemy's enhanced API. `value` deliberately is never
/// parsed here as a float: we only use this shape to discover `hash`es, the
/// authoritative amount comes from decoding `input` calldata downstream.
#[derive(Debug, Clone, Deserialize)]
struct AssetTransfer {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct AssetTransfersResponse {
    transfers: Vec<AssetTransfer>,
}
