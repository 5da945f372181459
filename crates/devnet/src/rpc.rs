//! JSON-RPC access to the chains of a devnet.

use std::{sync::Arc, time::Duration};

use alloy_core::{
    primitives::{Address, B256, Bytes, U64, U128},
    sol_types::{Revert, SolError},
};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Revert data attached to an error response is decoded into the error message when the node
/// did not already include the reason.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown");

        match revert_reason(error) {
            Some(reason) if !message.contains(&reason) => {
                anyhow::bail!("RPC error: {}: {}", message, reason)
            }
            _ => anyhow::bail!("RPC error: {}", message),
        }
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

fn revert_reason(error: &Value) -> Option<String> {
    let data = error.get("data")?.as_str()?;
    let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
    Revert::abi_decode(&bytes).ok().map(|revert| revert.reason)
}

/// A transaction receipt, reduced to the fields the devnet inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<U64>,
    pub status: Option<U64>,
}

impl TxReceipt {
    pub const STATUS_FAILED: u64 = 0;
    pub const STATUS_SUCCESS: u64 = 1;

    pub fn new(transaction_hash: B256, block_number: u64, status: u64) -> Self {
        Self {
            transaction_hash,
            block_number: Some(U64::from(block_number)),
            status: Some(U64::from(status)),
        }
    }

    /// Receipt status. Pre-byzantium receipts without status count as failed.
    pub fn status(&self) -> u64 {
        self.status.map(|s| s.to::<u64>()).unwrap_or(Self::STATUS_FAILED)
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }
}

/// A contract log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<U64>,
    pub transaction_hash: Option<B256>,
}

impl Log {
    pub fn block_number(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }
}

/// Log query over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    /// Required first topic (the event signature).
    pub topic0: B256,
    pub from_block: u64,
    /// `None` means the latest block.
    pub to_block: Option<u64>,
}

/// A message call or gas estimation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            data: data.into(),
        }
    }

    pub fn sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

/// The chain RPC surface the devnet consumes.
#[async_trait]
pub trait ChainRpc: Send + Sync + 'static {
    /// The endpoint this client talks to, for diagnostics.
    fn endpoint(&self) -> &str;

    async fn chain_id(&self) -> anyhow::Result<u64>;

    async fn block_number(&self) -> anyhow::Result<u64>;

    /// Hash of the block at `number`, `None` when the block does not exist yet.
    async fn block_hash(&self, number: u64) -> anyhow::Result<Option<B256>>;

    /// `None` while the transaction is not mined.
    async fn transaction_receipt(&self, hash: B256) -> anyhow::Result<Option<TxReceipt>>;

    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<B256>;

    /// Nonce of `address` including pending transactions.
    async fn pending_nonce(&self, address: Address) -> anyhow::Result<u64>;

    async fn call(&self, request: &CallRequest) -> anyhow::Result<Bytes>;

    async fn estimate_gas(&self, request: &CallRequest) -> anyhow::Result<u64>;

    async fn gas_price(&self) -> anyhow::Result<u128>;

    async fn logs(&self, filter: &LogFilter) -> anyhow::Result<Vec<Log>>;
}

/// [`ChainRpc`] over HTTP JSON-RPC.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    url: Url,
}

#[derive(Deserialize)]
struct BlockHeader {
    hash: B256,
}

impl RpcClient {
    pub fn new(url: Url) -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client()?,
            url,
        })
    }

    async fn call_rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }
}

fn quantity(n: u64) -> String {
    format!("{n:#x}")
}

#[async_trait]
impl ChainRpc for RpcClient {
    fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    async fn chain_id(&self) -> anyhow::Result<u64> {
        let id: U64 = self.call_rpc("eth_chainId", vec![]).await?;
        Ok(id.to())
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        let number: U64 = self.call_rpc("eth_blockNumber", vec![]).await?;
        Ok(number.to())
    }

    async fn block_hash(&self, number: u64) -> anyhow::Result<Option<B256>> {
        let header: Option<BlockHeader> = self
            .call_rpc(
                "eth_getBlockByNumber",
                vec![json!(quantity(number)), json!(false)],
            )
            .await?;
        Ok(header.map(|h| h.hash))
    }

    async fn transaction_receipt(&self, hash: B256) -> anyhow::Result<Option<TxReceipt>> {
        self.call_rpc("eth_getTransactionReceipt", vec![json!(hash)])
            .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<B256> {
        self.call_rpc("eth_sendRawTransaction", vec![json!(raw)])
            .await
    }

    async fn pending_nonce(&self, address: Address) -> anyhow::Result<u64> {
        let nonce: U64 = self
            .call_rpc(
                "eth_getTransactionCount",
                vec![json!(address), json!("pending")],
            )
            .await?;
        Ok(nonce.to())
    }

    async fn call(&self, request: &CallRequest) -> anyhow::Result<Bytes> {
        self.call_rpc("eth_call", vec![json!(request), json!("latest")])
            .await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> anyhow::Result<u64> {
        let gas: U64 = self
            .call_rpc("eth_estimateGas", vec![json!(request)])
            .await?;
        Ok(gas.to())
    }

    async fn gas_price(&self) -> anyhow::Result<u128> {
        let price: U128 = self.call_rpc("eth_gasPrice", vec![]).await?;
        Ok(price.to())
    }

    async fn logs(&self, filter: &LogFilter) -> anyhow::Result<Vec<Log>> {
        let to_block = filter
            .to_block
            .map(quantity)
            .unwrap_or_else(|| "latest".to_string());

        self.call_rpc(
            "eth_getLogs",
            vec![json!({
                "address": filter.address,
                "topics": [filter.topic0],
                "fromBlock": quantity(filter.from_block),
                "toBlock": to_block,
            })],
        )
        .await
    }
}

/// Turns an endpoint into a chain client.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self, endpoint: &Url) -> anyhow::Result<Arc<dyn ChainRpc>>;
}

/// Dials [`RpcClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDialer;

impl Dialer for HttpDialer {
    fn dial(&self, endpoint: &Url) -> anyhow::Result<Arc<dyn ChainRpc>> {
        match endpoint.scheme() {
            "http" | "https" => Ok(Arc::new(RpcClient::new(endpoint.clone())?)),
            scheme => anyhow::bail!("Unsupported RPC scheme '{scheme}' for {endpoint}"),
        }
    }
}
