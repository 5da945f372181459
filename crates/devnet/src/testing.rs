//! In-memory stand-ins for the container runtime and the chains.

use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    sol_types::{SolCall, SolEvent, SolValue},
};
use alloy_eips::eip2718::Decodable2718;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ExecOutput, ProtocolConstants,
    StateVariables,
    contracts::abi,
    rpc::{CallRequest, ChainRpc, Dialer, Log, LogFilter, TxReceipt},
};

#[derive(Default)]
struct ChainState {
    height: u64,
    receipts: HashMap<B256, TxReceipt>,
    /// Receipts that become visible after the given number of lookups.
    delayed: HashMap<B256, u32>,
    sent: Vec<TxEnvelope>,
    pending_nonces: HashMap<Address, u64>,
    state: StateVariables,
    constants: ProtocolConstants,
    logs: Vec<Log>,
    receipt_delay: u32,
    receipt_status: u64,
    propose_revert: Option<String>,
    fail_chain_id: bool,
    fail_block_number: bool,
    fail_sends: bool,
    calls: Vec<Bytes>,
}

/// A chain that mines every submitted transaction into its own block.
pub(crate) struct MockChain {
    chain_id: u64,
    endpoint: String,
    inner: Mutex<ChainState>,
}

pub(crate) fn block_hash_at(number: u64) -> B256 {
    keccak256(number.to_be_bytes())
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            endpoint: format!("mock://{chain_id}"),
            inner: Mutex::new(ChainState {
                receipt_status: TxReceipt::STATUS_SUCCESS,
                ..Default::default()
            }),
        }
    }

    pub fn height(&self) -> u64 {
        self.inner.lock().height
    }

    pub fn advance(&self, blocks: u64) {
        self.inner.lock().height += blocks;
    }

    pub fn sent(&self) -> Vec<TxEnvelope> {
        self.inner.lock().sent.clone()
    }

    pub fn calls(&self) -> Vec<Bytes> {
        self.inner.lock().calls.clone()
    }

    pub fn set_receipt_delay(&self, lookups: u32) {
        self.inner.lock().receipt_delay = lookups;
    }

    pub fn set_receipt_status(&self, status: u64) {
        self.inner.lock().receipt_status = status;
    }

    pub fn set_state(&self, state: StateVariables) {
        self.inner.lock().state = state;
    }

    pub fn set_constants(&self, constants: ProtocolConstants) {
        self.inner.lock().constants = constants;
    }

    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        self.inner.lock().pending_nonces.insert(address, nonce);
    }

    /// Make proposals revert with `reason`.
    pub fn set_propose_revert(&self, reason: &str) {
        self.inner.lock().propose_revert = Some(reason.to_string());
    }

    pub fn fail_chain_id(&self) {
        self.inner.lock().fail_chain_id = true;
    }

    pub fn fail_block_number(&self) {
        self.inner.lock().fail_block_number = true;
    }

    pub fn fail_sends(&self) {
        self.inner.lock().fail_sends = true;
    }

    pub fn emit_block_proven(&self, contract: Address, id: u64, block_hash: B256) {
        let event = abi::IRollup::BlockProven {
            id: U256::from(id),
            parentHash: B256::ZERO,
            blockHash: block_hash,
            prover: Address::ZERO,
            provenAt: 0,
        };
        let data = event.encode_log_data();

        let mut inner = self.inner.lock();
        let block_number = inner.height;
        inner.logs.push(Log {
            address: contract,
            topics: data.topics().to_vec(),
            data: data.data,
            block_number: Some(alloy_core::primitives::U64::from(block_number)),
            transaction_hash: None,
        });
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chain_id(&self) -> anyhow::Result<u64> {
        if self.inner.lock().fail_chain_id {
            anyhow::bail!("connection refused");
        }
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        if self.inner.lock().fail_block_number {
            anyhow::bail!("connection refused");
        }
        Ok(self.height())
    }

    async fn block_hash(&self, number: u64) -> anyhow::Result<Option<B256>> {
        Ok((number <= self.height()).then(|| block_hash_at(number)))
    }

    async fn transaction_receipt(&self, hash: B256) -> anyhow::Result<Option<TxReceipt>> {
        let mut inner = self.inner.lock();
        if let Some(remaining) = inner.delayed.get_mut(&hash) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(inner.receipts.get(&hash).cloned())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<B256> {
        let envelope =
            TxEnvelope::decode_2718(&mut raw.as_ref()).context("Failed to decode transaction")?;
        let hash = *envelope.tx_hash();

        if self.inner.lock().fail_sends {
            anyhow::bail!("connection refused");
        }
        if let Some(reason) = self.inner.lock().propose_revert.clone()
            && envelope.input().starts_with(&abi::IRollup::proposeBlockCall::SELECTOR)
        {
            anyhow::bail!("RPC error: execution reverted: {reason}");
        }

        let mut inner = self.inner.lock();
        inner.height += 1;
        let receipt = TxReceipt::new(hash, inner.height, inner.receipt_status);
        inner.receipts.insert(hash, receipt);
        let delay = inner.receipt_delay;
        inner.delayed.insert(hash, delay);
        inner.sent.push(envelope);

        Ok(hash)
    }

    async fn pending_nonce(&self, address: Address) -> anyhow::Result<u64> {
        Ok(self
            .inner
            .lock()
            .pending_nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, request: &CallRequest) -> anyhow::Result<Bytes> {
        let mut inner = self.inner.lock();
        inner.calls.push(request.data.clone());

        let selector = request.data.get(..4).unwrap_or_default();
        if selector == &abi::IRollup::getStateVariablesCall::SELECTOR[..] {
            let s = inner.state;
            let out = abi::StateVariables {
                genesisHeight: s.genesis_height,
                genesisTimestamp: s.genesis_timestamp,
                nextBlockId: s.next_block_id,
                lastProposedAt: s.last_proposed_at,
                avgBlockTime: 0,
                latestVerifiedHeight: s.latest_verified_height,
                latestVerifiedId: s.latest_verified_id,
                avgProofTime: 0,
            };
            return Ok(out.abi_encode().into());
        }
        if selector == &abi::IRollup::getConfigCall::SELECTOR[..] {
            let c = inner.constants;
            let out = abi::Config {
                chainId: U256::from(c.chain_id),
                maxNumBlocks: U256::from(c.max_num_blocks),
                blockHashHistory: U256::ZERO,
                maxVerificationsPerTx: U256::ZERO,
                commitConfirmations: U256::from(c.commit_confirmations),
                blockMaxGasLimit: U256::from(c.block_max_gas_limit),
                maxTransactionsPerBlock: U256::ZERO,
                maxBytesPerTxList: U256::ZERO,
                minTxGasLimit: U256::ZERO,
            };
            return Ok(out.abi_encode().into());
        }
        if selector == &abi::IRollup::proposeBlockCall::SELECTOR[..]
            && let Some(reason) = &inner.propose_revert
        {
            anyhow::bail!("RPC error: execution reverted: {reason}");
        }

        Ok(Bytes::new())
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> anyhow::Result<u64> {
        Ok(100_000)
    }

    async fn gas_price(&self) -> anyhow::Result<u128> {
        Ok(1_000_000_000)
    }

    async fn logs(&self, filter: &LogFilter) -> anyhow::Result<Vec<Log>> {
        let inner = self.inner.lock();
        let to_block = filter.to_block.unwrap_or(inner.height);
        Ok(inner
            .logs
            .iter()
            .filter(|log| log.address == filter.address)
            .filter(|log| log.topics.first() == Some(&filter.topic0))
            .filter(|log| {
                log.block_number()
                    .is_some_and(|n| n >= filter.from_block && n <= to_block)
            })
            .cloned()
            .collect())
    }
}

/// Dials every endpoint to the same [`MockChain`].
pub(crate) struct MockDialer {
    pub chain: Arc<MockChain>,
    pub dialed: Mutex<Vec<String>>,
}

impl MockDialer {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            dialed: Mutex::new(Vec::new()),
        }
    }
}

impl Dialer for MockDialer {
    fn dial(&self, endpoint: &Url) -> anyhow::Result<Arc<dyn ChainRpc>> {
        self.dialed.lock().push(endpoint.to_string());
        Ok(self.chain.clone())
    }
}

#[derive(Default)]
struct RuntimeState {
    started: Vec<ContainerSpec>,
    handles: BTreeMap<String, ContainerHandle>,
    stopped: Vec<String>,
    /// Ordered record of `start:<name>` and `exec:<name>:<cmd>` operations.
    journal: Vec<String>,
    exec_exit_codes: HashMap<String, i64>,
}

/// A container runtime that only records what it was asked to do.
#[derive(Default)]
pub(crate) struct MockRuntime {
    inner: Mutex<RuntimeState>,
}

impl MockRuntime {
    pub fn started(&self) -> Vec<ContainerSpec> {
        self.inner.lock().started.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.inner.lock().stopped.clone()
    }

    pub fn journal(&self) -> Vec<String> {
        self.inner.lock().journal.clone()
    }

    /// Make `cmd` exit with `code` in every container.
    pub fn set_exec_exit_code(&self, cmd: &str, code: i64) {
        self.inner
            .lock()
            .exec_exit_codes
            .insert(cmd.to_string(), code);
    }

    fn name_of(&self, container_id: &str) -> String {
        self.inner
            .lock()
            .handles
            .get(container_id)
            .map(|h| h.container_name.clone())
            .unwrap_or_else(|| container_id.to_string())
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn start(&self, spec: &ContainerSpec) -> anyhow::Result<ContainerHandle> {
        // Docker does network I/O here; let other launches interleave.
        tokio::task::yield_now().await;
        let mut inner = self.inner.lock();
        let n = inner.started.len() as u8 + 2;
        let handle = ContainerHandle {
            container_id: format!("id-{}", spec.name),
            container_name: spec.name.clone(),
            ip: IpAddr::V4(Ipv4Addr::new(172, 20, 0, n)),
        };
        inner.started.push(spec.clone());
        inner.journal.push(format!("start:{}", spec.name));
        inner
            .handles
            .insert(handle.container_id.clone(), handle.clone());
        Ok(handle)
    }

    async fn exec(&self, container_id: &str, cmd: &[&str]) -> anyhow::Result<ExecOutput> {
        let name = self.name_of(container_id);
        let joined = cmd.join(" ");
        let mut inner = self.inner.lock();
        inner.journal.push(format!("exec:{name}:{joined}"));

        let exit_code = inner.exec_exit_codes.get(&joined).copied().unwrap_or(0);
        let stdout = match cmd.first() {
            Some(&"enode.sh") => {
                let ip = inner
                    .handles
                    .get(container_id)
                    .map(|h| h.ip.to_string())
                    .unwrap_or_default();
                format!("enode://{}@{ip}:30303\n", hex::encode(keccak256(name.as_bytes())))
            }
            _ => format!("{joined} done\n"),
        };

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr: String::new(),
        })
    }

    async fn stop(&self, container_id: &str) -> anyhow::Result<()> {
        let name = self.name_of(container_id);
        let mut inner = self.inner.lock();
        inner.stopped.push(container_id.to_string());
        inner.journal.push(format!("stop:{name}"));
        Ok(())
    }
}
