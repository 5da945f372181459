//! Per-chain account factory and funding.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_core::primitives::{Address, B256, TxKind, U256, address};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;
use parking_lot::RwLock;

use crate::{Account, Ctx, rpc::ChainRpc, rpc::TxReceipt};

/// Pre-funded account every devnet chain seeds in genesis.
pub const VAULT_SOURCE_ADDRESS: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

pub(crate) const VAULT_SOURCE_PRIVATE_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

const GWEI: u128 = 1_000_000_000;

const FUNDING_GAS_LIMIT: u64 = 75_000;
const FUNDING_PRIORITY_FEE: u128 = GWEI;
const FUNDING_MAX_FEE: u128 = 30 * GWEI;

/// Value of the transfers produced by [`Vault::test_tx`].
const TEST_TX_VALUE: u128 = GWEI;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RECEIPT_POLL_ATTEMPTS: u32 = 60;

/// Creates test accounts on one chain and funds them from [`VAULT_SOURCE_ADDRESS`].
///
/// Funding transactions use a local nonce counter, so a vault must be the only sender from the
/// source account on its chain.
#[derive(Debug)]
pub struct Vault {
    chain_id: u64,
    source: PrivateKeySigner,
    nonce: AtomicU64,
    accounts: RwLock<HashMap<Address, PrivateKeySigner>>,
}

impl Vault {
    pub fn new(chain_id: u64) -> anyhow::Result<Self> {
        let source = Account::from_hex(VAULT_SOURCE_PRIVATE_KEY)
            .context("Invalid vault source key")?
            .signer()
            .clone();

        Ok(Self {
            chain_id,
            source,
            nonce: AtomicU64::new(0),
            accounts: RwLock::new(HashMap::new()),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The nonce the next funding transaction will use.
    pub fn nonce(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }

    /// Allocate the next funding nonce.
    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }

    /// Generate a key and remember it. Nothing is sent to the chain.
    pub fn generate_account(&self) -> Address {
        let signer = PrivateKeySigner::random();
        let address = signer.address();
        self.accounts.write().insert(address, signer);
        address
    }

    /// Register a key created elsewhere so that [`Vault::sign`] can use it.
    pub fn insert_key(&self, signer: PrivateKeySigner) -> Address {
        let address = signer.address();
        self.accounts.write().insert(address, signer);
        address
    }

    pub fn find_key(&self, address: Address) -> Option<PrivateKeySigner> {
        self.accounts.read().get(&address).cloned()
    }

    /// Sign `tx` for this vault's chain with the key stored for `sender`.
    pub fn sign(&self, sender: Address, mut tx: TxEip1559) -> anyhow::Result<TxEnvelope> {
        let Some(signer) = self.find_key(sender) else {
            anyhow::bail!("unknown account {sender}");
        };
        tx.chain_id = self.chain_id;
        sign_with(&signer, tx)
    }

    fn funding_tx(&self, to: Address, amount: U256) -> anyhow::Result<TxEnvelope> {
        let tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce: self.next_nonce(),
            gas_limit: FUNDING_GAS_LIMIT,
            max_fee_per_gas: FUNDING_MAX_FEE,
            max_priority_fee_per_gas: FUNDING_PRIORITY_FEE,
            to: TxKind::Call(to),
            value: amount,
            access_list: Default::default(),
            input: Default::default(),
        };
        sign_with(&self.source, tx).context("Failed to sign vault funding transaction")
    }

    /// Send `amount` from the vault source to `to` and wait for the receipt.
    pub async fn fund(
        &self,
        ctx: &Ctx,
        rpc: &dyn ChainRpc,
        to: Address,
        amount: U256,
    ) -> anyhow::Result<TxReceipt> {
        let tx = self.funding_tx(to, amount)?;
        let hash = *tx.tx_hash();

        ctx.run(rpc.send_raw_transaction(tx.encoded_2718().into()))
            .await
            .with_context(|| format!("Unable to send funding transaction to {to}"))?;

        tracing::debug!(%to, %amount, tx = %hash, chain_id = self.chain_id, "Funding transaction sent");

        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt = ctx
                .run(rpc.transaction_receipt(hash))
                .await
                .with_context(|| format!("Error getting receipt of funding transaction {hash}"))?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            ctx.sleep(RECEIPT_POLL_INTERVAL).await?;
        }

        anyhow::bail!(
            "Timeout getting receipt of funding transaction {hash} after {RECEIPT_POLL_ATTEMPTS} attempts"
        )
    }

    /// Generate an account and fund it with `amount`.
    pub async fn create_account(
        &self,
        ctx: &Ctx,
        rpc: &dyn ChainRpc,
        amount: U256,
    ) -> anyhow::Result<Address> {
        let address = self.generate_account();
        self.fund(ctx, rpc, address, amount).await?;
        Ok(address)
    }

    /// A signed transfer from the vault source to a fresh account, not yet submitted.
    pub fn test_tx(&self) -> anyhow::Result<TxEnvelope> {
        let to = self.generate_account();
        self.funding_tx(to, U256::from(TEST_TX_VALUE))
    }

    /// Submit a [`Vault::test_tx`] without waiting for inclusion.
    pub async fn send_test_tx(&self, ctx: &Ctx, rpc: &dyn ChainRpc) -> anyhow::Result<B256> {
        let tx = self.test_tx()?;
        ctx.run(rpc.send_raw_transaction(tx.encoded_2718().into()))
            .await
            .context("Unable to send test transaction")
    }
}

pub(crate) fn sign_with(signer: &PrivateKeySigner, tx: TxEip1559) -> anyhow::Result<TxEnvelope> {
    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .context("Failed to sign transaction")?;
    Ok(tx.into_signed(signature).into())
}
