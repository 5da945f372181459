use alloy_core::primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;

use crate::DevnetConfig;

/// A keyed account: address plus the signer holding its private key.
#[derive(Debug, Clone)]
pub struct Account {
    pub address: Address,
    signer: PrivateKeySigner,
}

impl Account {
    /// Parse a hex-encoded private key, with or without the `0x` prefix.
    pub fn from_hex(private_key: &str) -> anyhow::Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("Invalid private key")?;
        Ok(Self::from_signer(signer))
    }

    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        Self {
            address: signer.address(),
            signer,
        }
    }

    pub fn random() -> Self {
        Self::from_signer(PrivateKeySigner::random())
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// The private key as lowercase hex without prefix, the format node images expect.
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signer.to_bytes())
    }
}

/// The well-known accounts a devnet is wired with.
#[derive(Debug, Clone)]
pub struct Accounts {
    /// Deploys the settlement contracts and whitelists provers.
    pub l1_deployer: Account,
    pub proposer: Account,
    pub fee_recipient: Account,
    pub prover: Account,
    /// Used by the relay agent to build throwaway blocks.
    pub throwaway: Account,
}

impl Accounts {
    pub fn from_config(config: &DevnetConfig) -> anyhow::Result<Self> {
        Ok(Self {
            l1_deployer: Account::from_hex(&config.l1.deployer_private_key)
                .context("l1.deployer_private_key")?,
            proposer: Account::from_hex(&config.l2.proposer_private_key)
                .context("l2.proposer_private_key")?,
            fee_recipient: Account::from_hex(&config.l2.fee_recipient_private_key)
                .context("l2.fee_recipient_private_key")?,
            prover: Account::from_hex(&config.l2.prover_private_key)
                .context("l2.prover_private_key")?,
            throwaway: Account::from_hex(&config.l2.throwaway_private_key)
                .context("l2.throwaway_private_key")?,
        })
    }
}
