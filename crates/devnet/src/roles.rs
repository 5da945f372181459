//! Classification of client definitions into devnet roles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{SetupError, docker::DockerImage};

/// A role a client image can play in the devnet.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum Role {
    /// Settlement chain execution engine.
    #[strum(serialize = "taiko-l1")]
    #[serde(rename = "taiko-l1")]
    SettlementEngine,
    /// Rollup chain execution engine.
    #[strum(serialize = "taiko-geth")]
    #[serde(rename = "taiko-geth")]
    RollupEngine,
    /// Relay agent that drives the rollup engine from settlement-chain commitments.
    #[strum(serialize = "taiko-driver")]
    #[serde(rename = "taiko-driver")]
    RelayAgent,
    #[strum(serialize = "taiko-proposer")]
    #[serde(rename = "taiko-proposer")]
    Proposer,
    #[strum(serialize = "taiko-prover")]
    #[serde(rename = "taiko-prover")]
    Prover,
    /// One-shot image that deploys the rollup contracts.
    #[strum(serialize = "taiko-protocol")]
    #[serde(rename = "taiko-protocol")]
    ContractDeployer,
}

impl Role {
    /// Whether nodes of this role run an execution engine with a JSON-RPC surface.
    pub fn is_engine(&self) -> bool {
        matches!(self, Role::SettlementEngine | Role::RollupEngine)
    }
}

/// A client image available to the devnet, with the role tags it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDefinition {
    /// The client name (e.g. "taiko-geth" or "besu").
    pub name: String,
    /// The Docker image providing the client.
    pub image: DockerImage,
    /// Capability tags, matched against [`Role`] names.
    pub roles: Vec<String>,
}

impl ClientDefinition {
    pub fn new(name: impl Into<String>, image: DockerImage) -> Self {
        Self {
            name: name.into(),
            image,
            roles: Vec::new(),
        }
    }

    /// Add a role tag.
    pub fn role(mut self, role: Role) -> Self {
        self.roles.push(role.to_string());
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        let tag: &'static str = role.into();
        self.roles.iter().any(|r| r == tag)
    }
}

/// Client definitions grouped by role, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ClientsByRole {
    by_role: BTreeMap<Role, Vec<ClientDefinition>>,
}

impl ClientsByRole {
    /// All definitions for a role. Empty when no client declared it.
    pub fn all(&self, role: Role) -> &[ClientDefinition] {
        self.by_role.get(&role).map(Vec::as_slice).unwrap_or_default()
    }

    /// The definition at `index` for a role.
    ///
    /// This is where an empty role becomes an error: a topology step asked for it.
    pub fn get(&self, role: Role, index: usize) -> Result<&ClientDefinition, SetupError> {
        let defs = self.all(role);
        if defs.is_empty() {
            return Err(SetupError::NoClient { role });
        }
        defs.get(index).ok_or(SetupError::ClientIndexOutOfRange {
            role,
            available: defs.len(),
            index,
        })
    }

    pub fn count(&self, role: Role) -> usize {
        self.all(role).len()
    }
}

impl std::fmt::Display for ClientsByRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts = self
            .by_role
            .iter()
            .map(|(role, defs)| {
                let names = defs
                    .iter()
                    .map(|d| d.name.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{role}=[{names}]")
            })
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join(" "))
    }
}

/// Partition client definitions into roles.
///
/// A definition declaring several tags lands in every matching role. Unknown tags are ignored.
pub fn classify(defs: &[ClientDefinition]) -> ClientsByRole {
    let mut out = ClientsByRole::default();

    for def in defs {
        for tag in &def.roles {
            match tag.parse::<Role>() {
                Ok(role) => out.by_role.entry(role).or_default().push(def.clone()),
                Err(_) => {
                    tracing::debug!(client = %def.name, tag = %tag, "Ignoring unknown role tag");
                }
            }
        }
    }

    out
}
