use derive_more::{Display, Error};

use crate::Role;

/// Errors that indicate a broken environment rather than transient remote state.
///
/// A scenario failing with one of these aborts the whole run, since every later scenario
/// would be built on the same broken topology.
#[derive(Debug, Display, Error)]
pub enum SetupError {
    #[display("no {role} client definitions found")]
    NoClient { role: Role },

    #[display("only have {available} {role} client definitions, cannot find {index}")]
    ClientIndexOutOfRange {
        role: Role,
        available: usize,
        index: usize,
    },

    #[display("only have {len} {role} nodes, cannot find {index}")]
    NodeIndexOutOfRange { role: Role, len: usize, index: usize },

    #[display("invalid {role} node configuration: {reason}")]
    InvalidNodeConfig { role: Role, reason: String },

    #[display("failed to launch {role} node {client}: {reason}")]
    Launch {
        role: Role,
        client: String,
        reason: String,
    },

    #[display("failed to dial {endpoint}: {reason}")]
    Dial { endpoint: String, reason: String },

    #[display("{node} did not come up within {timeout_secs}s: {reason}")]
    NodeNotUp {
        node: String,
        timeout_secs: u64,
        reason: String,
    },

    #[display("contract deployment on {node} exited with code {exit_code}: {output}")]
    Deployment {
        node: String,
        exit_code: i64,
        output: String,
    },

    #[display("topology violation: {reason}")]
    Topology { reason: String },
}

impl SetupError {
    /// Returns true if the error chain contains a [`SetupError`].
    pub fn is_setup_error(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.downcast_ref::<SetupError>().is_some())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_setup_error_is_found_through_context() {
        let err: anyhow::Error = SetupError::NoClient {
            role: Role::Prover,
        }
        .into();
        let err = Err::<(), _>(err)
            .context("starting prover")
            .unwrap_err();

        assert!(SetupError::is_setup_error(&err));
        assert!(format!("{err:#}").contains("no taiko-prover client definitions found"));
    }

    #[test]
    fn test_plain_error_is_not_setup_error() {
        let err = anyhow::anyhow!("expected status 1, but got 0");
        assert!(!SetupError::is_setup_error(&err));
    }

    #[test]
    fn test_node_index_message() {
        let err = SetupError::NodeIndexOutOfRange {
            role: Role::SettlementEngine,
            len: 1,
            index: 3,
        };
        assert_eq!(err.to_string(), "only have 1 taiko-l1 nodes, cannot find 3");
    }
}
