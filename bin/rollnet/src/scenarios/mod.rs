//! Scenario definitions, one module per suite.

pub mod blocks;
pub mod proposals;
pub mod sync;
pub mod vault;

/// One ether in wei.
pub(crate) const ETHER: u128 = 1_000_000_000_000_000_000;
