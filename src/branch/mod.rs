//! Branch layer: mutable branch state, branch transactions, serialization.
//!
//! This is L2 of the engine. A branch is a named, versioned element tree
//! rooted at a fixed EID; a transaction groups a set of related branches with
//! a monotone EID allocator and a small state machine. The plain-text
//! serialization of branch metadata lives in [`serial`].

pub mod serial;
pub mod state;
pub mod txn;

pub use state::BranchState;
pub use txn::{Txn, TxnState};
