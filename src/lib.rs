//! elmover library crate — an experimental move-tracking branching engine.
//!
//! Every tracked object is an *element* with a durable integer identity
//! (EID); branches are named, versioned mappings over a shared EID
//! namespace; history is tracked per element, so a rename is one mutation
//! of one element. Nested subbranches and a structural, element-keyed 3-way
//! merge follow identity across renames, moves and branches.
//!
//! The primary interface is the `elmover` CLI binary; the layers are usable
//! directly:
//!
//! - [`model`] — element trees, payloads, identifiers, structural diff
//! - [`branch`] — branch state, transactions, metadata serialization
//! - [`replay`] / [`merge`] — diff-driven replay and 3-way merge
//! - [`wc`] — the in-memory workspace and the command interpreter
//! - [`repo`] — the repository seam and its in-memory implementation
//! - [`migrate`] — migration from non-move-tracking history

pub mod branch;
pub mod error;
pub mod format;
pub mod merge;
pub mod migrate;
pub mod model;
pub mod replay;
pub mod repo;
pub mod wc;
