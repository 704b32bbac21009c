//! Core data model: identifiers, element contents, element trees, subtrees.
//!
//! This is L1 of the engine: immutable-in-use snapshots of EID → content with
//! path lookup and structural diff. Everything above (branches, transactions,
//! replay, merge) is built on the contracts defined here.

pub mod element;
pub mod ids;
pub mod subtree;
pub mod tree;
