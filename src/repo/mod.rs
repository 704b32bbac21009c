//! The repository seam: what the engine consumes from revision storage.
//!
//! The engine never talks to storage directly; it goes through [`Repo`],
//! which can load the element trees of all branches at a revision, open a
//! commit that accepts element mutations, and replay legacy
//! (pre-move-tracking) revisions as tree-delta events for migration.
//!
//! Commit completion is synchronous: [`Repo::commit`] consumes the edit txn
//! and returns a [`CompletionReport`] with the new revision number, so
//! callers never register continuations.

pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::branch::txn::Txn;
use crate::error::Result;
use crate::model::ids::RevNum;

pub use memory::MemRepo;

/// Revision properties attached to a commit (log message and friends).
pub type RevProps = BTreeMap<String, String>;

/// The revision property carrying the log message.
pub const REVPROP_LOG: &str = "log";

// ---------------------------------------------------------------------------
// CompletionReport
// ---------------------------------------------------------------------------

/// The synchronous result of a successful commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletionReport {
    /// The newly created revision.
    pub revision: RevNum,
}

// ---------------------------------------------------------------------------
// Legacy replay surface
// ---------------------------------------------------------------------------

/// One event of a legacy (pre-move-tracking) revision's tree delta.
///
/// Paths are repository-relative. This is the inbound editor surface the
/// migration shim translates into element mutations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TreeDeltaEvent {
    /// A directory appeared.
    AddDir {
        /// Repository-relative path.
        path: String,
    },
    /// A file appeared with the given text.
    AddFile {
        /// Repository-relative path.
        path: String,
        /// Initial text.
        text: Vec<u8>,
    },
    /// An existing file's text was replaced.
    OpenFile {
        /// Repository-relative path.
        path: String,
        /// New text.
        text: Vec<u8>,
    },
    /// A file or directory was deleted.
    Delete {
        /// Repository-relative path.
        path: String,
    },
}

/// A move recorded in the repository's move-info table for one legacy
/// revision: the delete at `from_path` and the add at `to_path` are the same
/// object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInfo {
    /// Where the object was deleted.
    pub from_path: String,
    /// Where it reappeared.
    pub to_path: String,
}

/// Receiver for [`Repo::replay_range`]: called once per revision with that
/// revision's tree-delta events.
pub trait LegacyReplayVisitor {
    /// Process one legacy revision.
    ///
    /// # Errors
    /// Any engine error aborts the replay.
    fn revision(&mut self, rev: RevNum, events: &[TreeDeltaEvent]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Repo
// ---------------------------------------------------------------------------

/// The repository interface the engine consumes.
pub trait Repo {
    /// The repository root URL.
    fn repos_root(&self) -> &str;

    /// The latest revision number.
    fn head_revnum(&self) -> RevNum;

    /// Load the read-only branching state of all branches at `rev`.
    ///
    /// # Errors
    /// `NoSuchRevision` if `rev` is out of range.
    fn load_branching_state(&self, rev: RevNum) -> Result<Txn>;

    /// Open an edit txn over the head revision, ready to accept element
    /// mutations for a commit.
    ///
    /// # Errors
    /// Propagates storage errors.
    fn begin_commit(&self) -> Result<Txn>;

    /// Complete and persist `txn` as a new revision.
    ///
    /// # Errors
    /// `Branching` if the txn is already terminal; storage errors.
    fn commit(&mut self, txn: Txn, revprops: RevProps) -> Result<CompletionReport>;

    /// Replay legacy revisions `from..=to` through `visitor`.
    ///
    /// # Errors
    /// `NoSuchRevision` for an out-of-range bound; visitor errors.
    fn replay_range(
        &self,
        from: RevNum,
        to: RevNum,
        visitor: &mut dyn LegacyReplayVisitor,
    ) -> Result<()>;

    /// The repository's move-info table for legacy revisions `from..=to`,
    /// keyed by revision.
    fn legacy_moves(&self, from: RevNum, to: RevNum) -> BTreeMap<RevNum, Vec<MoveInfo>>;
}
