//! Engine error types for elmover.
//!
//! Defines [`EngineError`], the unified error type for all branching-engine
//! operations. Errors are tagged values and are never used for normal control
//! flow: they propagate to the command loop, which prints them (interactive
//! mode) or aborts (batch mode).
//!
//! Tree-invariant violations at mutation time get their own variants
//! (`TreeCycle`, `NameClash`, `RootReparent`, `BadParent`) so callers can
//! distinguish them from command-precondition failures (`Branching`).

use std::fmt;

use crate::model::ids::Eid;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified error type for branching-engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// A branch/element command precondition was violated (missing EID,
    /// EID already exists, revision disallowed, and so on).
    Branching(String),

    /// Revision number out of range.
    NoSuchRevision {
        /// The revision that was requested.
        rev: u64,
        /// The current head revision.
        head: u64,
    },

    /// A serialized element or branch id failed to parse.
    BadId(String),

    /// Serialized branch metadata failed to parse.
    BadFormat(String),

    /// A merge or switch produced conflicts. Details are attached to the
    /// operation's `ConflictStorage`; this carries the aggregate counts.
    MergeConflicts {
        /// Operation that produced the conflicts (`"merge"`, `"switch"`).
        operation: String,
        /// Number of single-element conflicts.
        single_element: usize,
        /// Number of name-clash conflicts.
        name_clash: usize,
        /// Number of orphan conflicts.
        orphan: usize,
    },

    /// Replay could not order element instantiations, implying a cycle in
    /// the target tree.
    TreeCycle(Eid),

    /// A mutation would give two siblings the same name.
    NameClash {
        /// The parent under which the names collide.
        parent: Eid,
        /// The colliding name.
        name: String,
    },

    /// A mutation tried to reparent or unparent a branch root, or to leave
    /// a non-root element without a parent.
    RootReparent(Eid),

    /// A mutation referenced a parent element that does not exist in the
    /// branch.
    BadParent {
        /// The element being altered.
        eid: Eid,
        /// The missing parent.
        parent: Eid,
    },

    /// Command-line argument parsing failure.
    IncorrectParams(String),

    /// The interactive prompt was cancelled.
    Cancelled,

    /// An I/O error from the repository or local files.
    Io(std::io::Error),
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Build a `Branching` error naming the command and offending argument,
    /// the shape every command precondition failure takes.
    pub fn branching(op: &str, detail: impl fmt::Display) -> Self {
        Self::Branching(format!("{op}: {detail}"))
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branching(msg) => write!(f, "{msg}"),
            Self::NoSuchRevision { rev, head } => {
                write!(f, "no such revision r{rev} (HEAD is r{head})")
            }
            Self::BadId(msg) => write!(f, "bad id: {msg}"),
            Self::BadFormat(msg) => write!(f, "bad branch metadata: {msg}"),
            Self::MergeConflicts {
                operation,
                single_element,
                name_clash,
                orphan,
            } => {
                write!(
                    f,
                    "{operation} failed because of conflicts: \
                     {single_element} single-element conflicts, \
                     {name_clash} name-clash conflicts, \
                     {orphan} orphan conflicts"
                )
            }
            Self::TreeCycle(eid) => {
                write!(f, "cannot order element instantiations: cycle involving {eid}")
            }
            Self::NameClash { parent, name } => {
                write!(f, "element name '{name}' already exists under {parent}")
            }
            Self::RootReparent(eid) => {
                write!(f, "cannot reparent or unparent branch root {eid}")
            }
            Self::BadParent { eid, parent } => {
                write!(f, "cannot place {eid} under {parent}: no such element")
            }
            Self::IncorrectParams(msg) => write!(f, "{msg}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_branching() {
        let err = EngineError::branching("mv", "element not found at path 'a/b'");
        assert_eq!(format!("{err}"), "mv: element not found at path 'a/b'");
    }

    #[test]
    fn display_no_such_revision() {
        let err = EngineError::NoSuchRevision { rev: 7, head: 3 };
        let msg = format!("{err}");
        assert!(msg.contains("r7"));
        assert!(msg.contains("HEAD is r3"));
    }

    #[test]
    fn display_merge_conflicts_counts_all_sets() {
        let err = EngineError::MergeConflicts {
            operation: "switch".to_owned(),
            single_element: 2,
            name_clash: 1,
            orphan: 0,
        };
        let msg = format!("{err}");
        assert!(msg.starts_with("switch failed"));
        assert!(msg.contains("2 single-element"));
        assert!(msg.contains("1 name-clash"));
        assert!(msg.contains("0 orphan"));
    }

    #[test]
    fn display_tree_invariant_variants() {
        let cycle = EngineError::TreeCycle(Eid::new(4));
        assert!(format!("{cycle}").contains("e4"));

        let clash = EngineError::NameClash {
            parent: Eid::new(1),
            name: "x".to_owned(),
        };
        assert!(format!("{clash}").contains("'x'"));

        let reparent = EngineError::RootReparent(Eid::new(0));
        assert!(format!("{reparent}").contains("e0"));

        let parent = EngineError::BadParent {
            eid: Eid::new(5),
            parent: Eid::new(9),
        };
        let msg = format!("{parent}");
        assert!(msg.contains("e5"));
        assert!(msg.contains("e9"));
    }

    #[test]
    fn error_source_io() {
        let err = EngineError::Io(std::io::Error::other("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_source_non_io_is_none() {
        let err = EngineError::Cancelled;
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::other("gone");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
