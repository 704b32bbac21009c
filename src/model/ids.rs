//! Core identifier types for the branching engine.
//!
//! Foundation types used throughout the engine: element identifiers,
//! revision numbers, branch identifiers (dotted nesting paths), and the
//! composite location types built from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Eid
// ---------------------------------------------------------------------------

/// An element identifier — a repository-wide unique integer.
///
/// EIDs below a per-repository threshold are *committed* (stable across
/// revisions); EIDs at or above it were allocated inside a transaction and
/// only become committed when that transaction commits. EIDs are never
/// reused. Displayed as `e<N>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(i64);

impl Eid {
    /// Create an element id from its integer value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Return the integer value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Return the next element id in allocation order.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl FromStr for Eid {
    type Err = EngineError;

    /// Parse `e<N>` or a bare integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('e').unwrap_or(s);
        let value: i64 = digits
            .parse()
            .map_err(|_| EngineError::BadId(format!("invalid element id '{s}'")))?;
        if value < 0 {
            return Err(EngineError::BadId(format!(
                "element id must be non-negative, got '{s}'"
            )));
        }
        Ok(Self(value))
    }
}

// ---------------------------------------------------------------------------
// RevNum
// ---------------------------------------------------------------------------

/// A revision number. Displayed as `r<N>`.
///
/// "No revision" (the working state) is expressed as `Option<RevNum>` at API
/// boundaries rather than a sentinel value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevNum(u64);

impl RevNum {
    /// Create a revision number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Return the integer value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Return the next revision number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl FromStr for RevNum {
    type Err = EngineError;

    /// Parse `r<N>` or a bare integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('r').unwrap_or(s);
        let value: u64 = digits
            .parse()
            .map_err(|_| EngineError::BadId(format!("invalid revision number '{s}'")))?;
        Ok(Self(value))
    }
}

// ---------------------------------------------------------------------------
// BranchId
// ---------------------------------------------------------------------------

/// A validated branch identifier encoding branch nesting.
///
/// A top-level branch is `B<n>`; a subbranch anchored at element `<eid>` of
/// outer branch `<outer>` is `<outer>.<eid>`. Examples: `B0`, `B3.7`,
/// `B3.7.21`. The id is derivable from the nesting structure; no separate
/// registry is required.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchId(String);

impl BranchId {
    /// Create a branch id from a string, validating the `B<n>(.<n>)*` shape.
    ///
    /// # Errors
    /// Returns `BadId` if the string is not a well-formed branch id.
    pub fn new(s: &str) -> Result<Self, EngineError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Build a top-level branch id `B<eid>` from the outer element id that
    /// anchors it.
    #[must_use]
    pub fn top(outer_eid: Eid) -> Self {
        Self(format!("B{}", outer_eid.value()))
    }

    /// Build the id of the subbranch anchored at `outer_eid` inside `self`.
    #[must_use]
    pub fn nest(&self, outer_eid: Eid) -> Self {
        Self(format!("{}.{}", self.0, outer_eid.value()))
    }

    /// Return the outer branch id and anchoring element id, or `None` for a
    /// top-level branch.
    #[must_use]
    pub fn outer(&self) -> Option<(Self, Eid)> {
        let (outer, last) = self.0.rsplit_once('.')?;
        let eid = last.parse::<i64>().ok().map(Eid::new)?;
        Some((Self(outer.to_owned()), eid))
    }

    /// Nesting depth: 0 for a top-level branch, 1 for its direct subbranches.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches('.').count()
    }

    /// Return the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), EngineError> {
        let bad = || EngineError::BadId(format!("invalid branch id '{s}'"));
        let rest = s.strip_prefix('B').ok_or_else(bad)?;
        if rest.is_empty() {
            return Err(bad());
        }
        for segment in rest.split('.') {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
        }
        Ok(())
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BranchId {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BranchId {
    type Error = EngineError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<BranchId> for String {
    fn from(bid: BranchId) -> Self {
        bid.0
    }
}

// ---------------------------------------------------------------------------
// RevBid / RevBidEid
// ---------------------------------------------------------------------------

/// A `(revision, branch id)` pair — where a branch was derived from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevBid {
    /// The revision.
    pub rev: RevNum,
    /// The branch id at that revision.
    pub bid: BranchId,
}

impl RevBid {
    /// Create a `(revision, branch id)` pair.
    #[must_use]
    pub const fn new(rev: RevNum, bid: BranchId) -> Self {
        Self { rev, bid }
    }
}

impl fmt::Display for RevBid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.rev, self.bid)
    }
}

/// A `(revision, branch id, element id)` triple identifying the source of a
/// branching operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevBidEid {
    /// The revision, or `None` for the working state.
    pub rev: Option<RevNum>,
    /// The branch id.
    pub bid: BranchId,
    /// The element id.
    pub eid: Eid,
}

impl RevBidEid {
    /// Create a source location triple.
    #[must_use]
    pub const fn new(rev: Option<RevNum>, bid: BranchId, eid: Eid) -> Self {
        Self { rev, bid, eid }
    }
}

// ---------------------------------------------------------------------------
// ElRev
// ---------------------------------------------------------------------------

/// The result of resolving a path argument: the deepest branch the path
/// reaches, the element there (`None` when no element exists at the path —
/// a valid result, used by commands that require absence), and the revision
/// (`None` for the working state).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElRev {
    /// The branch containing the element.
    pub bid: BranchId,
    /// The element, or `None` if no element exists at the path.
    pub eid: Option<Eid>,
    /// The revision, or `None` for the working state.
    pub rev: Option<RevNum>,
}

impl ElRev {
    /// Create an element location.
    #[must_use]
    pub const fn new(bid: BranchId, eid: Option<Eid>, rev: Option<RevNum>) -> Self {
        Self { bid, eid, rev }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
