//! Branch transactions: a set of related branches, an EID allocator, and a
//! state machine.
//!
//! A transaction is either a *base* txn — the read-only image of a persisted
//! revision — or an *edit* txn, which owns a boxed snapshot of its base and
//! accumulates mutations. EIDs allocated through [`Txn::new_eid`] are
//! monotone within the txn and become committed only when the txn commits.
//!
//! State machine:
//!
//! ```text
//! Open --sequence_point--> SequencePointed --complete--> Completed
//!   \                           \
//!    \---abort----------------> Aborted
//! ```
//!
//! Mutations are legal in `Open` or `SequencePointed` (and reset the state
//! to `Open`); `complete` and `abort` are terminal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::branch::state::BranchState;
use crate::error::{EngineError, Result};
use crate::model::ids::{BranchId, Eid, RevBid, RevNum};
use crate::model::subtree::Subtree;

// ---------------------------------------------------------------------------
// TxnState
// ---------------------------------------------------------------------------

/// The lifecycle state of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnState {
    /// Mutations may be applied.
    Open,
    /// Pending implicit work has been flushed; path→EID lookups are
    /// consistent. Mutations are still legal and reset to `Open`.
    SequencePointed,
    /// Terminal: the txn's state was persisted (or it is a base image).
    Completed,
    /// Terminal: the txn was discarded.
    Aborted,
}

impl TxnState {
    /// Returns `true` in `Completed` or `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

// ---------------------------------------------------------------------------
// Txn
// ---------------------------------------------------------------------------

/// A transactional grouping of branches over a shared EID namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txn {
    rev: RevNum,
    state: TxnState,
    branches: BTreeMap<BranchId, BranchState>,
    /// EIDs at or above this were allocated in this txn.
    first_new_eid: Eid,
    next_eid: Eid,
    /// The read-only base image, for edit txns.
    base: Option<Box<Txn>>,
}

impl Txn {
    /// Build the read-only image of persisted revision `rev`. Its state is
    /// `Completed`, so every mutation entry point rejects it.
    #[must_use]
    pub fn base_state(
        rev: RevNum,
        branches: BTreeMap<BranchId, BranchState>,
        next_eid: Eid,
    ) -> Self {
        Self {
            rev,
            state: TxnState::Completed,
            branches,
            first_new_eid: next_eid,
            next_eid,
            base: None,
        }
    }

    /// Begin an edit txn over `base`: the branches are copied, the EID
    /// allocator continues from the base's, and the base image is retained
    /// for diffing.
    #[must_use]
    pub fn begin_edit(base: Txn) -> Self {
        Self {
            rev: base.rev,
            state: TxnState::Open,
            branches: base.branches.clone(),
            first_new_eid: base.next_eid,
            next_eid: base.next_eid,
            base: Some(Box::new(base)),
        }
    }

    /// The base revision this txn is rooted at.
    #[must_use]
    pub const fn rev(&self) -> RevNum {
        self.rev
    }

    /// The current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TxnState {
        self.state
    }

    /// The read-only base image, for edit txns.
    #[must_use]
    pub fn base_txn(&self) -> Option<&Txn> {
        self.base.as_deref()
    }

    /// The next EID the allocator would hand out.
    #[must_use]
    pub const fn next_eid(&self) -> Eid {
        self.next_eid
    }

    /// How many EIDs this txn has allocated.
    #[must_use]
    pub const fn num_new_eids(&self) -> u64 {
        (self.next_eid.value() - self.first_new_eid.value()) as u64
    }

    // -- branch access ------------------------------------------------------

    /// Look up a branch by id.
    #[must_use]
    pub fn branch(&self, bid: &BranchId) -> Option<&BranchState> {
        self.branches.get(bid)
    }

    /// Look up a branch for mutation.
    ///
    /// # Errors
    /// `Branching` if the branch does not exist or the txn is terminal.
    pub fn branch_mut(&mut self, bid: &BranchId) -> Result<&mut BranchState> {
        self.ensure_mutable()?;
        self.branches
            .get_mut(bid)
            .ok_or_else(|| EngineError::Branching(format!("branch {bid} not found")))
    }

    /// All branches, in branch-id order.
    pub fn branches(&self) -> impl Iterator<Item = &BranchState> {
        self.branches.values()
    }

    /// All branch ids, in order.
    #[must_use]
    pub fn branch_ids(&self) -> Vec<BranchId> {
        self.branches.keys().cloned().collect()
    }

    /// The subbranch anchored at `eid` of branch `bid`, if `eid` carries the
    /// subbranch-root marker and the nested branch exists.
    #[must_use]
    pub fn subbranch_at_eid(&self, bid: &BranchId, eid: Eid) -> Option<&BranchState> {
        let branch = self.branch(bid)?;
        if !branch.element(eid)?.payload.is_subbranch_root() {
            return None;
        }
        self.branch(&bid.nest(eid))
    }

    /// The outer branch and anchoring element of a nested branch, or `None`
    /// for a top-level branch id.
    #[must_use]
    pub fn outer_branch_and_eid(&self, bid: &BranchId) -> Option<(&BranchState, Eid)> {
        let (outer_bid, outer_eid) = bid.outer()?;
        Some((self.branch(&outer_bid)?, outer_eid))
    }

    // -- mutation -----------------------------------------------------------

    /// Allocate a fresh EID from the txn's monotone counter.
    ///
    /// # Errors
    /// `Branching` if the txn is terminal.
    pub fn new_eid(&mut self) -> Result<Eid> {
        self.ensure_mutable()?;
        let eid = self.next_eid;
        self.next_eid = eid.next();
        Ok(eid)
    }

    /// Create an empty-tree branch carrying only its identity; the caller
    /// follows with `alter_one` to instantiate the root element.
    ///
    /// Idempotent per `(bid, root_eid)`: replay opens the same subbranch once
    /// per recursion level.
    ///
    /// # Errors
    /// `Branching` if a branch with this id exists with a different root, or
    /// the txn is terminal.
    pub fn open_branch(
        &mut self,
        predecessor: Option<RevBid>,
        bid: BranchId,
        root_eid: Eid,
    ) -> Result<()> {
        self.ensure_mutable()?;
        if let Some(existing) = self.branches.get(&bid) {
            if existing.root_eid() == root_eid {
                return Ok(());
            }
            return Err(EngineError::Branching(format!(
                "branch {bid} already exists rooted at {}, cannot reopen at {root_eid}",
                existing.root_eid()
            )));
        }
        self.branches
            .insert(bid.clone(), BranchState::new(bid, root_eid, predecessor));
        Ok(())
    }

    /// Deep-copy `subtree` into a new branch `new_bid`, preserving EIDs —
    /// this is how element identity crosses branch boundaries. Nested
    /// subbranches of the subtree are instantiated recursively.
    ///
    /// # Errors
    /// `Branching` if `new_bid` already exists or the txn is terminal.
    pub fn branch_from(
        &mut self,
        new_bid: BranchId,
        predecessor: Option<RevBid>,
        subtree: &Subtree,
    ) -> Result<()> {
        self.ensure_mutable()?;
        if self.branches.contains_key(&new_bid) {
            return Err(EngineError::Branching(format!(
                "branch {new_bid} already exists"
            )));
        }
        let root_eid = subtree.tree.root_eid();
        self.branches.insert(
            new_bid.clone(),
            BranchState::new(new_bid.clone(), root_eid, predecessor),
        );
        self.instantiate_subtree(&new_bid, subtree)
    }

    /// Write all elements of `subtree` into branch `bid` and recursively
    /// instantiate its nested subbranches as branches nested under `bid`.
    ///
    /// Existing elements in the target branch are overwritten (merge-style
    /// "theirs" resolution, the branch-into semantics).
    ///
    /// # Errors
    /// `Branching` if `bid` does not exist or the txn is terminal.
    pub fn instantiate_subtree(&mut self, bid: &BranchId, subtree: &Subtree) -> Result<()> {
        self.branch_mut(bid)?.instantiate_elements(&subtree.tree);
        for (anchor, sub) in &subtree.subbranches {
            let nested_bid = bid.nest(*anchor);
            self.open_branch(None, nested_bid.clone(), sub.tree.root_eid())?;
            self.instantiate_subtree(&nested_bid, sub)?;
        }
        Ok(())
    }

    // -- subtree extraction -------------------------------------------------

    /// The subtree of branch `bid` rooted at `at`, with nested subbranches
    /// attached recursively. `None` if the branch, the element, or its path
    /// is missing.
    #[must_use]
    pub fn subtree(&self, bid: &BranchId, at: Eid) -> Option<Subtree> {
        let branch = self.branch(bid)?;
        let mut sub = branch.subtree(at)?;
        for anchor in sub.subbranch_anchor_eids() {
            if let Some(nested) = self.subbranch_at_eid(bid, anchor) {
                let nested_bid = nested.bid().clone();
                let nested_root = nested.root_eid();
                if let Some(nested_sub) = self.subtree(&nested_bid, nested_root) {
                    sub.subbranches.insert(anchor, nested_sub);
                }
            }
        }
        Some(sub)
    }

    // -- state machine ------------------------------------------------------

    /// Flush pending implicit work so that subsequent path→EID lookups see a
    /// consistent view: branches whose outer anchor element was deleted (or
    /// is no longer a subbranch-root marker) are dropped, transitively.
    /// Idempotent when already sequence-pointed.
    ///
    /// # Errors
    /// `Branching` if the txn is terminal.
    pub fn sequence_point(&mut self) -> Result<()> {
        if self.state == TxnState::SequencePointed {
            return Ok(());
        }
        if self.state.is_terminal() {
            return Err(EngineError::Branching(format!(
                "transaction is {:?}, cannot sequence-point",
                self.state
            )));
        }
        self.purge_dead_branches();
        self.state = TxnState::SequencePointed;
        Ok(())
    }

    /// Transition to `Completed`. For an edit txn tied to a commit, the
    /// repository persists the txn's branches after this succeeds.
    ///
    /// # Errors
    /// `Branching` if the txn is already terminal.
    pub fn complete(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(EngineError::Branching(format!(
                "transaction is {:?}, cannot complete",
                self.state
            )));
        }
        self.purge_dead_branches();
        self.state = TxnState::Completed;
        Ok(())
    }

    /// Transition to `Aborted`, discarding the txn's work.
    ///
    /// # Errors
    /// `Branching` if the txn is already terminal.
    pub fn abort(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(EngineError::Branching(format!(
                "transaction is {:?}, cannot abort",
                self.state
            )));
        }
        self.state = TxnState::Aborted;
        Ok(())
    }

    /// Compare this edit txn against its base image: a missing or added
    /// branch, or any per-branch element difference, is a change.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        let Some(base) = self.base_txn() else {
            return false;
        };
        for bid in base.branches.keys() {
            if !self.branches.contains_key(bid) {
                return true;
            }
        }
        for (bid, edit_branch) in &self.branches {
            match base.branches.get(bid) {
                None => return true,
                Some(base_branch) => {
                    if !edit_branch.tree().differences(base_branch.tree()).is_empty() {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn ensure_mutable(&mut self) -> Result<()> {
        match self.state {
            TxnState::Open => Ok(()),
            TxnState::SequencePointed => {
                self.state = TxnState::Open;
                Ok(())
            }
            state => Err(EngineError::Branching(format!(
                "transaction is {state:?}, cannot mutate"
            ))),
        }
    }

    /// Drop branches whose anchor no longer exists, repeating until stable
    /// so that grandchildren of a deleted anchor go too.
    fn purge_dead_branches(&mut self) {
        loop {
            let dead: Vec<BranchId> = self
                .branches
                .keys()
                .filter(|bid| {
                    bid.outer().is_some_and(|(outer_bid, outer_eid)| {
                        !self
                            .branches
                            .get(&outer_bid)
                            .and_then(|outer| outer.element(outer_eid))
                            .is_some_and(|el| el.payload.is_subbranch_root())
                    })
                })
                .cloned()
                .collect();
            if dead.is_empty() {
                return;
            }
            for bid in dead {
                tracing::debug!(branch = %bid, "purging branch with deleted anchor");
                self.branches.remove(&bid);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::element::Payload;

    fn bid(s: &str) -> BranchId {
        BranchId::new(s).unwrap()
    }

    /// Base txn at r1: branch B0 with `e0(root)/{e1 "a"/{e2 "b" file}}`,
    /// next EID 3.
    fn base_txn() -> Txn {
        let mut b = BranchState::new(bid("B0"), Eid::new(0), None);
        b.alter_one(Eid::new(0), None, "", Payload::dir()).unwrap();
        b.alter_one(Eid::new(1), Some(Eid::new(0)), "a", Payload::dir())
            .unwrap();
        b.alter_one(Eid::new(2), Some(Eid::new(1)), "b", Payload::file("hi"))
            .unwrap();
        let mut branches = BTreeMap::new();
        branches.insert(bid("B0"), b);
        Txn::base_state(RevNum::new(1), branches, Eid::new(3))
    }

    #[test]
    fn base_txn_rejects_mutation() {
        let mut txn = base_txn();
        assert!(txn.new_eid().is_err());
        assert!(txn.branch_mut(&bid("B0")).is_err());
    }

    #[test]
    fn eids_are_monotone_within_txn() {
        let mut txn = Txn::begin_edit(base_txn());
        let a = txn.new_eid().unwrap();
        let b = txn.new_eid().unwrap();
        let c = txn.new_eid().unwrap();
        assert!(a < b && b < c);
        assert_eq!(a, Eid::new(3), "allocation starts at the base threshold");
        assert_eq!(txn.num_new_eids(), 3);
    }

    #[test]
    fn state_machine_happy_path() {
        let mut txn = Txn::begin_edit(base_txn());
        assert_eq!(txn.state(), TxnState::Open);
        txn.sequence_point().unwrap();
        assert_eq!(txn.state(), TxnState::SequencePointed);
        // Idempotent.
        txn.sequence_point().unwrap();
        txn.complete().unwrap();
        assert_eq!(txn.state(), TxnState::Completed);
        assert!(txn.complete().is_err());
        assert!(txn.abort().is_err());
    }

    #[test]
    fn mutation_resets_sequence_point() {
        let mut txn = Txn::begin_edit(base_txn());
        txn.sequence_point().unwrap();
        txn.new_eid().unwrap();
        assert_eq!(txn.state(), TxnState::Open);
    }

    #[test]
    fn abort_is_terminal() {
        let mut txn = Txn::begin_edit(base_txn());
        txn.abort().unwrap();
        assert_eq!(txn.state(), TxnState::Aborted);
        assert!(txn.new_eid().is_err());
        assert!(txn.sequence_point().is_err());
    }

    #[test]
    fn open_branch_is_idempotent_per_root() {
        let mut txn = Txn::begin_edit(base_txn());
        let sub_bid = bid("B0.5");
        txn.open_branch(None, sub_bid.clone(), Eid::new(6)).unwrap();
        txn.open_branch(None, sub_bid.clone(), Eid::new(6)).unwrap();
        assert!(txn.open_branch(None, sub_bid, Eid::new(7)).is_err());
    }

    #[test]
    fn branch_from_preserves_eids() {
        let mut txn = Txn::begin_edit(base_txn());
        let sub = txn.subtree(&bid("B0"), Eid::new(1)).unwrap();
        txn.branch_from(bid("B7"), None, &sub).unwrap();

        let new_branch = txn.branch(&bid("B7")).unwrap();
        assert_eq!(new_branch.root_eid(), Eid::new(1));
        assert_eq!(new_branch.path_of(Eid::new(2)).unwrap(), "b");
    }

    #[test]
    fn branch_from_rejects_existing_bid() {
        let mut txn = Txn::begin_edit(base_txn());
        let sub = txn.subtree(&bid("B0"), Eid::new(1)).unwrap();
        assert!(txn.branch_from(bid("B0"), None, &sub).is_err());
    }

    #[test]
    fn subbranch_navigation_round_trips() {
        let mut txn = Txn::begin_edit(base_txn());
        // Anchor a subbranch at a fresh element e3 under the root.
        let anchor = txn.new_eid().unwrap();
        let inner_root = txn.new_eid().unwrap();
        txn.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(anchor, Some(Eid::new(0)), "nested", Payload::Subbranch)
            .unwrap();
        let sub_bid = bid("B0").nest(anchor);
        txn.open_branch(None, sub_bid.clone(), inner_root).unwrap();
        txn.branch_mut(&sub_bid)
            .unwrap()
            .alter_one(inner_root, None, "", Payload::dir())
            .unwrap();

        let nested = txn.subbranch_at_eid(&bid("B0"), anchor).unwrap();
        assert_eq!(nested.bid(), &sub_bid);
        let (outer, outer_eid) = txn.outer_branch_and_eid(&sub_bid).unwrap();
        assert_eq!(outer.bid(), &bid("B0"));
        assert_eq!(outer_eid, anchor);
    }

    #[test]
    fn sequence_point_purges_branch_with_deleted_anchor() {
        let mut txn = Txn::begin_edit(base_txn());
        let anchor = txn.new_eid().unwrap();
        let inner_root = txn.new_eid().unwrap();
        txn.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(anchor, Some(Eid::new(0)), "nested", Payload::Subbranch)
            .unwrap();
        let sub_bid = bid("B0").nest(anchor);
        txn.open_branch(None, sub_bid.clone(), inner_root).unwrap();

        txn.branch_mut(&bid("B0")).unwrap().delete_one(anchor).unwrap();
        txn.sequence_point().unwrap();
        assert!(txn.branch(&sub_bid).is_none(), "orphaned subbranch vanishes");
    }

    #[test]
    fn subtree_attaches_nested_subbranches() {
        let mut txn = Txn::begin_edit(base_txn());
        let anchor = txn.new_eid().unwrap();
        let inner_root = txn.new_eid().unwrap();
        txn.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(anchor, Some(Eid::new(1)), "nested", Payload::Subbranch)
            .unwrap();
        let sub_bid = bid("B0").nest(anchor);
        txn.open_branch(None, sub_bid.clone(), inner_root).unwrap();
        txn.branch_mut(&sub_bid)
            .unwrap()
            .alter_one(inner_root, None, "", Payload::dir())
            .unwrap();

        let sub = txn.subtree(&bid("B0"), Eid::new(1)).unwrap();
        assert!(sub.subbranches.contains_key(&anchor));
        assert_eq!(sub.subbranches[&anchor].tree.root_eid(), inner_root);
    }

    #[test]
    fn is_changed_detects_element_and_branch_changes() {
        let mut txn = Txn::begin_edit(base_txn());
        assert!(!txn.is_changed());

        txn.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(0)), "moved", Payload::file("hi"))
            .unwrap();
        assert!(txn.is_changed());

        // A brand-new branch is also a change, even with identical trees.
        let mut txn2 = Txn::begin_edit(base_txn());
        let sub = txn2.subtree(&bid("B0"), Eid::new(1)).unwrap();
        txn2.branch_from(bid("B9"), None, &sub).unwrap();
        assert!(txn2.is_changed());
    }
}
