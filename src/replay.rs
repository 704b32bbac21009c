//! Replay: drive the structural diff of two element trees into an edit
//! branch.
//!
//! Replay is how a transaction's changes reach the repository: commit opens
//! a fresh edit txn and replays the (base → working) diff into it, recursing
//! through nested subbranches. Revert is the same machinery run in the
//! inverse direction.
//!
//! The order in which diff entries are applied is not observable in the
//! result, but the pass must be internally consistent: an element whose
//! parent is being created in the same diff is deferred until that parent
//! has been instantiated. A stalled pass means the target tree contains a
//! parent cycle, reported as [`EngineError::TreeCycle`].

use std::collections::BTreeSet;

use crate::branch::state::BranchState;
use crate::branch::txn::Txn;
use crate::error::{EngineError, Result};
use crate::model::element::Element;
use crate::model::ids::{BranchId, Eid};
use crate::model::tree::ElementTree;

// ---------------------------------------------------------------------------
// Single-branch replay
// ---------------------------------------------------------------------------

/// Replay the differences between `left` and `right` into `edit_branch`:
/// instantiate elements added on the right, delete elements deleted on the
/// right, alter the rest. Single branch; no subbranch recursion.
///
/// # Errors
/// `TreeCycle` if the right tree's new elements form a parent cycle; any
/// mutation error from the branch.
pub fn subtree_replay(
    edit_branch: &mut BranchState,
    left: &ElementTree,
    right: &ElementTree,
) -> Result<()> {
    let diff = left.differences(right);

    // Deletions first; they cannot depend on anything else.
    let mut pending: Vec<(Eid, Element)> = Vec::new();
    let mut creating: BTreeSet<Eid> = BTreeSet::new();
    for (eid, (e0, e1)) in diff {
        match (e0, e1) {
            (Some(_), None) => {
                tracing::debug!(%eid, "replay: delete");
                edit_branch.delete_one(eid)?;
            }
            (None, Some(el)) => {
                creating.insert(eid);
                pending.push((eid, el));
            }
            (Some(_), Some(el)) => pending.push((eid, el)),
            (None, None) => {}
        }
    }

    // Apply upserts, deferring any element whose parent is still waiting to
    // be instantiated in this same pass.
    while !pending.is_empty() {
        let mut deferred: Vec<(Eid, Element)> = Vec::new();
        let mut progressed = false;
        for (eid, el) in pending {
            let parent_pending = el
                .parent
                .is_some_and(|parent| creating.contains(&parent));
            if parent_pending {
                deferred.push((eid, el));
            } else {
                tracing::debug!(%eid, "replay: alter");
                edit_branch.alter_one(eid, el.parent, &el.name, el.payload)?;
                creating.remove(&eid);
                progressed = true;
            }
        }
        if !progressed {
            let (eid, _) = deferred[0];
            return Err(EngineError::TreeCycle(eid));
        }
        pending = deferred;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Recursive branch replay
// ---------------------------------------------------------------------------

/// A branch within some transaction, addressed for replay.
#[derive(Clone, Copy)]
pub struct BranchRef<'a> {
    /// The transaction holding the branch.
    pub txn: &'a Txn,
    /// The branch id within it.
    pub bid: &'a BranchId,
}

impl<'a> BranchRef<'a> {
    /// Address `bid` within `txn`.
    #[must_use]
    pub const fn new(txn: &'a Txn, bid: &'a BranchId) -> Self {
        Self { txn, bid }
    }

    fn state(&self) -> Option<&'a BranchState> {
        self.txn.branch(self.bid)
    }
}

/// Replay the differences between `left` and `right` into
/// `edit_txn`:`edit_bid`, recursing into nested subbranches.
///
/// Either side (but not both) may be `None`, meaning an empty set. A deleted
/// branch on the right emits nothing: it goes away because the outer
/// subbranch-root element was deleted.
///
/// # Errors
/// Any error from [`subtree_replay`] or from opening edit subbranches.
pub fn branch_replay(
    edit_txn: &mut Txn,
    edit_bid: &BranchId,
    left: Option<BranchRef<'_>>,
    right: Option<BranchRef<'_>>,
) -> Result<()> {
    let left_branch = left.and_then(|r| r.state());
    let right_branch = right.and_then(|r| r.state());
    debug_assert!(
        left_branch.is_some() || right_branch.is_some(),
        "replay needs at least one side"
    );

    let Some(right_branch) = right_branch else {
        // Deleted branch: nothing to emit here.
        return Ok(());
    };

    {
        let empty;
        let left_tree = match left_branch {
            Some(b) => b.tree(),
            None => {
                empty = ElementTree::new(right_branch.tree().root_eid());
                &empty
            }
        };
        let edit_branch = edit_txn.branch_mut(edit_bid)?;
        subtree_replay(edit_branch, left_tree, right_branch.tree())?;
    }

    // Union of subbranch anchors across both sides, then recurse.
    let mut anchors: BTreeSet<Eid> = BTreeSet::new();
    for branch in [left_branch, Some(right_branch)].into_iter().flatten() {
        anchors.extend(
            branch
                .tree()
                .iter()
                .filter(|(_, el)| el.payload.is_subbranch_root())
                .map(|(eid, _)| eid),
        );
    }

    for anchor in anchors {
        let left_sub = left.and_then(|r| {
            r.txn
                .subbranch_at_eid(r.bid, anchor)
                .map(|b| (r.txn, b.bid().clone()))
        });
        let right_sub = right.and_then(|r| {
            r.txn
                .subbranch_at_eid(r.bid, anchor)
                .map(|b| (r.txn, b.bid().clone(), b.root_eid(), b.predecessor().cloned()))
        });

        if let Some((right_txn, right_sub_bid, right_root, predecessor)) = right_sub {
            let edit_sub_bid = edit_bid.nest(anchor);
            edit_txn.open_branch(predecessor, edit_sub_bid.clone(), right_root)?;
            let left_ref = left_sub
                .as_ref()
                .map(|(txn, bid)| BranchRef::new(txn, bid));
            branch_replay(
                edit_txn,
                &edit_sub_bid,
                left_ref,
                Some(BranchRef::new(right_txn, &right_sub_bid)),
            )?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
