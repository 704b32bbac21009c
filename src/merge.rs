//! Element-keyed 3-way merge.
//!
//! Given a common ancestor (YCA), a source and a target location, the merge
//! walks the union of their element keys and decides per element: a side
//! that equals the ancestor yields to the other side; identical independent
//! changes are kept; anything else is a single-element conflict. Because
//! elements are keyed by identity, a rename or move on one side follows the
//! element through any rearrangement on the other.
//!
//! After the element-wise pass the merged branch tree is validated; name
//! clashes and orphans *introduced by the merge* are recorded (a cycle has
//! no root-reachable path, so it surfaces as orphans). The engine does not
//! auto-resolve: callers abort their operation when the conflict storage is
//! non-empty, leaving the partially merged state in place for inspection.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::branch::txn::Txn;
use crate::error::{EngineError, Result};
use crate::model::element::{content_equal, Element};
use crate::model::ids::{BranchId, Eid};
use crate::model::tree::ElementTree;

// ---------------------------------------------------------------------------
// Conflict records
// ---------------------------------------------------------------------------

/// The three versions of one element that changed incompatibly on both
/// sides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleElementConflict {
    /// The branch the conflict occurred in.
    pub bid: BranchId,
    /// The conflicted element.
    pub eid: Eid,
    /// The ancestor version.
    pub yca: Option<Element>,
    /// The source-side version.
    pub src: Option<Element>,
    /// The target-side version.
    pub tgt: Option<Element>,
}

/// A set of siblings that ended up sharing a `(parent, name)` slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameClashConflict {
    /// The branch the clash occurred in.
    pub bid: BranchId,
    /// The common parent.
    pub parent: Eid,
    /// The clashing name.
    pub name: String,
    /// The elements competing for the slot.
    pub eids: Vec<Eid>,
}

/// An element left without a root-reachable ancestor chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanConflict {
    /// The branch the orphan is in.
    pub bid: BranchId,
    /// The orphaned element.
    pub eid: Eid,
    /// Its stale parent.
    pub parent: Eid,
}

// ---------------------------------------------------------------------------
// ConflictStorage
// ---------------------------------------------------------------------------

/// All conflicts produced by one merge, across nested subbranches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictStorage {
    /// Elements changed incompatibly on both sides.
    pub single_element: Vec<SingleElementConflict>,
    /// Sibling-name collisions in the merged tree.
    pub name_clash: Vec<NameClashConflict>,
    /// Elements orphaned by the merge.
    pub orphan: Vec<OrphanConflict>,
}

impl ConflictStorage {
    /// An empty conflict set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when no conflicts were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.single_element.is_empty() && self.name_clash.is_empty() && self.orphan.is_empty()
    }

    /// `(single-element, name-clash, orphan)` counts.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.single_element.len(),
            self.name_clash.len(),
            self.orphan.len(),
        )
    }

    /// Absorb the conflicts of a nested merge.
    pub fn extend(&mut self, other: Self) {
        self.single_element.extend(other.single_element);
        self.name_clash.extend(other.name_clash);
        self.orphan.extend(other.orphan);
    }

    /// Build the aggregate error for `operation`, consuming nothing.
    #[must_use]
    pub fn to_error(&self, operation: &str) -> EngineError {
        let (single_element, name_clash, orphan) = self.counts();
        EngineError::MergeConflicts {
            operation: operation.to_owned(),
            single_element,
            name_clash,
            orphan,
        }
    }
}

// ---------------------------------------------------------------------------
// Merge entry point
// ---------------------------------------------------------------------------

/// A merge input: an element location within some transaction.
#[derive(Clone, Copy)]
pub struct MergeSource<'a> {
    /// The transaction holding the branch.
    pub txn: &'a Txn,
    /// The branch.
    pub bid: &'a BranchId,
    /// The subtree root the merge operates on.
    pub eid: Eid,
}

impl<'a> MergeSource<'a> {
    /// Address `(bid, eid)` within `txn`.
    #[must_use]
    pub const fn new(txn: &'a Txn, bid: &'a BranchId, eid: Eid) -> Self {
        Self { txn, bid, eid }
    }
}

/// 3-way merge of `src` into `edit`:`(tgt_bid, tgt_eid)` against ancestor
/// `yca` (`None` means an empty ancestor). The merged tree is produced in
/// the target branch; conflicts are returned, never auto-resolved.
///
/// Top-level subbranch recursion happens here: a subbranch present on both
/// sides is merged recursively; a subbranch new on the source side is
/// branched across.
///
/// # Errors
/// `Branching` if a location cannot be resolved; mutation errors from the
/// target branch.
pub fn branch_merge(
    edit: &mut Txn,
    tgt_bid: &BranchId,
    tgt_eid: Eid,
    src: MergeSource<'_>,
    yca: Option<MergeSource<'_>>,
) -> Result<ConflictStorage> {
    let src_tree = subtree_tree(src.txn, src.bid, src.eid, "merge source")?;
    let yca_tree = match yca {
        Some(loc) => subtree_tree(loc.txn, loc.bid, loc.eid, "merge ancestor")?,
        None => ElementTree::new(tgt_eid),
    };
    let tgt_tree = subtree_tree(edit, tgt_bid, tgt_eid, "merge target")?;

    let tgt_root_eid = edit
        .branch(tgt_bid)
        .map(crate::branch::state::BranchState::root_eid)
        .ok_or_else(|| EngineError::Branching(format!("branch {tgt_bid} not found")))?;
    let pre = TreeViolations::of(edit.branch(tgt_bid).map(crate::branch::state::BranchState::tree).unwrap_or(&tgt_tree));

    let mut conflicts = ConflictStorage::new();

    // Element-wise 3-way decision over the union of keys.
    let union: BTreeSet<Eid> = yca_tree
        .iter()
        .map(|(eid, _)| eid)
        .chain(src_tree.iter().map(|(eid, _)| eid))
        .chain(tgt_tree.iter().map(|(eid, _)| eid))
        .collect();

    for eid in union {
        let y = yca_tree.get(eid);
        let s = src_tree.get(eid);
        let t = tgt_tree.get(eid);

        if content_equal(s, y) {
            // Source didn't change it: keep the target version.
            continue;
        }
        if content_equal(t, y) {
            // Target didn't change it: fast-forward this element to source.
            adopt(edit, tgt_bid, tgt_root_eid, tgt_eid, eid, s, y, t, &mut conflicts)?;
            continue;
        }
        if content_equal(s, t) {
            // Identical independent changes.
            continue;
        }
        tracing::debug!(%eid, "merge: single-element conflict");
        conflicts.single_element.push(SingleElementConflict {
            bid: tgt_bid.clone(),
            eid,
            yca: y.cloned(),
            src: s.cloned(),
            tgt: t.cloned(),
        });
    }

    // Validate the merged branch; report only violations the merge created.
    let post = TreeViolations::of(
        edit.branch(tgt_bid)
            .map(crate::branch::state::BranchState::tree)
            .ok_or_else(|| EngineError::Branching(format!("branch {tgt_bid} not found")))?,
    );
    post.report_new(&pre, tgt_bid, &mut conflicts);

    // Recurse into subbranches present on both sides; branch across the ones
    // new on the source side.
    merge_subbranches(edit, tgt_bid, src, yca, &src_tree, &mut conflicts)?;

    Ok(conflicts)
}

/// Adopt the source version of one element into the target branch.
#[allow(clippy::too_many_arguments)]
fn adopt(
    edit: &mut Txn,
    tgt_bid: &BranchId,
    tgt_root_eid: Eid,
    merge_root: Eid,
    eid: Eid,
    src_el: Option<&Element>,
    yca_el: Option<&Element>,
    tgt_el: Option<&Element>,
    conflicts: &mut ConflictStorage,
) -> Result<()> {
    match src_el {
        None => {
            if eid == tgt_root_eid {
                // A branch root cannot be deleted; surface as a conflict.
                conflicts.single_element.push(SingleElementConflict {
                    bid: tgt_bid.clone(),
                    eid,
                    yca: yca_el.cloned(),
                    src: None,
                    tgt: tgt_el.cloned(),
                });
                return Ok(());
            }
            tracing::debug!(%eid, "merge: adopt deletion");
            edit.branch_mut(tgt_bid)?.delete_one(eid)
        }
        Some(el) if el.is_root() || eid == merge_root => {
            // The subtree root's attachment belongs to the target; adopt the
            // payload only.
            let branch = edit.branch_mut(tgt_bid)?;
            let (parent, name) = branch
                .element(eid)
                .map(|cur| (cur.parent, cur.name.clone()))
                .unwrap_or((el.parent, el.name.clone()));
            tracing::debug!(%eid, "merge: adopt payload");
            branch.alter_one(eid, parent, &name, el.payload.clone())
        }
        Some(el) => {
            tracing::debug!(%eid, "merge: adopt");
            edit.branch_mut(tgt_bid)?
                .alter_one(eid, el.parent, &el.name, el.payload.clone())
        }
    }
}

/// Recurse into nested subbranches after the element-wise pass.
fn merge_subbranches(
    edit: &mut Txn,
    tgt_bid: &BranchId,
    src: MergeSource<'_>,
    yca: Option<MergeSource<'_>>,
    src_tree: &ElementTree,
    conflicts: &mut ConflictStorage,
) -> Result<()> {
    let mut anchors: BTreeSet<Eid> = src_tree
        .iter()
        .filter(|(_, el)| el.payload.is_subbranch_root())
        .map(|(eid, _)| eid)
        .collect();
    if let Some(tgt_branch) = edit.branch(tgt_bid) {
        anchors.extend(
            tgt_branch
                .tree()
                .iter()
                .filter(|(_, el)| el.payload.is_subbranch_root())
                .map(|(eid, _)| eid),
        );
    }

    for anchor in anchors {
        let src_sub = src
            .txn
            .subbranch_at_eid(src.bid, anchor)
            .map(|b| (b.bid().clone(), b.root_eid(), b.predecessor().cloned()));
        let tgt_sub = edit
            .subbranch_at_eid(tgt_bid, anchor)
            .map(|b| (b.bid().clone(), b.root_eid()));

        match (src_sub, tgt_sub) {
            (Some((src_sub_bid, src_sub_root, _)), Some((tgt_sub_bid, tgt_sub_root))) => {
                let yca_sub = yca.and_then(|loc| {
                    loc.txn
                        .subbranch_at_eid(loc.bid, anchor)
                        .map(|b| (b.bid().clone(), b.root_eid()))
                });
                let nested = branch_merge(
                    edit,
                    &tgt_sub_bid,
                    tgt_sub_root,
                    MergeSource::new(src.txn, &src_sub_bid, src_sub_root),
                    yca_sub.as_ref().and_then(|(yca_bid, yca_root)| {
                        yca.map(|loc| MergeSource::new(loc.txn, yca_bid, *yca_root))
                    }),
                )?;
                conflicts.extend(nested);
            }
            (Some((src_sub_bid, src_sub_root, predecessor)), None) => {
                // Subbranch new on the source side: branch it across if the
                // anchor survived the merge.
                let anchor_survived = edit
                    .branch(tgt_bid)
                    .and_then(|b| b.element(anchor))
                    .is_some_and(|el| el.payload.is_subbranch_root());
                let new_bid = tgt_bid.nest(anchor);
                if anchor_survived && edit.branch(&new_bid).is_none() {
                    if let Some(sub) = src.txn.subtree(&src_sub_bid, src_sub_root) {
                        tracing::debug!(branch = %new_bid, "merge: branching new subbranch across");
                        edit.branch_from(new_bid, predecessor, &sub)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Extract the tree slice for a merge input.
fn subtree_tree(txn: &Txn, bid: &BranchId, eid: Eid, what: &str) -> Result<ElementTree> {
    txn.branch(bid)
        .and_then(|b| b.subtree(eid))
        .map(|sub| sub.tree)
        .ok_or_else(|| {
            EngineError::Branching(format!("{what}: element {eid} not found in branch {bid}"))
        })
}

// ---------------------------------------------------------------------------
// Tree validation
// ---------------------------------------------------------------------------

/// The invariant violations present in one tree: sibling-name clashes among
/// reachable elements, and orphans. Cycles never reach the root, so they
/// appear in the orphan set.
struct TreeViolations {
    clashes: BTreeMap<(Eid, String), Vec<Eid>>,
    orphans: BTreeMap<Eid, Eid>,
}

impl TreeViolations {
    fn of(tree: &ElementTree) -> Self {
        let mut slots: BTreeMap<(Eid, String), Vec<Eid>> = BTreeMap::new();
        let mut orphans = BTreeMap::new();
        for (eid, el) in tree.iter() {
            if tree.is_reachable(eid) {
                if let Some(parent) = el.parent {
                    slots.entry((parent, el.name.clone())).or_default().push(eid);
                }
            } else {
                orphans.insert(eid, el.parent.unwrap_or(eid));
            }
        }
        let clashes = slots
            .into_iter()
            .filter(|(_, eids)| eids.len() > 1)
            .collect();
        Self { clashes, orphans }
    }

    /// Record the violations present here but not in `pre`.
    fn report_new(&self, pre: &Self, bid: &BranchId, conflicts: &mut ConflictStorage) {
        for ((parent, name), eids) in &self.clashes {
            if !pre.clashes.contains_key(&(*parent, name.clone())) {
                conflicts.name_clash.push(NameClashConflict {
                    bid: bid.clone(),
                    parent: *parent,
                    name: name.clone(),
                    eids: eids.clone(),
                });
            }
        }
        for (eid, parent) in &self.orphans {
            if !pre.orphans.contains_key(eid) {
                conflicts.orphan.push(OrphanConflict {
                    bid: bid.clone(),
                    eid: *eid,
                    parent: *parent,
                });
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
    use crate::branch::state::BranchState;
    use crate::model::element::Payload;
    use crate::model::ids::RevNum;

    fn bid(s: &str) -> BranchId {
        BranchId::new(s).unwrap()
    }

    /// Base txn at r1: B0 with `e0(root)/{e1 "x" dir, e2 (e1) "f" file}`.
    fn base_txn() -> Txn {
        let mut b = BranchState::new(bid("B0"), Eid::new(0), None);
        b.alter_one(Eid::new(0), None, "", Payload::dir()).unwrap();
        b.alter_one(Eid::new(1), Some(Eid::new(0)), "x", Payload::dir())
            .unwrap();
        b.alter_one(Eid::new(2), Some(Eid::new(1)), "f", Payload::file("hi"))
            .unwrap();
        let mut branches = BTreeMap::new();
        branches.insert(bid("B0"), b);
        Txn::base_state(RevNum::new(1), branches, Eid::new(3))
    }

    fn merge_into(
        edit: &mut Txn,
        src_txn: &Txn,
        yca_txn: &Txn,
    ) -> ConflictStorage {
        let b0 = bid("B0");
        branch_merge(
            edit,
            &b0,
            Eid::new(0),
            MergeSource::new(src_txn, &b0, Eid::new(0)),
            Some(MergeSource::new(yca_txn, &b0, Eid::new(0))),
        )
        .unwrap()
    }

    #[test]
    fn merge_identity_leaves_target_unchanged() {
        let base = base_txn();
        let mut tgt = Txn::begin_edit(base.clone());
        tgt.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(0)), "moved", Payload::file("hi"))
            .unwrap();
        let before = tgt.branch(&bid("B0")).unwrap().tree().clone();

        // src == yca: nothing to merge.
        let conflicts = merge_into(&mut tgt, &base, &base);
        assert!(conflicts.is_empty());
        assert!(tgt.branch(&bid("B0")).unwrap().tree().equal(&before));
    }

    #[test]
    fn merge_fast_forwards_source_change() {
        let base = base_txn();
        let mut src = Txn::begin_edit(base.clone());
        src.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(1)), "f", Payload::file("new"))
            .unwrap();

        let mut tgt = Txn::begin_edit(base.clone());
        let conflicts = merge_into(&mut tgt, &src, &base);
        assert!(conflicts.is_empty());
        let el = tgt.branch(&bid("B0")).unwrap().element(Eid::new(2)).unwrap();
        assert_eq!(el.payload.text().unwrap(), b"new");
    }

    #[test]
    fn merge_follows_element_across_rename() {
        // src edits the file text; tgt moves the file. Both survive.
        let base = base_txn();
        let mut src = Txn::begin_edit(base.clone());
        src.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(1)), "f", Payload::file("edited"))
            .unwrap();

        let mut tgt = Txn::begin_edit(base.clone());
        tgt.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(0)), "g", Payload::file("hi"))
            .unwrap();

        let conflicts = merge_into(&mut tgt, &src, &base);
        // Both sides changed e2, and not identically: that is a conflict on
        // the single element, by design.
        assert_eq!(conflicts.single_element.len(), 1);
        assert_eq!(conflicts.single_element[0].eid, Eid::new(2));
    }

    #[test]
    fn merge_identical_changes_are_clean() {
        let base = base_txn();
        let alter = |txn: &mut Txn| {
            txn.branch_mut(&bid("B0"))
                .unwrap()
                .alter_one(Eid::new(2), Some(Eid::new(0)), "same", Payload::file("hi"))
                .unwrap();
        };
        let mut src = Txn::begin_edit(base.clone());
        alter(&mut src);
        let mut tgt = Txn::begin_edit(base.clone());
        alter(&mut tgt);

        let conflicts = merge_into(&mut tgt, &src, &base);
        assert!(conflicts.is_empty());
        assert_eq!(
            tgt.branch(&bid("B0")).unwrap().path_of(Eid::new(2)).unwrap(),
            "same"
        );
    }

    #[test]
    fn rename_vs_rename_is_single_element_conflict() {
        let base = base_txn();
        let mut src = Txn::begin_edit(base.clone());
        src.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(1)), "n1", Payload::file("hi"))
            .unwrap();
        let mut tgt = Txn::begin_edit(base.clone());
        tgt.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(1)), "n2", Payload::file("hi"))
            .unwrap();

        let conflicts = merge_into(&mut tgt, &src, &base);
        assert_eq!(conflicts.counts(), (1, 0, 0));
        let c = &conflicts.single_element[0];
        assert_eq!(c.eid, Eid::new(2));
        assert_eq!(c.src.as_ref().unwrap().name, "n1");
        assert_eq!(c.tgt.as_ref().unwrap().name, "n2");
    }

    #[test]
    fn merge_symmetry_of_conflict_sets() {
        let base = base_txn();
        let mut a = Txn::begin_edit(base.clone());
        a.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(1)), "n1", Payload::file("hi"))
            .unwrap();
        let mut b = Txn::begin_edit(base.clone());
        b.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(1)), "n2", Payload::file("hi"))
            .unwrap();

        let mut tgt_ab = b.clone();
        let conflicts_ab = merge_into(&mut tgt_ab, &a, &base);
        let mut tgt_ba = a.clone();
        let conflicts_ba = merge_into(&mut tgt_ba, &b, &base);

        // Same conflict set modulo src/tgt labeling.
        assert_eq!(conflicts_ab.counts(), conflicts_ba.counts());
        assert_eq!(conflicts_ab.single_element[0].eid, conflicts_ba.single_element[0].eid);
        assert_eq!(
            conflicts_ab.single_element[0].src,
            conflicts_ba.single_element[0].tgt
        );
        assert_eq!(
            conflicts_ab.single_element[0].tgt,
            conflicts_ba.single_element[0].src
        );
    }

    #[test]
    fn merge_name_clash_detected() {
        // yca has e2 named "f" under e1. src renames e2 to "y" under e1;
        // tgt adds e3 "y" under e1.
        let base = base_txn();
        let mut src = Txn::begin_edit(base.clone());
        src.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(Eid::new(2), Some(Eid::new(1)), "y", Payload::file("hi"))
            .unwrap();

        let mut tgt = Txn::begin_edit(base.clone());
        let e3 = tgt.new_eid().unwrap();
        tgt.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(e3, Some(Eid::new(1)), "y", Payload::file("other"))
            .unwrap();

        let conflicts = merge_into(&mut tgt, &src, &base);
        assert_eq!(conflicts.counts(), (0, 1, 0));
        let clash = &conflicts.name_clash[0];
        assert_eq!(clash.parent, Eid::new(1));
        assert_eq!(clash.name, "y");
        assert_eq!(clash.eids, vec![Eid::new(2), e3]);
    }

    #[test]
    fn merge_orphan_detected() {
        // src deletes directory e1; tgt adds e3 under e1.
        let base = base_txn();
        let mut src = Txn::begin_edit(base.clone());
        {
            let b = src.branch_mut(&bid("B0")).unwrap();
            b.delete_one(Eid::new(2)).unwrap();
            b.delete_one(Eid::new(1)).unwrap();
        }

        let mut tgt = Txn::begin_edit(base.clone());
        let e3 = tgt.new_eid().unwrap();
        tgt.branch_mut(&bid("B0"))
            .unwrap()
            .alter_one(e3, Some(Eid::new(1)), "late", Payload::file("x"))
            .unwrap();

        let conflicts = merge_into(&mut tgt, &src, &base);
        assert_eq!(conflicts.single_element.len(), 0);
        assert!(
            conflicts.orphan.iter().any(|o| o.eid == e3),
            "the late addition is orphaned by the deleted parent: {conflicts:?}"
        );
    }

    #[test]
    fn pre_existing_orphans_are_not_reported() {
        let base = base_txn();
        let mut tgt = Txn::begin_edit(base.clone());
        // Delete e1, orphaning e2, before any merge.
        tgt.branch_mut(&bid("B0")).unwrap().delete_one(Eid::new(1)).unwrap();

        let conflicts = merge_into(&mut tgt, &base, &base);
        assert!(conflicts.is_empty(), "identity merge reports nothing: {conflicts:?}");
    }

    #[test]
    fn conflict_storage_error_counts() {
        let mut storage = ConflictStorage::new();
        storage.single_element.push(SingleElementConflict {
            bid: bid("B0"),
            eid: Eid::new(2),
            yca: None,
            src: None,
            tgt: None,
        });
        let err = storage.to_error("merge");
        assert!(format!("{err}").contains("1 single-element"));
    }
}
