//! Branch state: one branch's element tree plus its identity.
//!
//! A branch's `bid`, `predecessor` and `root_eid` are read-only after
//! construction; the element at `root_eid` may have its payload altered but
//! can never be reparented or deleted.
//!
//! Mutations come in two strengths. [`BranchState::alter_one`] is the upsert
//! primitive used by replay and merge: it enforces only the shape invariants
//! (root/parent agreement, single-component names), because replayed and
//! merged trees legitimately pass through — and may end in — states with
//! orphans or clashing names, which the merge validator reports as conflicts.
//! [`BranchState::alter_checked`] is the command-surface variant that
//! additionally requires an existing parent and sibling-name uniqueness.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::element::{Element, Payload};
use crate::model::ids::{BranchId, Eid, RevBid};
use crate::model::subtree::Subtree;
use crate::model::tree::ElementTree;

// ---------------------------------------------------------------------------
// BranchState
// ---------------------------------------------------------------------------

/// A mutable branch: identity, predecessor link, and element tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchState {
    bid: BranchId,
    predecessor: Option<RevBid>,
    root_eid: Eid,
    tree: ElementTree,
}

impl BranchState {
    /// Create a branch with an empty tree rooted at `root_eid`. The caller
    /// follows up with [`Self::alter_one`] to instantiate the root element.
    #[must_use]
    pub fn new(bid: BranchId, root_eid: Eid, predecessor: Option<RevBid>) -> Self {
        Self {
            bid,
            predecessor,
            root_eid,
            tree: ElementTree::new(root_eid),
        }
    }

    /// The branch id.
    #[must_use]
    pub const fn bid(&self) -> &BranchId {
        &self.bid
    }

    /// The `(revision, branch id)` this branch was derived from, if any.
    #[must_use]
    pub const fn predecessor(&self) -> Option<&RevBid> {
        self.predecessor.as_ref()
    }

    /// The fixed root EID.
    #[must_use]
    pub const fn root_eid(&self) -> Eid {
        self.root_eid
    }

    /// Rebuild this branch with a different predecessor link. Used by the
    /// repository when persisting a revision: the stored incarnation of a
    /// pre-existing branch points at its previous revision.
    #[must_use]
    pub fn with_predecessor(mut self, predecessor: Option<RevBid>) -> Self {
        self.predecessor = predecessor;
        self
    }

    /// The branch's element tree.
    #[must_use]
    pub const fn tree(&self) -> &ElementTree {
        &self.tree
    }

    /// Content lookup, delegating to the tree.
    #[must_use]
    pub fn element(&self, eid: Eid) -> Option<&Element> {
        self.tree.get(eid)
    }

    /// Path lookup, delegating to the tree.
    #[must_use]
    pub fn path_of(&self, eid: Eid) -> Option<String> {
        self.tree.path_of(eid)
    }

    /// Path → EID lookup, delegating to the tree.
    #[must_use]
    pub fn eid_at_path(&self, relpath: &str) -> Option<Eid> {
        self.tree.eid_at_path(relpath)
    }

    /// Returns `true` if `eid` is this branch's root element.
    #[must_use]
    pub fn is_root(&self, eid: Eid) -> bool {
        eid == self.root_eid
    }

    // -- mutation -----------------------------------------------------------

    /// Upsert one element's content.
    ///
    /// Shape preconditions: `parent` is `None` iff `eid` is the branch root
    /// (`RootReparent` otherwise); the name is empty iff the parent is
    /// `None`, and contains no `/`; an element cannot be its own parent
    /// (`BadParent`). The parent is *not* required to exist yet, and sibling
    /// names are *not* checked — see the module docs.
    ///
    /// # Errors
    /// `RootReparent`, `BadParent`, or `Branching` for name-shape violations.
    pub fn alter_one(
        &mut self,
        eid: Eid,
        parent: Option<Eid>,
        name: &str,
        payload: Payload,
    ) -> Result<()> {
        if parent.is_none() != (eid == self.root_eid) {
            return Err(EngineError::RootReparent(eid));
        }
        if parent == Some(eid) {
            return Err(EngineError::BadParent { eid, parent: eid });
        }
        let content = match parent {
            None => Element::root(payload),
            Some(parent) => Element::new(parent, name.to_owned(), payload),
        };
        content.check()?;
        self.tree.set(eid, content);
        Ok(())
    }

    /// Upsert with the full command-surface preconditions: the parent must
    /// already exist in this branch, and no reachable sibling may carry the
    /// same name.
    ///
    /// # Errors
    /// `BadParent` if the parent is absent, `NameClash` on a sibling-name
    /// collision, plus everything [`Self::alter_one`] reports.
    pub fn alter_checked(
        &mut self,
        eid: Eid,
        parent: Option<Eid>,
        name: &str,
        payload: Payload,
    ) -> Result<()> {
        if let Some(parent_eid) = parent {
            if !self.tree.contains(parent_eid) {
                return Err(EngineError::BadParent {
                    eid,
                    parent: parent_eid,
                });
            }
            if let Some(existing) = self.tree.child_by_name(parent_eid, name) {
                if existing != eid && self.tree.is_reachable(existing) {
                    return Err(EngineError::NameClash {
                        parent: parent_eid,
                        name: name.to_owned(),
                    });
                }
            }
        }
        self.alter_one(eid, parent, name, payload)
    }

    /// Remove one element. Descendants become orphans; their entries stay in
    /// the map so a later operation can re-parent them.
    ///
    /// # Errors
    /// `Branching` if `eid` is the branch root.
    pub fn delete_one(&mut self, eid: Eid) -> Result<()> {
        if eid == self.root_eid {
            return Err(EngineError::Branching(format!(
                "cannot delete the root element {eid} of branch {}",
                self.bid
            )));
        }
        self.tree.unset(eid);
        Ok(())
    }

    // -- subtrees -----------------------------------------------------------

    /// The subtree rooted at `at`, without nested-subbranch recursion (the
    /// transaction layer attaches those). `None` if `at` is absent or an
    /// orphan.
    #[must_use]
    pub fn subtree(&self, at: Eid) -> Option<Subtree> {
        Subtree::extract(&self.tree, at)
    }

    /// Write every element of `tree` into this branch, replacing existing
    /// contents. Used by branch instantiation; tree-level primitive on
    /// purpose: the incoming subtree was validated where it was extracted.
    pub(crate) fn instantiate_elements(&mut self, tree: &ElementTree) {
        for (eid, el) in tree.iter() {
            self.tree.set(eid, el.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
