//! Element trees: the EID → content mapping underlying every branch.
//!
//! An element tree is a finite map from EID to element content together with
//! a distinguished root EID. Elements whose ancestor chain does not reach the
//! root are *orphans*: they stay in the map (so a later operation can
//! re-parent them back in) but have no path. The structural diff
//! [`ElementTree::differences`] — symmetric difference keyed by EID, modulo
//! deep content equality — is the contract the whole engine is built on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::element::{content_equal, Element};
use crate::model::ids::Eid;

// ---------------------------------------------------------------------------
// ElementTree
// ---------------------------------------------------------------------------

/// A snapshot of element contents keyed by EID, rooted at `root_eid`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementTree {
    root_eid: Eid,
    elements: BTreeMap<Eid, Element>,
}

/// One entry of a tree diff: the left and right contents of an element that
/// differs between two trees. `(Some, None)` is deleted-on-right,
/// `(None, Some)` is added-on-right, `(Some, Some)` is modified.
pub type DiffEntry = (Option<Element>, Option<Element>);

impl ElementTree {
    /// Create an empty tree rooted at `root_eid`. The root element itself is
    /// not yet instantiated; the caller populates it with [`Self::set`].
    #[must_use]
    pub fn new(root_eid: Eid) -> Self {
        Self {
            root_eid,
            elements: BTreeMap::new(),
        }
    }

    /// The distinguished root EID.
    #[must_use]
    pub const fn root_eid(&self) -> Eid {
        self.root_eid
    }

    /// Constant-time content lookup.
    #[must_use]
    pub fn get(&self, eid: Eid) -> Option<&Element> {
        self.elements.get(&eid)
    }

    /// Returns `true` if the element is present in the map (possibly as an
    /// orphan).
    #[must_use]
    pub fn contains(&self, eid: Eid) -> bool {
        self.elements.contains_key(&eid)
    }

    /// Number of elements in the map, orphans included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` if the map holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterate over all `(eid, content)` entries, orphans included, in EID
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (Eid, &Element)> {
        self.elements.iter().map(|(eid, el)| (*eid, el))
    }

    /// Upsert an element's content. Mutation primitive used only by the
    /// branch layer; invariants are the caller's concern.
    pub fn set(&mut self, eid: Eid, content: Element) {
        self.elements.insert(eid, content);
    }

    /// Remove an element from the map. Descendants are not touched; they
    /// become orphans.
    pub fn unset(&mut self, eid: Eid) {
        self.elements.remove(&eid);
    }

    // -- path lookups -------------------------------------------------------

    /// The `/`-joined name chain from the root to `eid`, or `None` if `eid`
    /// is absent or an orphan. The root's path is the empty string.
    ///
    /// Cycle-safe: a parent chain that loops never reaches the root, so a
    /// cyclic element is reported as an orphan.
    #[must_use]
    pub fn path_of(&self, eid: Eid) -> Option<String> {
        let mut names: Vec<&str> = Vec::new();
        let mut cur = eid;
        // A chain longer than the map must have revisited an element.
        for _ in 0..=self.elements.len() {
            let el = self.get(cur)?;
            match el.parent {
                None => {
                    if cur != self.root_eid {
                        return None;
                    }
                    names.reverse();
                    return Some(names.join("/"));
                }
                Some(parent) => {
                    names.push(&el.name);
                    cur = parent;
                }
            }
        }
        None
    }

    /// Walk `relpath` down from the root, matching names. The empty path
    /// resolves to the root. Returns `None` if any component is missing.
    #[must_use]
    pub fn eid_at_path(&self, relpath: &str) -> Option<Eid> {
        let mut cur = self.root_eid;
        self.get(cur)?;
        for name in relpath.split('/').filter(|c| !c.is_empty()) {
            cur = self.child_by_name(cur, name)?;
        }
        Some(cur)
    }

    /// Find the child of `parent` with the given name, ignoring orphans
    /// elsewhere in the map.
    #[must_use]
    pub fn child_by_name(&self, parent: Eid, name: &str) -> Option<Eid> {
        self.elements
            .iter()
            .find(|(_, el)| el.parent == Some(parent) && el.name == name)
            .map(|(eid, _)| *eid)
    }

    /// All direct children of `parent`, in EID order.
    pub fn children(&self, parent: Eid) -> impl Iterator<Item = (Eid, &Element)> {
        self.elements
            .iter()
            .filter(move |(_, el)| el.parent == Some(parent))
            .map(|(eid, el)| (*eid, el))
    }

    /// Returns `true` if `eid` is present and its ancestor chain reaches the
    /// root.
    #[must_use]
    pub fn is_reachable(&self, eid: Eid) -> bool {
        self.path_of(eid).is_some()
    }

    // -- diff ---------------------------------------------------------------

    /// Structural equality: same root and element-for-element deep equality.
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool {
        self.root_eid == other.root_eid && self.elements == other.elements
    }

    /// Symmetric difference keyed by EID, modulo deep content equality.
    ///
    /// Iterates the union of both key sets and includes an entry iff the two
    /// sides differ. Orphans participate like any other element.
    #[must_use]
    pub fn differences(&self, right: &Self) -> BTreeMap<Eid, DiffEntry> {
        let mut diff = BTreeMap::new();
        let union = self
            .elements
            .keys()
            .chain(right.elements.keys())
            .copied()
            .collect::<std::collections::BTreeSet<_>>();
        for eid in union {
            let left_el = self.get(eid);
            let right_el = right.get(eid);
            if !content_equal(left_el, right_el) {
                diff.insert(eid, (left_el.cloned(), right_el.cloned()));
            }
        }
        diff
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
