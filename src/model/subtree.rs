//! Subtrees: a tree slice rooted at an element, with its nested subbranches.
//!
//! Copy and branch operations work on subtrees: the portion of an element
//! tree reachable from a given EID, normalized so the subtree root's content
//! has no parent and an empty name, together with the subtrees of any nested
//! branches anchored inside it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::element::Element;
use crate::model::ids::Eid;
use crate::model::tree::ElementTree;

// ---------------------------------------------------------------------------
// Subtree
// ---------------------------------------------------------------------------

/// A portion of an element tree rooted at a given EID, together with the
/// nested subbranches anchored at subbranch-root elements inside it, keyed
/// by their outer (anchor) EID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtree {
    /// The elements of the subtree; the root's content is normalized to
    /// `(parent: None, name: "")`.
    pub tree: ElementTree,
    /// Nested subbranch subtrees, keyed by the anchoring element in `tree`.
    pub subbranches: BTreeMap<Eid, Subtree>,
}

impl Subtree {
    /// Extract the subtree of `tree` rooted at `at`, without subbranch
    /// recursion (the transaction layer supplies that, since only it can see
    /// sibling branches). Returns `None` if `at` is absent or an orphan.
    #[must_use]
    pub fn extract(tree: &ElementTree, at: Eid) -> Option<Self> {
        let root_el = tree.get(at)?;
        tree.path_of(at)?;

        let mut slice = ElementTree::new(at);
        slice.set(at, Element::root(root_el.payload.clone()));
        // Take every element whose ancestor chain passes through `at`.
        for (eid, el) in tree.iter() {
            if eid == at {
                continue;
            }
            if Self::chain_passes_through(tree, eid, at) {
                slice.set(eid, el.clone());
            }
        }
        Some(Self {
            tree: slice,
            subbranches: BTreeMap::new(),
        })
    }

    /// The anchor EIDs of subbranch-root elements present in this subtree's
    /// own tree (whether or not a subbranch entry has been attached yet).
    #[must_use]
    pub fn subbranch_anchor_eids(&self) -> Vec<Eid> {
        self.tree
            .iter()
            .filter(|(_, el)| el.payload.is_subbranch_root())
            .map(|(eid, _)| eid)
            .collect()
    }

    /// True if `eid`'s parent chain in `tree` reaches `anchor` before the
    /// tree root, without looping.
    fn chain_passes_through(tree: &ElementTree, eid: Eid, anchor: Eid) -> bool {
        let mut cur = eid;
        for _ in 0..=tree.len() {
            let Some(el) = tree.get(cur) else { return false };
            match el.parent {
                None => return false,
                Some(parent) if parent == anchor => return true,
                Some(parent) => cur = parent,
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::element::Payload;

    /// `e0(root)/{e1 "a"/{e2 "b" file}, e3 "c"}` plus orphan e9.
    fn sample_tree() -> ElementTree {
        let mut tree = ElementTree::new(Eid::new(0));
        tree.set(Eid::new(0), Element::root(Payload::dir()));
        tree.set(Eid::new(1), Element::new(Eid::new(0), "a".to_owned(), Payload::dir()));
        tree.set(
            Eid::new(2),
            Element::new(Eid::new(1), "b".to_owned(), Payload::file("hi")),
        );
        tree.set(Eid::new(3), Element::new(Eid::new(0), "c".to_owned(), Payload::dir()));
        tree.set(
            Eid::new(9),
            Element::new(Eid::new(99), "lost".to_owned(), Payload::dir()),
        );
        tree
    }

    #[test]
    fn extract_normalizes_root() {
        let sub = Subtree::extract(&sample_tree(), Eid::new(1)).unwrap();
        assert_eq!(sub.tree.root_eid(), Eid::new(1));
        let root = sub.tree.get(Eid::new(1)).unwrap();
        assert!(root.is_root());
        assert!(root.name.is_empty());
    }

    #[test]
    fn extract_takes_descendants_only() {
        let sub = Subtree::extract(&sample_tree(), Eid::new(1)).unwrap();
        assert!(sub.tree.contains(Eid::new(2)));
        assert!(!sub.tree.contains(Eid::new(3)));
        assert!(!sub.tree.contains(Eid::new(9)), "orphans are not part of any subtree");
        assert_eq!(sub.tree.path_of(Eid::new(2)).unwrap(), "b");
    }

    #[test]
    fn extract_preserves_eids() {
        let sub = Subtree::extract(&sample_tree(), Eid::new(1)).unwrap();
        let eids: Vec<Eid> = sub.tree.iter().map(|(eid, _)| eid).collect();
        assert_eq!(eids, vec![Eid::new(1), Eid::new(2)]);
    }

    #[test]
    fn extract_of_whole_tree() {
        let sub = Subtree::extract(&sample_tree(), Eid::new(0)).unwrap();
        assert_eq!(sub.tree.len(), 4, "everything reachable, orphan excluded");
    }

    #[test]
    fn extract_missing_or_orphan_is_none() {
        assert!(Subtree::extract(&sample_tree(), Eid::new(42)).is_none());
        assert!(Subtree::extract(&sample_tree(), Eid::new(9)).is_none());
    }

    #[test]
    fn subbranch_anchor_eids_lists_markers() {
        let mut tree = sample_tree();
        tree.set(
            Eid::new(4),
            Element::new(Eid::new(1), "nested".to_owned(), Payload::Subbranch),
        );
        let sub = Subtree::extract(&tree, Eid::new(1)).unwrap();
        assert_eq!(sub.subbranch_anchor_eids(), vec![Eid::new(4)]);
    }
}
