//! End-to-end command scenarios: moves, copies, branch-and-delete, commit
//! lifecycle — all driven through the command layer against an in-memory
//! repository.

mod common;

use common::{bid, TestWc};
use elmover::repo::Repo as _;

// ==========================================================================
// Simple move
// ==========================================================================

#[test]
fn simple_move_is_one_element_mutation() {
    let mut t = TestWc::new();
    t.ok("mkdir a");
    t.put("a/b", "hi");
    t.ok("commit");
    let r_before = t.head();
    let file_eid = t.eid_at("a/b").expect("file exists");

    t.ok("mv a/b c");
    // Working tree: identity unchanged, path changed.
    assert_eq!(t.eid_at("c"), Some(file_eid));
    assert_eq!(t.eid_at("a/b"), None);
    assert_eq!(t.cat("c"), "hi");

    t.ok("commit");
    assert_eq!(t.head(), r_before + 1);

    // The two revisions differ by exactly one modified element.
    let left = t.wc.repo().load_branching_state(r(r_before)).unwrap();
    let right = t.wc.repo().load_branching_state(r(r_before + 1)).unwrap();
    let diff = left
        .branch(&bid("B0"))
        .unwrap()
        .tree()
        .differences(right.branch(&bid("B0")).unwrap().tree());
    assert_eq!(diff.len(), 1);
    let (e0, e1) = &diff[&file_eid];
    assert!(e0.is_some() && e1.is_some(), "a move is a modification");

    // And `log` reports one modified element for that revision.
    let out = t.ok(&format!("log .@{r_before} .@{}", r_before + 1));
    assert!(out.contains(&format!("r{} | ...", r_before + 1)), "{out}");
    let m_lines: Vec<&str> = out.lines().filter(|l| l.trim_start().starts_with('M')).collect();
    assert_eq!(m_lines.len(), 1, "{out}");
    assert!(m_lines[0].contains(&format!("e{}", file_eid.value())), "{out}");
}

#[test]
fn move_then_revert_restores_base() {
    let mut t = TestWc::new();
    t.ok("mkdir a");
    t.put("a/b", "hi");
    t.ok("commit");
    let file_eid = t.eid_at("a/b").unwrap();

    t.ok("mv a/b c");
    t.ok("revert");
    assert_eq!(t.eid_at("a/b"), Some(file_eid));
    assert_eq!(t.eid_at("c"), None);

    // Reverted working state commits as a no-op.
    let out = t.ok("commit");
    assert!(out.contains("There are no changes to commit."), "{out}");
}

// ==========================================================================
// Copy vs branch: identity semantics
// ==========================================================================

#[test]
fn cp_allocates_fresh_identities() {
    let mut t = TestWc::new();
    t.ok("mkdir dir");
    t.put("dir/f", "data");
    t.ok("commit");
    let orig = t.eid_at("dir/f").unwrap();

    t.ok("cp dir@1 copy");
    let copied = t.eid_at("copy/f").expect("copied file exists");
    assert_ne!(copied, orig, "a copy is a new element");
    assert_eq!(t.cat("copy/f"), "data");
    // The original is untouched.
    assert_eq!(t.eid_at("dir/f"), Some(orig));
}

#[test]
fn branch_and_delete_preserves_identity_and_removes_source() {
    let mut t = TestWc::new();
    t.ok("mkdir dir");
    t.put("dir/file", "content");
    t.ok("mkdir target");
    t.ok("commit");
    let dir_eid = t.eid_at("dir").unwrap();
    let file_eid = t.eid_at("dir/file").unwrap();

    t.ok("branch-and-delete dir target/moved");

    // The source branch no longer has the subtree: the dir element is gone
    // and the file has no path (its orphan entry is retained by design).
    let b0 = t.wc.edit_txn().branch(&bid("B0")).unwrap();
    assert!(b0.element(dir_eid).is_none());
    assert!(b0.path_of(file_eid).is_none());
    assert_eq!(t.eid_at("dir"), None);
    assert_eq!(t.eid_at("dir/file"), None);

    // The new branch is rooted at the old dir element, same EIDs inside.
    let at = t.wc.find_el_rev(None, None, "target/moved").unwrap();
    assert_eq!(at.eid, Some(dir_eid), "branch root EID equals the source root");
    let nested = t.wc.edit_txn().branch(&at.bid).unwrap();
    assert_eq!(nested.root_eid(), dir_eid);
    assert_eq!(nested.path_of(file_eid).unwrap(), "file");
}

#[test]
fn tbranch_makes_a_top_level_branch_with_preserved_root() {
    let mut t = TestWc::new();
    t.ok("mkdir d");
    t.put("d/f", "x");
    t.ok("commit");
    let root_eid = t.eid_at("").unwrap();
    let f_eid = t.eid_at("d/f").unwrap();

    t.ok("tbranch .");
    let new_bid = t.wc.working_bid().clone();
    assert_ne!(new_bid, bid("B0"));
    assert_eq!(new_bid.depth(), 0, "top-level branch");

    let new_branch = t.wc.edit_txn().branch(&new_bid).unwrap();
    assert_eq!(new_branch.root_eid(), root_eid);
    assert_eq!(new_branch.path_of(f_eid).unwrap(), "d/f");

    // Committing on the new branch creates it in the repository.
    t.put("d/f", "changed");
    t.ok("commit");
    let head = t.wc.repo().load_branching_state(r(t.head())).unwrap();
    let committed = t.wc.working_bid().clone();
    assert!(head.branch(&committed).is_some());
    // B0 is unchanged at head.
    assert_eq!(
        head.branch(&bid("B0"))
            .unwrap()
            .element(f_eid)
            .unwrap()
            .payload
            .text()
            .unwrap(),
        b"x"
    );
}

#[test]
fn branch_into_reuses_identities_in_target_branch() {
    let mut t = TestWc::new();
    t.ok("mkdir dir");
    t.put("dir/f", "v");
    t.ok("mkbranch nest");
    t.ok("commit");
    let f_eid = t.eid_at("dir/f").unwrap();

    t.ok("branch-into-and-delete dir nest/dir");
    let at = t.wc.find_el_rev(None, None, "nest/dir/f").unwrap();
    assert_eq!(at.eid, Some(f_eid), "identity crossed the branch boundary");
    assert_eq!(at.bid.depth(), 1, "now inside the nested branch");
    assert_eq!(t.eid_at("dir"), None, "source deleted");
}

// ==========================================================================
// Unchanged commit
// ==========================================================================

#[test]
fn unchanged_commit_aborts_and_keeps_head() {
    let mut t = TestWc::new();
    t.ok("mkdir a");
    t.ok("commit");
    assert_eq!(t.head(), 1);

    let out = t.ok("commit");
    assert!(out.contains("There are no changes to commit."), "{out}");
    assert_eq!(t.head(), 1, "head revision unchanged");
    assert_eq!(t.wc.head_rev().value(), 1);
}

// ==========================================================================
// Deletion and orphans
// ==========================================================================

#[test]
fn rm_orphans_descendants_but_keeps_entries() {
    let mut t = TestWc::new();
    t.ok("mkdir a mkdir a/b");
    t.put("a/b/f", "x");
    let f_eid = t.eid_at("a/b/f").unwrap();

    t.ok("rm a");
    assert_eq!(t.eid_at("a"), None);
    let b0 = t.wc.edit_txn().branch(&bid("B0")).unwrap();
    assert!(b0.element(f_eid).is_some(), "orphan entry retained");
    assert!(b0.path_of(f_eid).is_none(), "but pathless");
}

#[test]
fn orphan_resurrected_by_move_in_same_txn() {
    let mut t = TestWc::new();
    t.ok("mkdir a mkdir keep");
    t.put("a/f", "x");
    let f_eid = t.eid_at("a/f").unwrap();
    t.ok("rm a");

    // Re-parent the orphaned file back into the tree.
    let b0 = bid("B0");
    let keep = t.eid_at("keep").unwrap();
    t.wc
        .edit_txn_mut()
        .branch_mut(&b0)
        .unwrap()
        .alter_one(f_eid, Some(keep), "rescued", elmover::model::element::Payload::file("x"))
        .unwrap();
    assert_eq!(t.eid_at("keep/rescued"), Some(f_eid));
}

// ==========================================================================
// Log messages
// ==========================================================================

#[test]
fn commit_log_defaults_to_command_list() {
    let mut t = TestWc::new();
    t.ok("mkdir one mkdir two");
    t.ok("commit");
    let props = t.wc.repo().revprops(r(1)).unwrap();
    let log = props.get(elmover::repo::REVPROP_LOG).unwrap();
    assert!(log.contains("mkdir one"));
    assert!(log.contains("mkdir two"));
}

// ==========================================================================
// helpers
// ==========================================================================

fn r(n: u64) -> elmover::model::ids::RevNum {
    elmover::model::ids::RevNum::new(n)
}
