//! Migration of legacy (pre-move-tracking) revisions through the shim:
//! recorded moves become single element alterations, everything else stays
//! a plain add/delete/edit.

mod common;

use common::TestWc;
use elmover::model::ids::RevNum;
use elmover::repo::memory::LegacyRevision;
use elmover::repo::{MoveInfo, TreeDeltaEvent};

/// History: r1 adds `dir/` and `dir/file`; r2 renamed `dir/file` to
/// `renamed` the legacy way (delete + add), with the move recorded in the
/// repository's move-info table.
fn seeded() -> TestWc {
    let mut t = TestWc::new();
    t.ok("mkdir dir");
    t.put("dir/file", "v1");
    t.ok("commit"); // r1

    // r2 as it was actually committed, pre-move-tracking: the identity of
    // dir/file was lost in the process.
    t.ok("rm dir/file");
    t.put("renamed", "v1");
    t.ok("commit"); // r2

    t.wc.repo_mut().add_legacy_revision(
        RevNum::new(2),
        LegacyRevision {
            events: vec![
                TreeDeltaEvent::AddFile {
                    path: "renamed".to_owned(),
                    text: b"v1".to_vec(),
                },
                TreeDeltaEvent::Delete {
                    path: "dir/file".to_owned(),
                },
            ],
            moves: vec![MoveInfo {
                from_path: "dir/file".to_owned(),
                to_path: "renamed".to_owned(),
            }],
        },
    );
    t
}

#[test]
fn migrate_recovers_the_move_as_one_mutation() {
    let mut t = seeded();

    // Work from r1, where the original identity still exists.
    let old_eid = t.eid_at_rev("dir/file", 1).unwrap();
    t.ok("switch .@1");
    t.ok("migrate .@2");

    // The shim expressed r2's delete+add as a single alteration of the
    // original element.
    assert_eq!(t.eid_at("renamed"), Some(old_eid));
    assert_eq!(t.eid_at("dir/file"), None);

    // Compare with the legacy commit itself, where identity was lost.
    let legacy_eid = t.eid_at_rev("renamed", 2).unwrap();
    assert_ne!(legacy_eid, old_eid);
}

#[test]
fn migrate_applies_plain_edits_too() {
    let mut t = TestWc::new();
    t.put("doc", "old");
    t.ok("commit"); // r1
    t.put("doc", "new");
    t.ok("mkdir extra");
    t.ok("commit"); // r2
    t.wc.repo_mut().add_legacy_revision(
        RevNum::new(2),
        LegacyRevision {
            events: vec![
                TreeDeltaEvent::OpenFile {
                    path: "doc".to_owned(),
                    text: b"new".to_vec(),
                },
                TreeDeltaEvent::AddDir {
                    path: "extra".to_owned(),
                },
            ],
            moves: Vec::new(),
        },
    );

    t.ok("switch .@1");
    let doc_eid = t.eid_at("doc").unwrap();
    t.ok("migrate .@2");

    assert_eq!(t.eid_at("doc"), Some(doc_eid), "open keeps identity");
    assert_eq!(t.cat("doc"), "new");
    assert!(t.eid_at("extra").is_some());
}

#[test]
fn migrate_requires_an_in_range_revision() {
    let mut t = seeded();
    let err = t.run("migrate .@9").unwrap_err();
    assert!(matches!(err, elmover::error::EngineError::NoSuchRevision { .. }));
}
