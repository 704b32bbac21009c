//! Migration from non-move-tracking history.
//!
//! Legacy revisions know nothing about elements: their tree deltas speak in
//! paths (add, open, delete). [`MigrationShim`] receives those deltas one
//! revision at a time, keeps resolving paths against the working branch as
//! it mutates it, and consults the repository's move-info table so that a
//! delete/add pair recorded as a move becomes a single element alteration —
//! preserving the element's identity — instead of a delete plus an add with
//! a fresh identity.

use std::collections::BTreeMap;

use crate::branch::txn::Txn;
use crate::error::{EngineError, Result};
use crate::model::element::{Payload, Props};
use crate::model::ids::{BranchId, Eid, RevNum};
use crate::repo::{LegacyReplayVisitor, MoveInfo, TreeDeltaEvent};

// ---------------------------------------------------------------------------
// MigrationShim
// ---------------------------------------------------------------------------

/// Translates legacy tree-delta events into element mutations on one branch
/// of an edit txn.
pub struct MigrationShim<'a> {
    txn: &'a mut Txn,
    bid: BranchId,
    moves: BTreeMap<RevNum, Vec<MoveInfo>>,
}

impl<'a> MigrationShim<'a> {
    /// A shim applying to branch `bid` of `txn`, consulting `moves`.
    pub fn new(txn: &'a mut Txn, bid: BranchId, moves: BTreeMap<RevNum, Vec<MoveInfo>>) -> Self {
        Self { txn, bid, moves }
    }

    fn resolve(&self, path: &str) -> Result<Eid> {
        self.branch()?
            .eid_at_path(path)
            .ok_or_else(|| EngineError::branching("migrate", format!("no element at path '{path}'")))
    }

    /// Resolve a path's parent directory and final name component.
    fn resolve_parent(&self, path: &str) -> Result<(Eid, String)> {
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", path),
        };
        if name.is_empty() {
            return Err(EngineError::branching(
                "migrate",
                format!("path '{path}' has no final component"),
            ));
        }
        let parent = self.branch()?.eid_at_path(dir).ok_or_else(|| {
            EngineError::branching("migrate", format!("no element at path '{dir}'"))
        })?;
        Ok((parent, name.to_owned()))
    }

    fn branch(&self) -> Result<&crate::branch::state::BranchState> {
        self.txn
            .branch(&self.bid)
            .ok_or_else(|| EngineError::Branching(format!("branch {} not found", self.bid)))
    }
}

impl LegacyReplayVisitor for MigrationShim<'_> {
    fn revision(&mut self, rev: RevNum, events: &[TreeDeltaEvent]) -> Result<()> {
        tracing::debug!(%rev, events = events.len(), "migrate: replaying legacy revision");
        let moves = self.moves.get(&rev).cloned().unwrap_or_default();
        let move_to_for_source: BTreeMap<&str, &str> = moves
            .iter()
            .map(|m| (m.from_path.as_str(), m.to_path.as_str()))
            .collect();
        let move_targets: BTreeMap<&str, &str> = moves
            .iter()
            .map(|m| (m.to_path.as_str(), m.from_path.as_str()))
            .collect();

        // Text carried by an add that is really the target half of a move:
        // the move may also have edited the file.
        let mut moved_text: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        for event in events {
            match event {
                TreeDeltaEvent::AddDir { path } => {
                    if move_targets.contains_key(path.as_str()) {
                        tracing::debug!(%path, "migrate: add is a move target, deferred");
                        continue;
                    }
                    let (parent, name) = self.resolve_parent(path)?;
                    let eid = self.txn.new_eid()?;
                    self.txn
                        .branch_mut(&self.bid)?
                        .alter_checked(eid, Some(parent), &name, Payload::dir())?;
                }
                TreeDeltaEvent::AddFile { path, text } => {
                    if move_targets.contains_key(path.as_str()) {
                        tracing::debug!(%path, "migrate: add is a move target, deferred");
                        moved_text.insert(path.clone(), text.clone());
                        continue;
                    }
                    let (parent, name) = self.resolve_parent(path)?;
                    let eid = self.txn.new_eid()?;
                    self.txn.branch_mut(&self.bid)?.alter_checked(
                        eid,
                        Some(parent),
                        &name,
                        Payload::file(text.clone()),
                    )?;
                }
                TreeDeltaEvent::OpenFile { path, text } => {
                    let eid = self.resolve(path)?;
                    let element = self.branch()?.element(eid).cloned().ok_or_else(|| {
                        EngineError::branching("migrate", format!("no element at path '{path}'"))
                    })?;
                    let props = element.payload.props().cloned().unwrap_or_default();
                    self.txn.branch_mut(&self.bid)?.alter_one(
                        eid,
                        element.parent,
                        &element.name,
                        Payload::File {
                            props,
                            text: text.clone(),
                        },
                    )?;
                }
                TreeDeltaEvent::Delete { path } => {
                    if let Some(to_path) = move_to_for_source.get(path.as_str()) {
                        // The delete half of a recorded move: one alteration
                        // of one element, not delete-plus-add.
                        let eid = self.resolve(path)?;
                        let (parent, name) = self.resolve_parent(to_path)?;
                        let old = self.branch()?.element(eid).cloned().ok_or_else(|| {
                            EngineError::branching("migrate", format!("no element at '{path}'"))
                        })?;
                        let payload = match (moved_text.remove(*to_path), old.payload) {
                            (Some(text), Payload::File { props, .. }) => {
                                Payload::File { props, text }
                            }
                            (Some(text), _) => Payload::File {
                                props: Props::new(),
                                text,
                            },
                            (None, payload) => payload,
                        };
                        tracing::debug!(from = %path, to = %to_path, %eid, "migrate: move");
                        self.txn
                            .branch_mut(&self.bid)?
                            .alter_one(eid, Some(parent), &name, payload)?;
                    } else {
                        let eid = self.resolve(path)?;
                        self.txn.branch_mut(&self.bid)?.delete_one(eid)?;
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
