//! The in-memory workspace: a base state, a working state, and the edit txn
//! between them.
//!
//! A workspace pairs a read-only base (a revision plus a branch) with a
//! working branch living inside an edit transaction. `checkout`, `switch`,
//! `update` and `commit` atomically replace the edit txn with a newly
//! checked-out one; `revert` replays the working state back onto the base.
//! There is no on-disk working copy — the workspace is memory only.

pub mod args;
pub mod commands;

use crate::branch::txn::Txn;
use crate::error::{EngineError, Result};
use crate::merge::{branch_merge, ConflictStorage, MergeSource};
use crate::migrate::MigrationShim;
use crate::model::ids::{BranchId, Eid, ElRev, RevBid, RevNum};
use crate::repo::{Repo, RevProps};
use crate::replay::{branch_replay, BranchRef};

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What `mv` does when source and target are in different branches.
///
/// A cross-branch move is not automatic; the engine offers three explicit
/// operations, and `AskUser` defers the choice to the interactive prompt.
/// In non-interactive contexts `AskUser` is an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CrossBranchMovePolicy {
    /// `cp SOURCE TARGET; rm SOURCE` — new element identities.
    CopyAndDelete,
    /// `branch SOURCE TARGET; rm SOURCE` — a new nested branch.
    BranchAndDelete,
    /// `branch-into SOURCE TARGET; rm SOURCE` — same identities in the
    /// target branch.
    BranchIntoAndDelete,
    /// Prompt interactively; error in batch mode.
    #[default]
    AskUser,
}

/// What `branch-into` does when a source element already exists in the
/// target branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BranchIntoPolicy {
    /// Overwrite the existing element instances ("theirs" resolution).
    #[default]
    Overwrite,
    /// Fail the command on any collision.
    FailOnExisting,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// The outcome of a successful commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The new revision.
    pub revision: RevNum,
    /// The branch the commit landed on (differs from the working branch id
    /// when the commit created a new top-level branch).
    pub committed_bid: BranchId,
}

/// An in-memory workspace over a repository.
#[derive(Debug)]
pub struct Workspace<R: Repo> {
    repo: R,
    head_rev: RevNum,
    base_rev: RevNum,
    base_bid: BranchId,
    base_txn: Txn,
    working_bid: BranchId,
    edit_txn: Txn,
    list_of_commands: Vec<String>,
}

impl<R: Repo> Workspace<R> {
    /// Check out a workspace at `rev` (default: head) on branch `bid`
    /// (default: `B0`).
    ///
    /// # Errors
    /// `NoSuchRevision`; `Branching` if the branch does not exist there.
    pub fn checkout(repo: R, rev: Option<RevNum>, bid: Option<BranchId>) -> Result<Self> {
        let head_rev = repo.head_revnum();
        let bid = bid.unwrap_or_else(|| BranchId::top(Eid::new(0)));
        let (base_rev, base_txn, edit_txn) = Self::load(&repo, rev, &bid, head_rev)?;
        Ok(Self {
            repo,
            head_rev,
            base_rev,
            base_bid: bid.clone(),
            base_txn,
            working_bid: bid,
            edit_txn,
            list_of_commands: Vec::new(),
        })
    }

    /// Re-check-out in place, discarding the current edit txn. Used by
    /// `commit`, `update` and `switch`.
    ///
    /// # Errors
    /// Same as [`Self::checkout`]; on error the workspace is unchanged.
    pub fn re_checkout(&mut self, rev: Option<RevNum>, bid: &BranchId) -> Result<()> {
        let head_rev = self.repo.head_revnum();
        let (base_rev, base_txn, edit_txn) = Self::load(&self.repo, rev, bid, head_rev)?;
        self.head_rev = head_rev;
        self.base_rev = base_rev;
        self.base_bid = bid.clone();
        self.base_txn = base_txn;
        self.working_bid = bid.clone();
        self.edit_txn = edit_txn;
        Ok(())
    }

    fn load(
        repo: &R,
        rev: Option<RevNum>,
        bid: &BranchId,
        head_rev: RevNum,
    ) -> Result<(RevNum, Txn, Txn)> {
        let base_rev = rev.unwrap_or(head_rev);
        if base_rev > head_rev {
            return Err(EngineError::NoSuchRevision {
                rev: base_rev.value(),
                head: head_rev.value(),
            });
        }
        let base_txn = repo.load_branching_state(base_rev)?;
        if base_txn.branch(bid).is_none() {
            return Err(EngineError::Branching(format!(
                "cannot check out: branch {bid} not found in {base_rev}"
            )));
        }
        let edit_txn = Txn::begin_edit(base_txn.clone());
        Ok((base_rev, base_txn, edit_txn))
    }

    // -- accessors ----------------------------------------------------------

    /// The underlying repository.
    pub const fn repo(&self) -> &R {
        &self.repo
    }

    /// The underlying repository, mutably.
    pub const fn repo_mut(&mut self) -> &mut R {
        &mut self.repo
    }

    /// The latest revision the workspace knows about.
    #[must_use]
    pub const fn head_rev(&self) -> RevNum {
        self.head_rev
    }

    /// The base revision.
    #[must_use]
    pub const fn base_rev(&self) -> RevNum {
        self.base_rev
    }

    /// The base branch id.
    #[must_use]
    pub const fn base_bid(&self) -> &BranchId {
        &self.base_bid
    }

    /// The working branch id.
    #[must_use]
    pub const fn working_bid(&self) -> &BranchId {
        &self.working_bid
    }

    /// Point the working state at another branch in the edit txn (used by
    /// `tbranch`, which continues on the branch it created).
    pub fn set_working_bid(&mut self, bid: BranchId) {
        self.working_bid = bid;
    }

    /// The read-only base txn.
    #[must_use]
    pub const fn base_txn(&self) -> &Txn {
        &self.base_txn
    }

    /// The edit txn.
    #[must_use]
    pub const fn edit_txn(&self) -> &Txn {
        &self.edit_txn
    }

    /// The edit txn, mutably.
    pub const fn edit_txn_mut(&mut self) -> &mut Txn {
        &mut self.edit_txn
    }

    /// The commands issued since the last commit (the default log message).
    #[must_use]
    pub fn list_of_commands(&self) -> &[String] {
        &self.list_of_commands
    }

    /// Record a command line for the default log message.
    pub fn record_command(&mut self, words: &[String]) {
        self.list_of_commands.push(words.join(" "));
    }

    /// Forget the recorded commands (after a successful commit).
    pub fn clear_commands(&mut self) {
        self.list_of_commands.clear();
    }

    // -- resolution ---------------------------------------------------------

    /// Resolve `(rev, bid, relpath)` to an element location, walking through
    /// nested subbranches: whenever a path component names a subbranch-root
    /// element, resolution crosses into the nested branch.
    ///
    /// With `rev` given, the walk starts at the named (default: base) branch
    /// of that revision; without it, at the named (default: working) branch
    /// of the edit txn. A missing element is a valid result (`eid: None`).
    ///
    /// # Errors
    /// `NoSuchRevision`; `Branching` if the starting branch does not exist.
    pub fn find_el_rev(
        &self,
        rev: Option<RevNum>,
        bid: Option<&BranchId>,
        relpath: &str,
    ) -> Result<ElRev> {
        match rev {
            Some(rev) => {
                let txn = self.repo.load_branching_state(rev)?;
                let start = bid.unwrap_or(&self.base_bid);
                let (bid, eid) = resolve_nested(&txn, start, relpath)?;
                Ok(ElRev::new(bid, eid, Some(rev)))
            }
            None => {
                let start = bid.unwrap_or(&self.working_bid);
                let (bid, eid) = resolve_nested(&self.edit_txn, start, relpath)?;
                Ok(ElRev::new(bid, eid, None))
            }
        }
    }

    /// Materialize the txn a resolved location refers to: a load for a
    /// historical revision, a snapshot of the edit txn for the working
    /// state.
    ///
    /// # Errors
    /// `NoSuchRevision`.
    pub fn materialize_txn(&self, rev: Option<RevNum>) -> Result<Txn> {
        match rev {
            Some(rev) => self.repo.load_branching_state(rev),
            None => Ok(self.edit_txn.clone()),
        }
    }

    /// The predecessor location of branch `bid` at `rev`, skipping
    /// same-revision hops (a predecessor may point at another branch within
    /// the same revision; `log` wants the previous revision).
    ///
    /// # Errors
    /// `NoSuchRevision`; `Branching` if a branch in the chain is missing.
    pub fn predecessor_location(&self, rev: RevNum, bid: &BranchId) -> Result<Option<RevBid>> {
        let txn = self.repo.load_branching_state(rev)?;
        let lookup = |b: &BranchId| -> Result<Option<RevBid>> {
            txn.branch(b)
                .map(|branch| branch.predecessor().cloned())
                .ok_or_else(|| EngineError::Branching(format!("branch {b} not found in {rev}")))
        };
        let mut pred = lookup(bid)?;
        while let Some(p) = &pred {
            if p.rev != rev {
                break;
            }
            pred = lookup(&p.bid)?;
        }
        Ok(pred)
    }

    // -- lifecycle operations ----------------------------------------------

    /// Commit the working state: open a commit txn, replicate the edit txn's
    /// EID allocations, replay (base → working) into it recursively, and
    /// persist — unless nothing changed, in which case the commit txn is
    /// aborted and `None` is returned.
    ///
    /// The workspace itself is left on its old checkout; the command layer
    /// re-checks-out at the new revision.
    ///
    /// # Errors
    /// Replay and repository errors.
    pub fn commit(&mut self, revprops: RevProps) -> Result<Option<CommitOutcome>> {
        self.edit_txn.sequence_point()?;
        let mut commit_txn = self.repo.begin_commit()?;
        let mut commit_bid = self.working_bid.clone();

        // Creating a new top-level branch is the only case in which the
        // working branch is absent from the commit txn. Create it there with
        // its own independent top-level number.
        if commit_txn.branch(&commit_bid).is_none() {
            let base_branch = self.base_txn.branch(&self.base_bid).ok_or_else(|| {
                EngineError::Branching(format!("base branch {} disappeared", self.base_bid))
            })?;
            let sub = self
                .base_txn
                .subtree(&self.base_bid, base_branch.root_eid())
                .ok_or_else(|| {
                    EngineError::Branching(format!("base branch {} has no root", self.base_bid))
                })?;
            let outer_eid = commit_txn.new_eid()?;
            let new_bid = BranchId::top(outer_eid);
            commit_txn.branch_from(
                new_bid.clone(),
                Some(RevBid::new(self.base_rev, self.base_bid.clone())),
                &sub,
            )?;
            commit_bid = new_bid;
        }

        // Replicate the edit txn's allocations so that newly created
        // elements keep their identity across the two txns.
        for _ in 0..self.edit_txn.num_new_eids() {
            commit_txn.new_eid()?;
        }

        branch_replay(
            &mut commit_txn,
            &commit_bid,
            Some(BranchRef::new(&self.base_txn, &self.base_bid)),
            Some(BranchRef::new(&self.edit_txn, &self.working_bid)),
        )?;
        commit_txn.sequence_point()?;

        if !commit_txn.is_changed() {
            tracing::debug!("commit txn is unchanged, aborting");
            commit_txn.abort()?;
            return Ok(None);
        }

        let report = self.repo.commit(commit_txn, revprops)?;
        self.head_rev = report.revision;
        Ok(Some(CommitOutcome {
            revision: report.revision,
            committed_bid: commit_bid,
        }))
    }

    /// Revert all uncommitted changes: replay the inverse direction
    /// (working → base) into the working branch so it becomes equal to the
    /// base again.
    ///
    /// # Errors
    /// Replay errors.
    pub fn revert(&mut self) -> Result<()> {
        let snapshot = self.edit_txn.clone();
        branch_replay(
            &mut self.edit_txn,
            &self.working_bid.clone(),
            Some(BranchRef::new(&snapshot, &self.working_bid.clone())),
            Some(BranchRef::new(&self.base_txn.clone(), &self.base_bid.clone())),
        )?;
        self.edit_txn.sequence_point()
    }

    /// Switch to `target_bid` at `rev` (default: head), carrying local
    /// changes across: the old edit txn is completed, a new workspace state
    /// is checked out, and the old working state is merged into it with the
    /// old base as the ancestor.
    ///
    /// Conflicts are returned, with the workspace left in the partially
    /// merged state for inspection; the caller decides whether that is an
    /// error.
    ///
    /// # Errors
    /// Checkout and merge errors.
    pub fn switch(
        &mut self,
        rev: Option<RevNum>,
        target_bid: &BranchId,
    ) -> Result<ConflictStorage> {
        let has_local = self.edit_txn.is_changed();
        self.edit_txn.sequence_point()?;

        let prev_base_rev = self.base_rev;
        let prev_base_bid = self.base_bid.clone();
        let prev_base_txn = self.base_txn.clone();
        let prev_working_bid = self.working_bid.clone();
        let mut prev_edit_txn =
            std::mem::replace(&mut self.edit_txn, Txn::base_state(prev_base_rev, Default::default(), Eid::new(0)));
        prev_edit_txn.complete()?;

        self.re_checkout(rev, target_bid)?;

        if !has_local {
            return Ok(ConflictStorage::new());
        }
        tracing::debug!(branch = %target_bid, "merging local changes across switch");

        let tgt_root = self
            .edit_txn
            .branch(target_bid)
            .map(crate::branch::state::BranchState::root_eid)
            .ok_or_else(|| EngineError::Branching(format!("branch {target_bid} not found")))?;
        let src_root = prev_edit_txn
            .branch(&prev_working_bid)
            .map(crate::branch::state::BranchState::root_eid)
            .ok_or_else(|| {
                EngineError::Branching(format!("branch {prev_working_bid} not found"))
            })?;
        let yca_root = prev_base_txn
            .branch(&prev_base_bid)
            .map(crate::branch::state::BranchState::root_eid)
            .ok_or_else(|| EngineError::Branching(format!("branch {prev_base_bid} not found")))?;

        branch_merge(
            &mut self.edit_txn,
            target_bid,
            tgt_root,
            MergeSource::new(&prev_edit_txn, &prev_working_bid, src_root),
            Some(MergeSource::new(&prev_base_txn, &prev_base_bid, yca_root)),
        )
    }

    /// Update to `rev`, keeping local changes: a switch to the current base
    /// branch at that revision.
    ///
    /// # Errors
    /// Same as [`Self::switch`].
    pub fn update(&mut self, rev: RevNum) -> Result<ConflictStorage> {
        let bid = self.base_bid.clone();
        self.switch(Some(rev), &bid)
    }

    /// Migrate legacy (pre-move-tracking) revisions `from..=to` into the
    /// edit txn: each revision's tree delta is replayed through a shim that
    /// consults the repository's move-info table to express moves as single
    /// element alterations.
    ///
    /// # Errors
    /// `IncorrectParams` for a bad range; replay errors.
    pub fn migrate(&mut self, from: RevNum, to: RevNum) -> Result<()> {
        if from.value() < 1 || from > to || to > self.head_rev {
            return Err(EngineError::IncorrectParams(format!(
                "migrate: bad revision range ({from} to {to}); minimum is 1 and maximum (head) is {}",
                self.head_rev
            )));
        }
        let moves = self.repo.legacy_moves(from, to);
        let mut shim = MigrationShim::new(&mut self.edit_txn, self.working_bid.clone(), moves);
        self.repo.replay_range(from, to, &mut shim)
    }
}

// ---------------------------------------------------------------------------
// Nested resolution
// ---------------------------------------------------------------------------

/// Walk `relpath` from the root of `start_bid`, crossing a subbranch
/// boundary whenever a component names a subbranch-root element. Returns the
/// deepest branch reached and the element there (`None` when the path names
/// nothing).
fn resolve_nested(
    txn: &Txn,
    start_bid: &BranchId,
    relpath: &str,
) -> Result<(BranchId, Option<Eid>)> {
    let mut branch = txn
        .branch(start_bid)
        .ok_or_else(|| EngineError::Branching(format!("branch {start_bid} not found")))?;
    let mut bid = start_bid.clone();
    let mut eid = branch.root_eid();

    for name in relpath.split('/').filter(|c| !c.is_empty() && *c != ".") {
        match branch.tree().child_by_name(eid, name) {
            None => return Ok((bid, None)),
            Some(child) => {
                if let Some(nested) = txn.subbranch_at_eid(&bid, child) {
                    bid = nested.bid().clone();
                    eid = nested.root_eid();
                    branch = txn
                        .branch(&bid)
                        .ok_or_else(|| EngineError::Branching(format!("branch {bid} not found")))?;
                } else {
                    eid = child;
                }
            }
        }
    }
    Ok((bid, Some(eid)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
