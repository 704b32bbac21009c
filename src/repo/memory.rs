//! In-memory repository with optional on-disk branch metadata.
//!
//! [`MemRepo`] stores one branching state per revision. Revision 0 is
//! bootstrapped with a single top-level branch `B0` whose root element `e0`
//! is an empty directory.
//!
//! When opened from a `file://` URL, every revision's branching state is
//! additionally persisted as a text file `branch-info/r<N>` under the
//! repository directory (and reloaded from there on open), exercising the
//! serializer; for any other URL the state lives in memory only.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::branch::serial;
use crate::branch::state::BranchState;
use crate::branch::txn::Txn;
use crate::error::{EngineError, Result};
use crate::model::element::Payload;
use crate::model::ids::{BranchId, Eid, RevBid, RevNum};
use crate::repo::{
    CompletionReport, LegacyReplayVisitor, MoveInfo, Repo, RevProps, TreeDeltaEvent,
};

// ---------------------------------------------------------------------------
// Stored state
// ---------------------------------------------------------------------------

/// One persisted revision: its branches and the committed-EID watermark.
#[derive(Clone, Debug)]
struct StoredRevision {
    branches: BTreeMap<BranchId, BranchState>,
    next_eid: Eid,
    revprops: RevProps,
}

/// A legacy (pre-move-tracking) revision usable by `migrate`: its tree-delta
/// events and the repository's recorded moves within it.
#[derive(Clone, Debug, Default)]
pub struct LegacyRevision {
    /// Tree-delta events in application order.
    pub events: Vec<TreeDeltaEvent>,
    /// Moves recognized in this revision.
    pub moves: Vec<MoveInfo>,
}

// ---------------------------------------------------------------------------
// MemRepo
// ---------------------------------------------------------------------------

/// An in-memory [`Repo`] implementation.
#[derive(Debug)]
pub struct MemRepo {
    root_url: String,
    info_dir: Option<PathBuf>,
    revisions: Vec<StoredRevision>,
    legacy: BTreeMap<RevNum, LegacyRevision>,
}

impl MemRepo {
    /// A fresh repository held entirely in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            root_url: "mem://repo".to_owned(),
            info_dir: None,
            revisions: vec![Self::bootstrap_revision()],
            legacy: BTreeMap::new(),
        }
    }

    /// Open (or create) a repository at `url`. A `file://` URL gets on-disk
    /// branch metadata under `<dir>/branch-info/`; anything else is
    /// in-memory with the given root URL.
    ///
    /// # Errors
    /// I/O errors creating or reading the branch-info directory; `BadFormat`
    /// if an on-disk revision file fails to parse.
    pub fn open(url: &str) -> Result<Self> {
        let Some(dir) = url.strip_prefix("file://") else {
            return Ok(Self {
                root_url: url.to_owned(),
                ..Self::in_memory()
            });
        };
        let info_dir = PathBuf::from(dir).join("branch-info");
        let mut repo = Self {
            root_url: url.to_owned(),
            info_dir: Some(info_dir.clone()),
            revisions: Vec::new(),
            legacy: BTreeMap::new(),
        };

        std::fs::create_dir_all(&info_dir)?;
        loop {
            let path = info_dir.join(format!("r{}", repo.revisions.len()));
            if !path.exists() {
                break;
            }
            let bytes = std::fs::read(&path)?;
            let txn = serial::parse_txn(&bytes)?;
            tracing::debug!(rev = repo.revisions.len(), "loaded branching state from disk");
            repo.revisions.push(StoredRevision {
                branches: txn.branches().cloned().map(|b| (b.bid().clone(), b)).collect(),
                next_eid: txn.next_eid(),
                revprops: RevProps::new(),
            });
        }
        if repo.revisions.is_empty() {
            repo.revisions.push(Self::bootstrap_revision());
            repo.persist_revision(0)?;
        }
        Ok(repo)
    }

    /// Seed a legacy revision for `migrate` (the repository's own history
    /// that predates move tracking).
    pub fn add_legacy_revision(&mut self, rev: RevNum, legacy: LegacyRevision) {
        self.legacy.insert(rev, legacy);
    }

    /// The revision properties stored with `rev`.
    #[must_use]
    pub fn revprops(&self, rev: RevNum) -> Option<&RevProps> {
        self.revisions.get(rev.value() as usize).map(|r| &r.revprops)
    }

    /// Revision 0: branch `B0`, root element `e0` (empty directory).
    fn bootstrap_revision() -> StoredRevision {
        let bid = BranchId::top(Eid::new(0));
        let mut branch = BranchState::new(bid.clone(), Eid::new(0), None);
        branch
            .alter_one(Eid::new(0), None, "", Payload::dir())
            .expect("bootstrap root element is well-formed");
        let mut branches = BTreeMap::new();
        branches.insert(bid, branch);
        StoredRevision {
            branches,
            next_eid: Eid::new(1),
            revprops: RevProps::new(),
        }
    }

    fn stored(&self, rev: RevNum) -> Result<&StoredRevision> {
        self.revisions
            .get(rev.value() as usize)
            .ok_or(EngineError::NoSuchRevision {
                rev: rev.value(),
                head: self.head_revnum().value(),
            })
    }

    fn persist_revision(&self, index: usize) -> Result<()> {
        let Some(info_dir) = &self.info_dir else {
            return Ok(());
        };
        let stored = &self.revisions[index];
        let txn = Txn::base_state(
            RevNum::new(index as u64),
            stored.branches.clone(),
            stored.next_eid,
        );
        std::fs::write(info_dir.join(format!("r{index}")), serial::serialize_txn(&txn))?;
        Ok(())
    }
}

impl Repo for MemRepo {
    fn repos_root(&self) -> &str {
        &self.root_url
    }

    fn head_revnum(&self) -> RevNum {
        RevNum::new((self.revisions.len() - 1) as u64)
    }

    fn load_branching_state(&self, rev: RevNum) -> Result<Txn> {
        let stored = self.stored(rev)?;
        Ok(Txn::base_state(rev, stored.branches.clone(), stored.next_eid))
    }

    fn begin_commit(&self) -> Result<Txn> {
        let head = self.load_branching_state(self.head_revnum())?;
        Ok(Txn::begin_edit(head))
    }

    fn commit(&mut self, mut txn: Txn, revprops: RevProps) -> Result<CompletionReport> {
        txn.complete()?;
        let prev_head = self.head_revnum();
        let revision = prev_head.next();
        tracing::debug!(%revision, "persisting commit");
        // A branch that existed at the previous head gets its predecessor
        // repointed there; a branch new in this commit keeps the predecessor
        // recorded when it was branched.
        let prev_branches = &self.revisions[prev_head.value() as usize].branches;
        let branches = txn
            .branches()
            .cloned()
            .map(|b| {
                let bid = b.bid().clone();
                let b = if prev_branches.contains_key(&bid) {
                    b.with_predecessor(Some(RevBid::new(prev_head, bid.clone())))
                } else {
                    b
                };
                (bid, b)
            })
            .collect();
        self.revisions.push(StoredRevision {
            branches,
            next_eid: txn.next_eid(),
            revprops,
        });
        self.persist_revision(self.revisions.len() - 1)?;
        Ok(CompletionReport { revision })
    }

    fn replay_range(
        &self,
        from: RevNum,
        to: RevNum,
        visitor: &mut dyn LegacyReplayVisitor,
    ) -> Result<()> {
        self.stored(to)?;
        for rev in from.value()..=to.value() {
            let rev = RevNum::new(rev);
            let empty = Vec::new();
            let events = self.legacy.get(&rev).map_or(&empty, |l| &l.events);
            visitor.revision(rev, events)?;
        }
        Ok(())
    }

    fn legacy_moves(&self, from: RevNum, to: RevNum) -> BTreeMap<RevNum, Vec<MoveInfo>> {
        self.legacy
            .range(from..=to)
            .map(|(rev, legacy)| (*rev, legacy.moves.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
