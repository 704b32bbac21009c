//! Shared fixture for integration tests: a workspace over an in-memory
//! repository, driven through the command layer exactly as the CLI would.

#![allow(dead_code)] // not every test binary uses every helper

use elmover::error::Result;
use elmover::format::{PresentationConfig, UiMode};
use elmover::model::ids::{BranchId, Eid, RevNum};
use elmover::repo::MemRepo;
use elmover::wc::commands::{execute, parse_actions, CommandContext};
use elmover::wc::Workspace;

/// A test workspace with command-driving helpers.
pub struct TestWc {
    pub wc: Workspace<MemRepo>,
    ctx: CommandContext,
}

impl TestWc {
    /// A fresh in-memory repository checked out at r0 on B0.
    pub fn new() -> Self {
        Self::with_ctx(CommandContext::default())
    }

    /// Same, but rendering paths instead of EIDs.
    #[allow(dead_code)]
    pub fn new_paths_ui() -> Self {
        Self::with_ctx(CommandContext {
            config: PresentationConfig {
                ui_mode: UiMode::Paths,
                quiet: false,
            },
            ..CommandContext::default()
        })
    }

    fn with_ctx(ctx: CommandContext) -> Self {
        let wc = Workspace::checkout(MemRepo::in_memory(), None, None)
            .expect("fresh checkout succeeds");
        Self { wc, ctx }
    }

    /// Run a whitespace-separated command line, returning its output.
    pub fn run(&mut self, line: &str) -> Result<String> {
        let words: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        let actions = parse_actions(&words)?;
        let mut out = Vec::new();
        execute(&mut self.wc, &self.ctx, &actions, &mut out)?;
        Ok(String::from_utf8(out).expect("command output is UTF-8"))
    }

    /// Run a command line that must succeed.
    pub fn ok(&mut self, line: &str) -> String {
        self.run(line)
            .unwrap_or_else(|err| panic!("command '{line}' failed: {err}"))
    }

    /// Write `text` into the file element at `path` (creating it if
    /// needed), going through the real `put` command.
    pub fn put(&mut self, path: &str, text: &str) {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = dir.path().join("text");
        std::fs::write(&local, text).expect("write local file");
        self.ok(&format!("put {} {path}", local.display()));
    }

    /// The text of the file at `path`, via `cat`.
    #[allow(dead_code)]
    pub fn cat(&mut self, path: &str) -> String {
        self.ok(&format!("cat {path}"))
    }

    /// Resolve a working path to its element id, if any.
    pub fn eid_at(&self, path: &str) -> Option<Eid> {
        self.wc
            .find_el_rev(None, None, path)
            .expect("resolution succeeds")
            .eid
    }

    /// Resolve a path at a revision to its element id, if any.
    pub fn eid_at_rev(&self, path: &str, rev: u64) -> Option<Eid> {
        self.wc
            .find_el_rev(Some(RevNum::new(rev)), None, path)
            .expect("resolution succeeds")
            .eid
    }

    /// The head revision number.
    pub fn head(&self) -> u64 {
        use elmover::repo::Repo as _;
        self.wc.repo().head_revnum().value()
    }
}

/// Shorthand for a branch id literal.
pub fn bid(s: &str) -> BranchId {
    BranchId::new(s).expect("valid branch id")
}
