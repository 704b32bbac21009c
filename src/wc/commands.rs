//! Command interpretation and dispatch.
//!
//! The command layer turns a flat list of action words into [`Action`]s
//! (each command has a fixed arity), resolves every path argument into an
//! element location, enforces per-command preconditions, and drives the
//! workspace. Every action starts with a sequence point so that path→EID
//! resolution sees the same tree the mutation will operate on.
//!
//! A violated precondition yields a `Branching` error naming the command
//! and the offending argument.

use std::io::{BufRead, Write};

use crate::error::{EngineError, Result};
use crate::format::{self, PresentationConfig, UiMode};
use crate::merge::{branch_merge, MergeSource};
use crate::model::element::{Element, Payload};
use crate::model::ids::{BranchId, Eid, ElRev, RevBid, RevNum};
use crate::model::subtree::Subtree;
use crate::branch::serial;
use crate::branch::txn::Txn;
use crate::repo::{Repo, RevProps, REVPROP_LOG};
use crate::wc::args::{parse_arg, ArgSpec, RevSpec};
use crate::wc::{BranchIntoPolicy, CrossBranchMovePolicy, Workspace};

const LOG_SEPARATOR: &str =
    "------------------------------------------------------------------------";

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// One parsed command with its original words (kept for the default commit
/// log message).
#[derive(Clone, Debug)]
pub struct Action {
    /// The words the action was written as.
    pub words: Vec<String>,
    /// The parsed command.
    pub kind: ActionKind,
}

/// The command vocabulary.
#[derive(Clone, Debug)]
pub enum ActionKind {
    /// Print information about the WC.
    InfoWc,
    /// List elements in the branch found at a path.
    Ls { path: ArgSpec },
    /// List branches rooted at the same element as a path.
    Branches { path: ArgSpec },
    /// List all branches, recursively.
    LsBrR,
    /// Per-revision diffs between two locations.
    Log { from: ArgSpec, to: ArgSpec },
    /// Differences between two subtrees.
    Diff { left: ArgSpec, right: ArgSpec },
    /// `diff .@base .`
    Status,
    /// Branch a subtree to a new top-level branch.
    Tbranch { src: ArgSpec },
    /// Branch a subtree to a new nested branch at a path.
    Branch { src: ArgSpec, dst: ArgSpec },
    /// Instantiate an existing subtree's elements inside another branch.
    BranchInto { src: ArgSpec, dst: ArgSpec },
    /// Make a directory that roots a new subbranch.
    Mkbranch { root: ArgSpec },
    /// 3-way merge.
    Merge { from: ArgSpec, to: ArgSpec, yca: ArgSpec },
    /// Copy (new element identities).
    Cp { src: ArgSpec, dst: ArgSpec },
    /// Move/rename within a branch, or policy-driven across branches.
    Mv { src: ArgSpec, dst: ArgSpec },
    /// Delete one element (descendants become orphans).
    Rm { path: ArgSpec },
    /// Explicit cross-branch move: copy then delete.
    CopyAndDelete { src: ArgSpec, dst: ArgSpec },
    /// Explicit cross-branch move: branch then delete.
    BranchAndDelete { src: ArgSpec, dst: ArgSpec },
    /// Explicit cross-branch move: branch-into then delete.
    BranchIntoAndDelete { src: ArgSpec, dst: ArgSpec },
    /// Make a directory.
    Mkdir { path: ArgSpec },
    /// Add or replace a file's text from a local file (`-` for stdin).
    Put { local: String, path: ArgSpec },
    /// Print a file's properties and text.
    Cat { path: ArgSpec },
    /// Commit the changes.
    Commit,
    /// Update to a revision, keeping local changes.
    Update { path: ArgSpec },
    /// Switch to another branch and/or revision, keeping local changes.
    Switch { target: ArgSpec },
    /// Revert all uncommitted changes.
    Revert,
    /// Migrate changes from a non-move-tracking revision.
    Migrate { path: ArgSpec },
}

/// `(name, arity, args help, help)` for every command, in display order.
pub const ACTION_DEFNS: &[(&str, usize, &str, &str)] = &[
    ("info-wc", 0, "", "print information about the WC"),
    ("branches", 1, "PATH", "list all branches rooted at the same element as PATH"),
    ("ls-br-r", 0, "", "list all branches, recursively"),
    ("ls", 1, "PATH", "list elements in the branch found at PATH"),
    ("log", 2, "FROM@REV TO@REV", "show per-revision diffs between FROM and TO"),
    ("tbranch", 1, "SRC", "branch the subtree at SRC to make a new top-level branch"),
    ("branch", 2, "SRC DST", "branch the subtree at SRC to make a new branch at DST"),
    ("branch-into", 2, "SRC DST", "make a branch of SRC appear at DST as part of DST's branch"),
    ("mkbranch", 1, "ROOT", "make a directory that's the root of a new subbranch"),
    ("diff", 2, "LEFT@REV RIGHT@REV", "show differences from subtree LEFT to subtree RIGHT"),
    ("merge", 3, "FROM TO YCA@REV", "3-way merge YCA->FROM into TO"),
    ("cp", 2, "SRC@REV DST", "copy SRC@REV to DST"),
    ("mv", 2, "SRC DST", "move SRC to DST"),
    ("rm", 1, "PATH", "delete PATH"),
    ("copy-and-delete", 2, "SRC DST", "copy-and-delete SRC to DST"),
    ("branch-and-delete", 2, "SRC DST", "branch-and-delete SRC to DST"),
    ("branch-into-and-delete", 2, "SRC DST", "branch-into-and-delete SRC to DST"),
    ("mkdir", 1, "PATH", "create new directory PATH"),
    ("put", 2, "LOCAL_FILE PATH", "add or modify file PATH with text from LOCAL_FILE ('-' for stdin)"),
    ("cat", 1, "PATH", "display text (for a file) and props (if any) of PATH"),
    ("commit", 0, "", "commit the changes"),
    ("update", 1, ".@REV", "update to revision REV, keeping local changes"),
    ("switch", 1, "TARGET[@REV]", "switch to another branch and/or revision, keeping local changes"),
    ("status", 0, "", "same as 'diff .@base .'"),
    ("revert", 0, "", "revert all uncommitted changes"),
    ("migrate", 1, ".@REV", "migrate changes from non-move-tracking revision"),
];

/// Parse a flat word list into actions, consuming each command's fixed
/// argument count.
///
/// # Errors
/// `IncorrectParams` for an unknown command or missing arguments; argument
/// parse errors.
pub fn parse_actions(words: &[String]) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    let mut iter = words.iter();
    while let Some(name) = iter.next() {
        let &(_, arity, args_help, _) = ACTION_DEFNS
            .iter()
            .find(|(n, ..)| n == name)
            .ok_or_else(|| EngineError::IncorrectParams(format!("unknown command '{name}'")))?;
        let mut raw_args: Vec<&String> = Vec::with_capacity(arity);
        for _ in 0..arity {
            raw_args.push(iter.next().ok_or_else(|| {
                EngineError::IncorrectParams(format!("{name}: expected arguments: {args_help}"))
            })?);
        }
        let mut action_words = vec![name.clone()];
        action_words.extend(raw_args.iter().map(|s| (*s).clone()));

        let arg = |i: usize| parse_arg(raw_args[i]);
        let kind = match name.as_str() {
            "info-wc" => ActionKind::InfoWc,
            "branches" => ActionKind::Branches { path: arg(0)? },
            "ls-br-r" => ActionKind::LsBrR,
            "ls" => ActionKind::Ls { path: arg(0)? },
            "log" => ActionKind::Log { from: arg(0)?, to: arg(1)? },
            "tbranch" => ActionKind::Tbranch { src: arg(0)? },
            "branch" => ActionKind::Branch { src: arg(0)?, dst: arg(1)? },
            "branch-into" => ActionKind::BranchInto { src: arg(0)?, dst: arg(1)? },
            "mkbranch" => ActionKind::Mkbranch { root: arg(0)? },
            "diff" => ActionKind::Diff { left: arg(0)?, right: arg(1)? },
            "merge" => ActionKind::Merge {
                from: arg(0)?,
                to: arg(1)?,
                yca: arg(2)?,
            },
            "cp" => ActionKind::Cp { src: arg(0)?, dst: arg(1)? },
            "mv" => ActionKind::Mv { src: arg(0)?, dst: arg(1)? },
            "rm" => ActionKind::Rm { path: arg(0)? },
            "copy-and-delete" => ActionKind::CopyAndDelete { src: arg(0)?, dst: arg(1)? },
            "branch-and-delete" => ActionKind::BranchAndDelete { src: arg(0)?, dst: arg(1)? },
            "branch-into-and-delete" => {
                ActionKind::BranchIntoAndDelete { src: arg(0)?, dst: arg(1)? }
            }
            "mkdir" => ActionKind::Mkdir { path: arg(0)? },
            "put" => ActionKind::Put {
                local: raw_args[0].clone(),
                path: arg(1)?,
            },
            "cat" => ActionKind::Cat { path: arg(0)? },
            "commit" => ActionKind::Commit,
            "update" => ActionKind::Update { path: arg(0)? },
            "switch" => ActionKind::Switch { target: arg(0)? },
            "status" => ActionKind::Status,
            "revert" => ActionKind::Revert,
            "migrate" => ActionKind::Migrate { path: arg(0)? },
            _ => unreachable!("name matched against ACTION_DEFNS"),
        };
        actions.push(Action {
            words: action_words,
            kind,
        });
    }
    Ok(actions)
}

// ---------------------------------------------------------------------------
// Context and execution
// ---------------------------------------------------------------------------

/// Everything the executor needs besides the workspace: presentation knobs,
/// commit revprops from the command line, the policy seams, and whether an
/// interactive prompt is available.
#[derive(Clone, Debug, Default)]
pub struct CommandContext {
    /// Presentation knobs.
    pub config: PresentationConfig,
    /// Revision properties for commits (log message included).
    pub revprops: RevProps,
    /// What `mv` does across branches.
    pub move_policy: CrossBranchMovePolicy,
    /// What `branch-into` does on collisions.
    pub branch_into_policy: BranchIntoPolicy,
    /// Whether the user can be prompted.
    pub interactive: bool,
}

/// Execute `actions` in order against `wc`, writing output to `out`.
///
/// Each action starts with a sequence point; each action except `commit` is
/// recorded for the default log message. The first error aborts the
/// sequence (the interactive loop catches it per line instead).
///
/// # Errors
/// The first failing action's error.
pub fn execute<R: Repo, W: Write>(
    wc: &mut Workspace<R>,
    ctx: &CommandContext,
    actions: &[Action],
    out: &mut W,
) -> Result<()> {
    for action in actions {
        wc.edit_txn_mut().sequence_point()?;
        run_action(wc, ctx, action, out)?;
        if !matches!(action.kind, ActionKind::Commit) {
            wc.record_command(&action.words);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Argument resolution and preconditions
// ---------------------------------------------------------------------------

/// A fully resolved path argument: the element, its parent, the final name
/// component, and the pinned revision (if any).
struct Resolved {
    raw: String,
    revnum: Option<RevNum>,
    el_rev: ElRev,
    parent_el_rev: ElRev,
    path_name: String,
}

fn resolve<R: Repo>(wc: &Workspace<R>, spec: &ArgSpec) -> Result<Resolved> {
    let revnum = match spec.rev {
        None => None,
        Some(RevSpec::Number(n)) => Some(n),
        Some(RevSpec::Head) => Some(wc.head_rev()),
        Some(RevSpec::Base | RevSpec::Committed) => Some(wc.base_rev()),
    };
    let el_rev = wc.find_el_rev(revnum, spec.bid.as_ref(), &spec.relpath)?;
    let (dir, name) = spec.split_parent();
    let parent_el_rev = wc.find_el_rev(revnum, spec.bid.as_ref(), dir)?;
    Ok(Resolved {
        raw: spec.relpath.clone(),
        revnum,
        el_rev,
        parent_el_rev,
        path_name: name.to_owned(),
    })
}

fn verify_rev_specified(op: &str, arg: &Resolved) -> Result<()> {
    if arg.revnum.is_none() {
        return Err(EngineError::branching(
            op,
            format!("'{}': revision number required", arg.raw),
        ));
    }
    Ok(())
}

fn verify_rev_unspecified(op: &str, arg: &Resolved) -> Result<()> {
    if arg.revnum.is_some() {
        return Err(EngineError::branching(
            op,
            format!("'{}@...': revision number not allowed", arg.raw),
        ));
    }
    Ok(())
}

fn verify_eid_exists(op: &str, arg: &Resolved) -> Result<Eid> {
    arg.el_rev.eid.ok_or_else(|| {
        EngineError::branching(op, format!("element not found at path '{}'", arg.raw))
    })
}

fn verify_eid_nonexistent(op: &str, arg: &Resolved) -> Result<()> {
    if arg.el_rev.eid.is_some() {
        return Err(EngineError::branching(
            op,
            format!("element already exists at path '{}'", arg.raw),
        ));
    }
    Ok(())
}

fn verify_parent_eid_exists(op: &str, arg: &Resolved) -> Result<Eid> {
    arg.parent_el_rev.eid.ok_or_else(|| {
        EngineError::branching(
            op,
            format!("element not found at path '{}'", parent_path(&arg.raw)),
        )
    })
}

fn parent_path(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// The full path of an element seen from the outermost branch, crossing
/// subbranch anchors.
fn global_path(txn: &Txn, bid: &BranchId, eid: Eid) -> Option<String> {
    let local = txn.branch(bid)?.path_of(eid)?;
    match txn.outer_branch_and_eid(bid) {
        None => Some(local),
        Some((outer, anchor)) => {
            let outer_bid = outer.bid().clone();
            let prefix = global_path(txn, &outer_bid, anchor)?;
            Some(join_path(&prefix, &local))
        }
    }
}

fn join_path(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_owned(),
        (_, true) => a.to_owned(),
        _ => format!("{a}/{b}"),
    }
}

/// The specified target must not be nested inside the source.
fn verify_not_in_source<R: Repo>(
    op: &str,
    wc: &Workspace<R>,
    src_eid: Eid,
    src: &Resolved,
    dst: &Resolved,
) -> Result<()> {
    let txn = wc.edit_txn();
    let src_path = global_path(txn, &src.el_rev.bid, src_eid);
    let dst_parent_path = dst
        .parent_el_rev
        .eid
        .and_then(|eid| global_path(txn, &dst.parent_el_rev.bid, eid));
    if let (Some(src_path), Some(dst_path)) = (src_path, dst_parent_path) {
        let nested = dst_path == src_path
            || (!src_path.is_empty() && dst_path.starts_with(&format!("{src_path}/")));
        if nested {
            return Err(EngineError::branching(
                op,
                "the specified target is nested inside the source",
            ));
        }
    }
    Ok(())
}

/// If the location is the root element of a nested branch, re-point it at
/// the subbranch-root element of the outer branch; the root of a top-level
/// branch cannot be deleted or moved.
fn point_to_outer_element_instead<R: Repo>(
    wc: &Workspace<R>,
    op: &str,
    el_rev: &ElRev,
) -> Result<ElRev> {
    let Some(eid) = el_rev.eid else {
        return Ok(el_rev.clone());
    };
    let txn = wc.edit_txn();
    let is_root = txn
        .branch(&el_rev.bid)
        .is_some_and(|b| b.root_eid() == eid);
    if !is_root {
        return Ok(el_rev.clone());
    }
    match txn.outer_branch_and_eid(&el_rev.bid) {
        Some((outer, outer_eid)) => Ok(ElRev::new(
            outer.bid().clone(),
            Some(outer_eid),
            el_rev.rev,
        )),
        None => Err(EngineError::branching(
            op,
            "cannot delete or move a top-level branch",
        )),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_lines)]
fn run_action<R: Repo, W: Write>(
    wc: &mut Workspace<R>,
    ctx: &CommandContext,
    action: &Action,
    out: &mut W,
) -> Result<()> {
    let quiet = ctx.config.quiet;
    match &action.kind {
        ActionKind::InfoWc => {
            writeln!(out, "Repository Root: {}", wc.repo().repos_root())?;
            writeln!(out, "Base Revision: {}", wc.base_rev().value())?;
            writeln!(out, "Base Branch:    {}", wc.base_bid())?;
            writeln!(out, "Working Branch: {}", wc.working_bid())?;
        }

        ActionKind::Ls { path } => {
            let arg = resolve(wc, path)?;
            verify_eid_exists("ls", &arg)?;
            let txn = wc.materialize_txn(arg.revnum)?;
            let bid = arg.el_rev.bid.clone();
            let branch = txn
                .branch(&bid)
                .ok_or_else(|| EngineError::Branching(format!("branch {bid} not found")))?;
            match ctx.config.ui_mode {
                UiMode::Serial => {
                    out.write_all(&serial::serialize_branch(branch))?;
                }
                UiMode::Paths => {
                    for line in format::branch_elements_by_path(branch.tree(), |eid| {
                        txn.subbranch_at_eid(&bid, eid).map(|b| b.bid().to_string())
                    }) {
                        writeln!(out, "{line}")?;
                    }
                }
                UiMode::Eids => {
                    for line in format::branch_elements_by_eid(branch.tree(), |eid| {
                        txn.subbranch_at_eid(&bid, eid).map(|b| b.bid().to_string())
                    }) {
                        writeln!(out, "{line}")?;
                    }
                }
            }
        }

        ActionKind::Branches { path } => {
            let arg = resolve(wc, path)?;
            let eid = verify_eid_exists("branches", &arg)?;
            let txn = wc.materialize_txn(arg.revnum)?;
            if !quiet {
                match ctx.config.ui_mode {
                    UiMode::Paths => {
                        writeln!(out, "branches rooted at same element as '{}':", arg.raw)?;
                    }
                    _ => writeln!(out, "branches rooted at {eid}:")?,
                }
            }
            for branch in txn.branches().filter(|b| b.root_eid() == eid) {
                writeln!(out, "  {}", branch.bid())?;
            }
            let containing: Vec<_> = txn
                .branches()
                .filter(|b| b.root_eid() != eid && b.element(eid).is_some())
                .collect();
            if !containing.is_empty() {
                if !quiet {
                    writeln!(out, "branches containing but not rooted at {eid}:")?;
                }
                for branch in containing {
                    writeln!(out, "  {}", branch.bid())?;
                }
            }
        }

        ActionKind::LsBrR => {
            if ctx.config.ui_mode == UiMode::Serial {
                out.write_all(&serial::serialize_txn(wc.edit_txn()))?;
            } else {
                if !quiet {
                    writeln!(out, "branches:")?;
                }
                let txn = wc.edit_txn();
                for branch in txn.branches() {
                    writeln!(out, "  {}", branch.bid())?;
                    let bid = branch.bid().clone();
                    let lines = match ctx.config.ui_mode {
                        UiMode::Paths => format::branch_elements_by_path(branch.tree(), |eid| {
                            txn.subbranch_at_eid(&bid, eid).map(|b| b.bid().to_string())
                        }),
                        _ => format::branch_elements_by_eid(branch.tree(), |eid| {
                            txn.subbranch_at_eid(&bid, eid).map(|b| b.bid().to_string())
                        }),
                    };
                    for line in lines {
                        writeln!(out, "  {line}")?;
                    }
                    writeln!(out)?;
                }
            }
        }

        ActionKind::Log { from, to } => {
            let left = resolve(wc, from)?;
            let right = resolve(wc, to)?;
            verify_eid_exists("log", &left)?;
            verify_eid_exists("log", &right)?;
            verify_rev_specified("log", &left)?;
            verify_rev_specified("log", &right)?;
            do_log(wc, ctx, &left, &right, out)?;
        }

        ActionKind::Diff { left, right } => {
            let l = resolve(wc, left)?;
            let r = resolve(wc, right)?;
            let l_eid = verify_eid_exists("diff", &l)?;
            let r_eid = verify_eid_exists("diff", &r)?;
            let left_txn = wc.materialize_txn(l.revnum)?;
            let right_txn = wc.materialize_txn(r.revnum)?;
            branch_diff_r(
                ctx,
                &left_txn,
                &l.el_rev.bid,
                l_eid,
                l.revnum,
                &right_txn,
                &r.el_rev.bid,
                r_eid,
                r.revnum,
                "",
                out,
            )?;
        }

        ActionKind::Status => {
            let base_bid = wc.base_bid().clone();
            let working_bid = wc.working_bid().clone();
            let base_root = wc
                .base_txn()
                .branch(&base_bid)
                .map(crate::branch::state::BranchState::root_eid)
                .ok_or_else(|| EngineError::Branching(format!("branch {base_bid} not found")))?;
            let working_root = wc
                .edit_txn()
                .branch(&working_bid)
                .map(crate::branch::state::BranchState::root_eid)
                .ok_or_else(|| EngineError::Branching(format!("branch {working_bid} not found")))?;
            let base_txn = wc.base_txn().clone();
            let edit_txn = wc.edit_txn().clone();
            branch_diff_r(
                ctx,
                &base_txn,
                &base_bid,
                base_root,
                Some(wc.base_rev()),
                &edit_txn,
                &working_bid,
                working_root,
                None,
                "",
                out,
            )?;
        }

        ActionKind::Tbranch { src } => {
            let arg = resolve(wc, src)?;
            let src_eid = verify_eid_exists("tbranch", &arg)?;
            let src_txn = wc.materialize_txn(arg.revnum)?;
            let sub = src_txn.subtree(&arg.el_rev.bid, src_eid).ok_or_else(|| {
                EngineError::branching("tbranch", format!("cannot branch from '{}'", arg.raw))
            })?;
            let predecessor = arg.revnum.map(|rev| RevBid::new(rev, arg.el_rev.bid.clone()));
            let outer_eid = wc.edit_txn_mut().new_eid()?;
            let new_bid = BranchId::top(outer_eid);
            wc.edit_txn_mut().branch_from(new_bid.clone(), predecessor, &sub)?;
            if !quiet {
                writeln!(out, "A+   (branch {new_bid})")?;
            }
            // Continue working on the new branch.
            wc.set_working_bid(new_bid);
        }

        ActionKind::Branch { src, dst } => {
            let s = resolve(wc, src)?;
            let d = resolve(wc, dst)?;
            let src_eid = verify_eid_exists("branch", &s)?;
            verify_rev_unspecified("branch", &d)?;
            verify_eid_nonexistent("branch", &d)?;
            let to_parent = verify_parent_eid_exists("branch", &d)?;
            let new_bid = do_branch(wc, &s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
            if !quiet {
                writeln!(out, "A+   {} (branch {new_bid})", d.raw)?;
            }
        }

        ActionKind::BranchInto { src, dst } => {
            let s = resolve(wc, src)?;
            let d = resolve(wc, dst)?;
            let src_eid = verify_eid_exists("branch-into", &s)?;
            verify_rev_unspecified("branch-into", &d)?;
            verify_eid_nonexistent("branch-into", &d)?;
            let to_parent = verify_parent_eid_exists("branch-into", &d)?;
            do_branch_into(wc, ctx, &s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
            if !quiet {
                writeln!(out, "A+   {} (subtree)", d.raw)?;
            }
        }

        ActionKind::Mkbranch { root } => {
            let arg = resolve(wc, root)?;
            verify_rev_unspecified("mkbranch", &arg)?;
            verify_eid_nonexistent("mkbranch", &arg)?;
            let parent = verify_parent_eid_exists("mkbranch", &arg)?;
            let outer_bid = arg.parent_el_rev.bid.clone();
            let outer_eid = wc.edit_txn_mut().new_eid()?;
            let inner_eid = wc.edit_txn_mut().new_eid()?;
            wc.edit_txn_mut().branch_mut(&outer_bid)?.alter_checked(
                outer_eid,
                Some(parent),
                &arg.path_name,
                Payload::Subbranch,
            )?;
            let new_bid = outer_bid.nest(outer_eid);
            wc.edit_txn_mut().open_branch(None, new_bid.clone(), inner_eid)?;
            wc.edit_txn_mut()
                .branch_mut(&new_bid)?
                .alter_one(inner_eid, None, "", Payload::dir())?;
            if !quiet {
                writeln!(out, "A    {} (branch {new_bid})", arg.raw)?;
            }
        }

        ActionKind::Merge { from, to, yca } => {
            let from = resolve(wc, from)?;
            let to = resolve(wc, to)?;
            let yca = resolve(wc, yca)?;
            let from_eid = verify_eid_exists("merge", &from)?;
            let to_eid = verify_eid_exists("merge", &to)?;
            let yca_eid = verify_eid_exists("merge", &yca)?;
            verify_rev_unspecified("merge", &to)?;
            if from_eid != to_eid || from_eid != yca_eid {
                writeln!(
                    out,
                    "Warning: root elements differ in the requested merge \
                     (from: {from_eid}, to: {to_eid}, yca: {yca_eid})"
                )?;
            }
            let src_txn = wc.materialize_txn(from.revnum)?;
            let yca_txn = wc.materialize_txn(yca.revnum)?;
            let to_bid = to.el_rev.bid.clone();
            let conflicts = branch_merge(
                wc.edit_txn_mut(),
                &to_bid,
                to_eid,
                MergeSource::new(&src_txn, &from.el_rev.bid, from_eid),
                Some(MergeSource::new(&yca_txn, &yca.el_rev.bid, yca_eid)),
            )?;
            if !conflicts.is_empty() {
                for line in format::conflict_lines(&conflicts, "merge: ") {
                    writeln!(out, "{line}")?;
                }
                return Err(conflicts.to_error("merge"));
            }
            tracing::debug!("merge completed with no conflicts");
        }

        ActionKind::Cp { src, dst } => {
            let s = resolve(wc, src)?;
            let d = resolve(wc, dst)?;
            verify_rev_specified("cp", &s)?;
            let src_eid = verify_eid_exists("cp", &s)?;
            verify_rev_unspecified("cp", &d)?;
            verify_eid_nonexistent("cp", &d)?;
            let to_parent = verify_parent_eid_exists("cp", &d)?;
            do_copy(wc, &s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
            if !quiet {
                writeln!(out, "A+   {} (from {}@{})", d.raw, s.raw, s.revnum.map_or(-1, |r| r.value() as i64))?;
            }
        }

        ActionKind::Mv { src, dst } => {
            let s = resolve(wc, src)?;
            let d = resolve(wc, dst)?;
            let el_rev = point_to_outer_element_instead(wc, "mv", &s.el_rev)?;
            let s = Resolved { el_rev, ..s };
            verify_rev_unspecified("mv", &s)?;
            let src_eid = verify_eid_exists("mv", &s)?;
            verify_rev_unspecified("mv", &d)?;
            verify_eid_nonexistent("mv", &d)?;
            let to_parent = verify_parent_eid_exists("mv", &d)?;
            verify_not_in_source("mv", wc, src_eid, &s, &d)?;

            if s.el_rev.bid == d.parent_el_rev.bid {
                do_move(wc, &s.el_rev.bid, src_eid, to_parent, &d.path_name)?;
                if !quiet {
                    writeln!(out, "V    {} (from {})", d.raw, s.raw)?;
                }
            } else {
                cross_branch_move(wc, ctx, &s, src_eid, &d, to_parent, out)?;
            }
        }

        ActionKind::Rm { path } => {
            let arg = resolve(wc, path)?;
            let el_rev = point_to_outer_element_instead(wc, "rm", &arg.el_rev)?;
            let arg = Resolved { el_rev, ..arg };
            verify_rev_unspecified("rm", &arg)?;
            let eid = verify_eid_exists("rm", &arg)?;
            let bid = arg.el_rev.bid.clone();
            wc.edit_txn_mut().branch_mut(&bid)?.delete_one(eid)?;
            if !quiet {
                writeln!(out, "D    {}", arg.raw)?;
            }
        }

        ActionKind::CopyAndDelete { src, dst } => {
            let (s, src_eid, d, to_parent) =
                resolve_move_pair(wc, "copy-and-delete", src, dst)?;
            do_copy(wc, &s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
            do_delete(wc, &s.el_rev.bid, src_eid)?;
            if !quiet {
                writeln!(out, "A+   {} (from {})", d.raw, s.raw)?;
                writeln!(out, "D    {}", s.raw)?;
            }
        }

        ActionKind::BranchAndDelete { src, dst } => {
            let (s, src_eid, d, to_parent) =
                resolve_move_pair(wc, "branch-and-delete", src, dst)?;
            let new_bid = do_branch(wc, &s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
            do_delete(wc, &s.el_rev.bid, src_eid)?;
            if !quiet {
                writeln!(out, "A+   {} (branch {new_bid})", d.raw)?;
                writeln!(out, "D    {}", s.raw)?;
            }
        }

        ActionKind::BranchIntoAndDelete { src, dst } => {
            let (s, src_eid, d, to_parent) =
                resolve_move_pair(wc, "branch-into-and-delete", src, dst)?;
            do_branch_into(wc, ctx, &s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
            do_delete(wc, &s.el_rev.bid, src_eid)?;
            if !quiet {
                writeln!(out, "A+   {} (subtree)", d.raw)?;
                writeln!(out, "D    {}", s.raw)?;
            }
        }

        ActionKind::Mkdir { path } => {
            let arg = resolve(wc, path)?;
            verify_rev_unspecified("mkdir", &arg)?;
            verify_eid_nonexistent("mkdir", &arg)?;
            let parent = verify_parent_eid_exists("mkdir", &arg)?;
            let bid = arg.parent_el_rev.bid.clone();
            let eid = wc.edit_txn_mut().new_eid()?;
            wc.edit_txn_mut().branch_mut(&bid)?.alter_checked(
                eid,
                Some(parent),
                &arg.path_name,
                Payload::dir(),
            )?;
            if !quiet {
                writeln!(out, "A    {}", arg.raw)?;
            }
        }

        ActionKind::Put { local, path } => {
            let arg = resolve(wc, path)?;
            verify_rev_unspecified("put", &arg)?;
            let parent = verify_parent_eid_exists("put", &arg)?;
            let text = read_local_text(local)?;
            match arg.el_rev.eid {
                Some(eid) => {
                    // Keep existing props; replace the text.
                    let bid = arg.el_rev.bid.clone();
                    let element = wc
                        .edit_txn()
                        .branch(&bid)
                        .and_then(|b| b.element(eid))
                        .cloned()
                        .ok_or_else(|| {
                            EngineError::branching("put", format!("element not found at '{}'", arg.raw))
                        })?;
                    let props = element.payload.props().cloned().unwrap_or_default();
                    wc.edit_txn_mut().branch_mut(&bid)?.alter_one(
                        eid,
                        element.parent,
                        &element.name,
                        Payload::File { props, text },
                    )?;
                    if !quiet {
                        writeln!(out, "M    {}", arg.raw)?;
                    }
                }
                None => {
                    let bid = arg.parent_el_rev.bid.clone();
                    let eid = wc.edit_txn_mut().new_eid()?;
                    wc.edit_txn_mut().branch_mut(&bid)?.alter_checked(
                        eid,
                        Some(parent),
                        &arg.path_name,
                        Payload::file(text),
                    )?;
                    if !quiet {
                        writeln!(out, "A    {}", arg.raw)?;
                    }
                }
            }
        }

        ActionKind::Cat { path } => {
            let arg = resolve(wc, path)?;
            let eid = verify_eid_exists("cat", &arg)?;
            let txn = wc.materialize_txn(arg.revnum)?;
            let element = txn
                .branch(&arg.el_rev.bid)
                .and_then(|b| b.element(eid))
                .ok_or_else(|| {
                    EngineError::branching("cat", format!("element not found at path '{}'", arg.raw))
                })?;
            if let Some(props) = element.payload.props() {
                for (name, value) in props {
                    writeln!(out, "property '{name}': '{}'", String::from_utf8_lossy(value))?;
                }
            }
            if let Some(text) = element.payload.text() {
                out.write_all(text)?;
            }
        }

        ActionKind::Commit => {
            do_commit(wc, ctx, out)?;
        }

        ActionKind::Update { path } => {
            let arg = resolve(wc, path)?;
            verify_eid_exists("update", &arg)?;
            verify_rev_specified("update", &arg)?;
            let rev = arg.revnum.expect("verified above");
            let conflicts = wc.update(rev)?;
            if !conflicts.is_empty() {
                for line in format::conflict_lines(&conflicts, "switch: ") {
                    writeln!(out, "{line}")?;
                }
                return Err(conflicts.to_error("switch"));
            }
            if !quiet {
                writeln!(out, "Updated to {rev}")?;
            }
        }

        ActionKind::Switch { target } => {
            let arg = resolve(wc, target)?;
            verify_eid_exists("switch", &arg)?;
            let target_bid = arg.el_rev.bid.clone();
            warn_on_root_change(wc, &target_bid, &arg, out)?;
            let conflicts = wc.switch(arg.revnum, &target_bid)?;
            if !conflicts.is_empty() {
                for line in format::conflict_lines(&conflicts, "switch: ") {
                    writeln!(out, "{line}")?;
                }
                return Err(conflicts.to_error("switch"));
            }
            if !quiet {
                writeln!(out, "Switched to branch {target_bid}")?;
            }
        }

        ActionKind::Revert => {
            wc.revert()?;
            if !quiet {
                writeln!(out, "Reverted")?;
            }
        }

        ActionKind::Migrate { path } => {
            let arg = resolve(wc, path)?;
            verify_eid_exists("migrate", &arg)?;
            verify_rev_specified("migrate", &arg)?;
            let rev = arg.revnum.expect("verified above");
            wc.migrate(rev, rev)?;
            if !quiet {
                writeln!(out, "Migrated {rev}")?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Command bodies
// ---------------------------------------------------------------------------

/// Shared resolution for the three explicit move commands and `rm`-style
/// outer-element re-pointing.
fn resolve_move_pair<R: Repo>(
    wc: &Workspace<R>,
    op: &str,
    src: &ArgSpec,
    dst: &ArgSpec,
) -> Result<(Resolved, Eid, Resolved, Eid)> {
    let s = resolve(wc, src)?;
    let d = resolve(wc, dst)?;
    let el_rev = point_to_outer_element_instead(wc, op, &s.el_rev)?;
    let s = Resolved { el_rev, ..s };
    verify_rev_unspecified(op, &s)?;
    let src_eid = verify_eid_exists(op, &s)?;
    verify_rev_unspecified(op, &d)?;
    verify_eid_nonexistent(op, &d)?;
    let to_parent = verify_parent_eid_exists(op, &d)?;
    verify_not_in_source(op, wc, src_eid, &s, &d)?;
    Ok((s, src_eid, d, to_parent))
}

/// Move within one branch: a single alteration changing parent and name.
fn do_move<R: Repo>(
    wc: &mut Workspace<R>,
    bid: &BranchId,
    eid: Eid,
    to_parent: Eid,
    name: &str,
) -> Result<()> {
    let payload = wc
        .edit_txn()
        .branch(bid)
        .and_then(|b| b.element(eid))
        .map(|el| el.payload.clone())
        .ok_or_else(|| EngineError::Branching(format!("element {eid} not found in {bid}")))?;
    wc.edit_txn_mut()
        .branch_mut(bid)?
        .alter_checked(eid, Some(to_parent), name, payload)
}

fn do_delete<R: Repo>(wc: &mut Workspace<R>, bid: &BranchId, eid: Eid) -> Result<()> {
    wc.edit_txn_mut().branch_mut(bid)?.delete_one(eid)
}

/// Copy: a deep copy with fresh element identities.
fn do_copy<R: Repo>(
    wc: &mut Workspace<R>,
    src: &Resolved,
    src_eid: Eid,
    to_bid: &BranchId,
    to_parent: Eid,
    name: &str,
) -> Result<()> {
    let src_txn = wc.materialize_txn(src.revnum)?;
    let sub = src_txn.subtree(&src.el_rev.bid, src_eid).ok_or_else(|| {
        EngineError::branching("cp", format!("cannot copy from '{}'", src.raw))
    })?;
    copy_subtree_fresh(wc.edit_txn_mut(), to_bid, to_parent, name, &sub)
}

fn copy_subtree_fresh(
    edit: &mut Txn,
    to_bid: &BranchId,
    to_parent: Eid,
    name: &str,
    sub: &Subtree,
) -> Result<()> {
    let mut mapping = std::collections::BTreeMap::new();
    for (old, _) in sub.tree.iter() {
        mapping.insert(old, edit.new_eid()?);
    }
    for (old, el) in sub.tree.iter() {
        let new_eid = mapping[&old];
        if old == sub.tree.root_eid() {
            edit.branch_mut(to_bid)?
                .alter_checked(new_eid, Some(to_parent), name, el.payload.clone())?;
        } else {
            let old_parent = el.parent.ok_or_else(|| {
                EngineError::Branching(format!("subtree element {old} has no parent"))
            })?;
            edit.branch_mut(to_bid)?.alter_one(
                new_eid,
                Some(mapping[&old_parent]),
                &el.name,
                el.payload.clone(),
            )?;
        }
    }
    // Nested branches inside the copied subtree reattach under the new
    // anchor identities.
    for (old_anchor, nested) in &sub.subbranches {
        let new_anchor = mapping[old_anchor];
        edit.branch_from(to_bid.nest(new_anchor), None, nested)?;
    }
    Ok(())
}

/// Branch: a deep copy preserving element identities, as a new branch
/// anchored at a fresh subbranch-root element.
fn do_branch<R: Repo>(
    wc: &mut Workspace<R>,
    src: &Resolved,
    src_eid: Eid,
    to_outer_bid: &BranchId,
    to_outer_parent: Eid,
    name: &str,
) -> Result<BranchId> {
    let src_txn = wc.materialize_txn(src.revnum)?;
    let sub = src_txn.subtree(&src.el_rev.bid, src_eid).ok_or_else(|| {
        EngineError::branching("branch", format!("cannot branch from '{}'", src.raw))
    })?;
    let predecessor = src.revnum.map(|rev| RevBid::new(rev, src.el_rev.bid.clone()));
    let outer_eid = wc.edit_txn_mut().new_eid()?;
    let new_bid = to_outer_bid.nest(outer_eid);
    wc.edit_txn_mut().branch_from(new_bid.clone(), predecessor, &sub)?;
    wc.edit_txn_mut().branch_mut(to_outer_bid)?.alter_checked(
        outer_eid,
        Some(to_outer_parent),
        name,
        Payload::Subbranch,
    )?;
    Ok(new_bid)
}

/// Branch-into: instantiate the source subtree's elements, identities
/// preserved, inside an existing branch.
fn do_branch_into<R: Repo>(
    wc: &mut Workspace<R>,
    ctx: &CommandContext,
    src: &Resolved,
    src_eid: Eid,
    to_bid: &BranchId,
    to_parent: Eid,
    name: &str,
) -> Result<()> {
    let src_txn = wc.materialize_txn(src.revnum)?;
    let mut sub = src_txn.subtree(&src.el_rev.bid, src_eid).ok_or_else(|| {
        EngineError::branching("branch-into", format!("cannot branch from '{}'", src.raw))
    })?;

    if ctx.branch_into_policy == BranchIntoPolicy::FailOnExisting {
        if let Some(target) = wc.edit_txn().branch(to_bid) {
            for (eid, _) in sub.tree.iter() {
                if target.element(eid).is_some() {
                    return Err(EngineError::branching(
                        "branch-into",
                        format!("element {eid} already exists in branch {to_bid}"),
                    ));
                }
            }
        }
    }

    // Re-anchor the subtree root under the target parent, then instantiate.
    let root_eid = sub.tree.root_eid();
    let payload = sub
        .tree
        .get(root_eid)
        .map(|el| el.payload.clone())
        .ok_or_else(|| EngineError::Branching(format!("subtree has no root {root_eid}")))?;
    sub.tree
        .set(root_eid, Element::new(to_parent, name.to_owned(), payload));
    wc.edit_txn_mut().instantiate_subtree(to_bid, &sub)
}

/// The interactive-or-policy seam for `mv` across branches.
fn cross_branch_move<R: Repo, W: Write>(
    wc: &mut Workspace<R>,
    ctx: &CommandContext,
    s: &Resolved,
    src_eid: Eid,
    d: &Resolved,
    to_parent: Eid,
    out: &mut W,
) -> Result<()> {
    let policy = match ctx.move_policy {
        CrossBranchMovePolicy::AskUser if !ctx.interactive => {
            return Err(EngineError::branching(
                "mv",
                "the source and target are in different branches; use one of \
                 copy-and-delete, branch-and-delete, branch-into-and-delete",
            ));
        }
        CrossBranchMovePolicy::AskUser => {
            writeln!(
                out,
                "mv: The source and target are in different branches. \
                 Some ways to move content to a different branch are:\n\
                 \x20 c: copy-and-delete: cp SOURCE TARGET; rm SOURCE\n\
                 \x20 b: branch-and-delete: branch SOURCE TARGET; rm SOURCE\n\
                 \x20 i: branch-into-and-delete: branch-into SOURCE TARGET; rm SOURCE"
            )?;
            write!(out, "Your choice (c, b, i, or just <enter> to do nothing): ")?;
            out.flush()?;
            let mut line = String::new();
            if std::io::stdin().lock().read_line(&mut line)? == 0 {
                return Ok(());
            }
            match line.trim().chars().next() {
                Some('c' | 'C') => CrossBranchMovePolicy::CopyAndDelete,
                Some('b' | 'B') => CrossBranchMovePolicy::BranchAndDelete,
                Some('i' | 'I') => CrossBranchMovePolicy::BranchIntoAndDelete,
                _ => return Ok(()),
            }
        }
        policy => policy,
    };

    match policy {
        CrossBranchMovePolicy::CopyAndDelete => {
            do_copy(wc, s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
        }
        CrossBranchMovePolicy::BranchAndDelete => {
            do_branch(wc, s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
        }
        CrossBranchMovePolicy::BranchIntoAndDelete => {
            do_branch_into(wc, ctx, s, src_eid, &d.parent_el_rev.bid, to_parent, &d.path_name)?;
        }
        CrossBranchMovePolicy::AskUser => unreachable!("resolved above"),
    }
    do_delete(wc, &s.el_rev.bid, src_eid)
}

fn do_commit<R: Repo, W: Write>(
    wc: &mut Workspace<R>,
    ctx: &CommandContext,
    out: &mut W,
) -> Result<()> {
    let mut revprops = ctx.revprops.clone();
    if !revprops.contains_key(REVPROP_LOG) && !wc.list_of_commands().is_empty() {
        // No log message provided: use the list of commands.
        revprops.insert(REVPROP_LOG.to_owned(), wc.list_of_commands().join("\n"));
    }

    let prev_base_rev = wc.base_rev();
    let prev_base_bid = wc.base_bid().clone();
    match wc.commit(revprops)? {
        None => {
            if !ctx.config.quiet {
                writeln!(out, "There are no changes to commit.")?;
            }
            let bid = wc.working_bid().clone();
            wc.re_checkout(Some(prev_base_rev), &bid)?;
        }
        Some(outcome) => {
            writeln!(out, "Committed r{}:", outcome.revision.value())?;
            let left_txn = wc.repo().load_branching_state(prev_base_rev)?;
            let right_txn = wc.repo().load_branching_state(outcome.revision)?;
            if let (Some(left_branch), Some(right_branch)) = (
                left_txn.branch(&prev_base_bid),
                right_txn.branch(&outcome.committed_bid),
            ) {
                let left_root = left_branch.root_eid();
                let right_root = right_branch.root_eid();
                branch_diff_r(
                    ctx,
                    &left_txn,
                    &prev_base_bid,
                    left_root,
                    Some(prev_base_rev),
                    &right_txn,
                    &outcome.committed_bid,
                    right_root,
                    Some(outcome.revision),
                    "   ",
                    out,
                )?;
            }
            wc.re_checkout(Some(outcome.revision), &outcome.committed_bid.clone())?;
            wc.clear_commands();
        }
    }
    Ok(())
}

fn do_log<R: Repo, W: Write>(
    wc: &Workspace<R>,
    ctx: &CommandContext,
    left: &Resolved,
    right: &Resolved,
    out: &mut W,
) -> Result<()> {
    let first_rev = left.revnum.expect("verified by caller");
    let mut rev = right.revnum.expect("verified by caller");
    let mut bid = right.el_rev.bid.clone();

    while rev > first_rev {
        let Some(pred) = wc.predecessor_location(rev, &bid)? else {
            break;
        };
        writeln!(out, "{LOG_SEPARATOR}")?;
        writeln!(out, "r{} | ...", rev.value())?;
        writeln!(out, "Changed elements:")?;

        let left_txn = wc.repo().load_branching_state(pred.rev)?;
        let right_txn = wc.repo().load_branching_state(rev)?;
        if let (Some(left_branch), Some(right_branch)) =
            (left_txn.branch(&pred.bid), right_txn.branch(&bid))
        {
            let left_root = left_branch.root_eid();
            let right_root = right_branch.root_eid();
            branch_diff_r(
                ctx,
                &left_txn,
                &pred.bid,
                left_root,
                Some(pred.rev),
                &right_txn,
                &bid,
                right_root,
                Some(rev),
                "   ",
                out,
            )?;
        }
        rev = pred.rev;
        bid = pred.bid;
    }
    Ok(())
}

/// Recursive subtree diff with per-branch headers.
#[allow(clippy::too_many_arguments)]
fn branch_diff_r<W: Write>(
    ctx: &CommandContext,
    left_txn: &Txn,
    left_bid: &BranchId,
    left_eid: Eid,
    left_rev: Option<RevNum>,
    right_txn: &Txn,
    right_bid: &BranchId,
    right_eid: Eid,
    right_rev: Option<RevNum>,
    prefix: &str,
    out: &mut W,
) -> Result<()> {
    let left_sub = left_txn.subtree(left_bid, left_eid);
    let right_sub = right_txn.subtree(right_bid, right_eid);
    subtree_diff_r(
        ctx,
        left_sub.as_ref().map(|s| (left_bid.clone(), s)),
        left_rev,
        right_sub.as_ref().map(|s| (right_bid.clone(), s)),
        right_rev,
        prefix,
        out,
    )
}

fn subtree_diff_r<W: Write>(
    ctx: &CommandContext,
    left: Option<(BranchId, &Subtree)>,
    left_rev: Option<RevNum>,
    right: Option<(BranchId, &Subtree)>,
    right_rev: Option<RevNum>,
    prefix: &str,
    out: &mut W,
) -> Result<()> {
    let describe = |rev: Option<RevNum>, bid: &BranchId, sub: &Subtree| {
        let rev = rev.map_or_else(|| "working".to_owned(), |r| r.to_string());
        format!("{rev}:{bid}:{}", sub.tree.root_eid())
    };

    match (&left, &right) {
        (None, Some((bid, sub))) => {
            writeln!(out, "{prefix}--- added branch {}", describe(right_rev, bid, sub))?;
        }
        (Some((bid, sub)), None) => {
            writeln!(out, "{prefix}--- deleted branch {}", describe(left_rev, bid, sub))?;
        }
        (Some((lbid, lsub)), Some((rbid, rsub))) => {
            let left_str = describe(left_rev, lbid, lsub);
            let right_str = describe(right_rev, rbid, rsub);
            let lines = format::subtree_diff_lines(
                &lsub.tree,
                &rsub.tree,
                match ctx.config.ui_mode {
                    UiMode::Paths => UiMode::Paths,
                    _ => UiMode::Eids,
                },
                prefix,
            );
            if !lines.is_empty() {
                if left_str == right_str {
                    writeln!(out, "{prefix}--- diff branch {left_str}")?;
                } else {
                    writeln!(out, "{prefix}--- diff branch {left_str} : {right_str}")?;
                }
                for line in lines {
                    writeln!(out, "{line}")?;
                }
            }
        }
        (None, None) => return Ok(()),
    }

    // Recurse into each subbranch that exists on either side.
    let mut anchors: std::collections::BTreeSet<Eid> = std::collections::BTreeSet::new();
    if let Some((_, sub)) = &left {
        anchors.extend(sub.subbranches.keys().copied());
    }
    if let Some((_, sub)) = &right {
        anchors.extend(sub.subbranches.keys().copied());
    }
    for anchor in anchors {
        let sub_left = left.as_ref().and_then(|(bid, sub)| {
            sub.subbranches.get(&anchor).map(|s| (bid.nest(anchor), s))
        });
        let sub_right = right.as_ref().and_then(|(bid, sub)| {
            sub.subbranches.get(&anchor).map(|s| (bid.nest(anchor), s))
        });
        subtree_diff_r(ctx, sub_left, left_rev, sub_right, right_rev, prefix, out)?;
    }
    Ok(())
}

fn warn_on_root_change<R: Repo, W: Write>(
    wc: &Workspace<R>,
    target_bid: &BranchId,
    arg: &Resolved,
    out: &mut W,
) -> Result<()> {
    if !wc.edit_txn().is_changed() {
        return Ok(());
    }
    let target_txn = wc.materialize_txn(arg.revnum)?;
    let target_root = target_txn
        .branch(target_bid)
        .map(crate::branch::state::BranchState::root_eid);
    let base_root = wc
        .base_txn()
        .branch(wc.base_bid())
        .map(crate::branch::state::BranchState::root_eid);
    if let (Some(target_root), Some(base_root)) = (target_root, base_root) {
        if target_root != base_root {
            writeln!(
                out,
                "Warning: you are switching from {} rooted at {base_root} to {target_bid} \
                 rooted at {target_root}, a different root element, while there are local changes.",
                wc.base_bid()
            )?;
        }
    }
    Ok(())
}

fn read_local_text(local: &str) -> Result<Vec<u8>> {
    if local == "-" {
        let mut text = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin().lock(), &mut text)?;
        Ok(text)
    } else {
        Ok(std::fs::read(local)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemRepo;

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_owned).collect()
    }

    fn run(wc: &mut Workspace<MemRepo>, line: &str) -> Result<String> {
        let ctx = CommandContext::default();
        let actions = parse_actions(&words(line))?;
        let mut out = Vec::new();
        execute(wc, &ctx, &actions, &mut out)?;
        Ok(String::from_utf8(out).expect("command output is UTF-8"))
    }

    fn fresh_wc() -> Workspace<MemRepo> {
        Workspace::checkout(MemRepo::in_memory(), None, None).unwrap()
    }

    #[test]
    fn parse_rejects_unknown_command() {
        let err = parse_actions(&words("frobnicate x")).unwrap_err();
        assert!(matches!(err, EngineError::IncorrectParams(_)));
    }

    #[test]
    fn parse_rejects_missing_args() {
        let err = parse_actions(&words("mv only-one")).unwrap_err();
        assert!(format!("{err}").contains("SRC DST"));
    }

    #[test]
    fn parse_consumes_fixed_arity() {
        let actions = parse_actions(&words("mkdir a mkdir a/b commit")).unwrap();
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[2].kind, ActionKind::Commit));
    }

    #[test]
    fn mkdir_and_ls() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir top mkdir top/inner").unwrap();
        assert!(wc.find_el_rev(None, None, "top/inner").unwrap().eid.is_some());
    }

    #[test]
    fn mkdir_twice_is_an_error() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir a").unwrap();
        let err = run(&mut wc, "mkdir a").unwrap_err();
        assert!(format!("{err}").contains("already exists"));
    }

    #[test]
    fn mkdir_into_missing_parent_is_an_error() {
        let mut wc = fresh_wc();
        let err = run(&mut wc, "mkdir ghost/child").unwrap_err();
        assert!(format!("{err}").contains("not found"));
    }

    #[test]
    fn rm_of_missing_path_is_an_error() {
        let mut wc = fresh_wc();
        let err = run(&mut wc, "rm nothing").unwrap_err();
        assert!(format!("{err}").contains("element not found"));
    }

    #[test]
    fn mv_rejects_target_inside_source() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir a mkdir a/b").unwrap();
        let err = run(&mut wc, "mv a a/b/c").unwrap_err();
        assert!(format!("{err}").contains("nested inside the source"));
    }

    #[test]
    fn mv_within_branch_keeps_identity() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir a").unwrap();
        let before = wc.find_el_rev(None, None, "a").unwrap().eid.unwrap();
        run(&mut wc, "mv a b").unwrap();
        let after = wc.find_el_rev(None, None, "b").unwrap().eid.unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn cp_requires_revision_on_source() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir a").unwrap();
        let err = run(&mut wc, "cp a b").unwrap_err();
        assert!(format!("{err}").contains("revision number required"));
    }

    #[test]
    fn cross_branch_mv_in_batch_mode_is_an_error() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir dir mkbranch nest").unwrap();
        let err = run(&mut wc, "mv dir nest/dir").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("different branches"), "{msg}");
        assert!(msg.contains("copy-and-delete"), "{msg}");
    }

    #[test]
    fn rm_of_top_level_branch_root_is_an_error() {
        let mut wc = fresh_wc();
        let err = run(&mut wc, "rm .").unwrap_err();
        assert!(format!("{err}").contains("top-level branch"));
    }

    #[test]
    fn rm_of_subbranch_root_deletes_outer_element() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkbranch nest").unwrap();
        let anchor = {
            let b0 = BranchId::new("B0").unwrap();
            wc.edit_txn().branch(&b0).unwrap().eid_at_path("nest").unwrap()
        };
        run(&mut wc, "rm nest").unwrap();
        let b0 = BranchId::new("B0").unwrap();
        assert!(wc.edit_txn().branch(&b0).unwrap().element(anchor).is_none());
        // After the sequence point of the next action, the nested branch is
        // purged too.
        run(&mut wc, "info-wc").unwrap();
        assert!(wc.edit_txn().branch(&b0.nest(anchor)).is_none());
    }

    #[test]
    fn put_creates_and_modifies() {
        let mut wc = fresh_wc();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("text.txt");
        std::fs::write(&file, "first").unwrap();
        run(&mut wc, &format!("put {} f", file.display())).unwrap();
        let out = run(&mut wc, "cat f").unwrap();
        assert_eq!(out, "first");

        std::fs::write(&file, "second").unwrap();
        run(&mut wc, &format!("put {} f", file.display())).unwrap();
        let out = run(&mut wc, "cat f").unwrap();
        assert_eq!(out, "second");
    }

    #[test]
    fn commit_writes_command_list_as_log_message() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir a mkdir b commit").unwrap();
        let log = wc
            .repo()
            .revprops(RevNum::new(1))
            .unwrap()
            .get(REVPROP_LOG)
            .cloned()
            .unwrap();
        assert_eq!(log, "mkdir a\nmkdir b");
        // The list resets after a successful commit.
        assert!(wc.list_of_commands().is_empty());
    }

    #[test]
    fn commit_output_names_revision_and_changes() {
        let mut wc = fresh_wc();
        let out = run(&mut wc, "mkdir a commit").unwrap();
        assert!(out.contains("Committed r1:"), "{out}");
        assert!(out.contains("--- diff branch"), "{out}");
    }

    #[test]
    fn empty_commit_reports_nothing_to_commit() {
        let mut wc = fresh_wc();
        let out = run(&mut wc, "commit").unwrap();
        assert!(out.contains("There are no changes to commit."), "{out}");
        assert_eq!(wc.repo().head_revnum(), RevNum::new(0));
    }

    #[test]
    fn status_shows_working_changes() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir newdir").unwrap();
        let out = run(&mut wc, "status").unwrap();
        assert!(out.contains("--- diff branch"), "{out}");
        assert!(out.contains('A'), "{out}");
    }

    #[test]
    fn info_wc_reports_locations() {
        let mut wc = fresh_wc();
        let out = run(&mut wc, "info-wc").unwrap();
        assert!(out.contains("Repository Root: mem://repo"));
        assert!(out.contains("Base Revision: 0"));
        assert!(out.contains("Base Branch:    B0"));
        assert!(out.contains("Working Branch: B0"));
    }

    #[test]
    fn ls_serial_mode_round_trips() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir a").unwrap();
        let ctx = CommandContext {
            config: PresentationConfig {
                ui_mode: UiMode::Serial,
                quiet: false,
            },
            ..CommandContext::default()
        };
        let actions = parse_actions(&words("ls .")).unwrap();
        let mut out = Vec::new();
        execute(&mut wc, &ctx, &actions, &mut out).unwrap();
        let parsed = serial::parse_branch(&out).unwrap();
        assert_eq!(parsed.bid().as_str(), "B0");
    }

    #[test]
    fn update_without_revision_is_an_error() {
        let mut wc = fresh_wc();
        let err = run(&mut wc, "update .").unwrap_err();
        assert!(format!("{err}").contains("revision number required"));
    }

    #[test]
    fn log_walks_revisions() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkdir a commit").unwrap();
        run(&mut wc, "mkdir b commit").unwrap();
        let out = run(&mut wc, "log .@0 .@head").unwrap();
        assert!(out.contains("r2 | ..."), "{out}");
        assert!(out.contains("r1 | ..."), "{out}");
        assert!(out.contains("Changed elements:"), "{out}");
    }

    #[test]
    fn mkbranch_creates_nested_branch() {
        let mut wc = fresh_wc();
        run(&mut wc, "mkbranch sub").unwrap();
        let at = wc.find_el_rev(None, None, "sub").unwrap();
        assert_eq!(at.bid.depth(), 1, "path resolves into the nested branch");
        let out = run(&mut wc, "branches .").unwrap();
        assert!(out.contains("B0"), "{out}");
    }
}
