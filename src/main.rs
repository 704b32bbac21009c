use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use elmover::error::EngineError;
use elmover::format::{PresentationConfig, UiMode};
use elmover::model::ids::{BranchId, RevNum};
use elmover::repo::{MemRepo, RevProps, REVPROP_LOG};
use elmover::wc::commands::{execute, parse_actions, CommandContext};
use elmover::wc::Workspace;

/// Experimental move-tracking branching client
///
/// elmover edits a repository in which every tracked object is an element
/// with a durable integer identity (EID). Renames and moves are single
/// element mutations; branches share the EID namespace, so merges follow
/// content across moves, renames and branches.
///
/// ACTIONS are commands with fixed argument counts, for example:
///
///   elmover -U file:///tmp/repo mkdir doc put notes.txt doc/notes commit
///
/// Commands: info-wc, ls, branches, ls-br-r, log, diff, status, tbranch,
/// branch, branch-into, mkbranch, mkdir, put, cat, cp, mv, rm,
/// copy-and-delete, branch-and-delete, branch-into-and-delete, merge,
/// commit, update, switch, revert, migrate.
///
/// Paths take the form [^BRANCH/]RELPATH[@REV] where REV is a number or
/// one of 'head', 'base', 'committed'. Without a revision the reference is
/// into the working state.
///
/// With no actions on the command line and a terminal on stdin, elmover
/// enters an interactive prompt; errors are printed and the prompt
/// continues. In batch mode the first error aborts with exit code 1.
#[derive(Parser)]
#[command(name = "elmover")]
#[command(version, about, verbatim_doc_comment)]
struct Cli {
    /// Repository URL; file:// URLs keep branch metadata on disk
    #[arg(short = 'U', long = "url", value_name = "URL")]
    url: String,

    /// Base revision to check out (default: head)
    #[arg(short = 'r', long = "revision", value_name = "REV")]
    revision: Option<u64>,

    /// Base branch id to check out (default: B0)
    #[arg(short = 'B', long = "branch-id", value_name = "BRANCH")]
    branch_id: Option<String>,

    /// Commit log message
    #[arg(short = 'm', long = "message", value_name = "TEXT")]
    message: Option<String>,

    /// Read the commit log message from a file
    #[arg(short = 'F', long = "file", value_name = "PATH", conflicts_with = "message")]
    message_file: Option<PathBuf>,

    /// Extra revision property for commits (repeatable)
    #[arg(long = "with-revprop", value_name = "NAME=VALUE")]
    with_revprop: Vec<String>,

    /// Refer to elements by 'eids' or 'paths', or emit 'serial' form
    #[arg(long = "ui", value_name = "MODE", default_value = "eids")]
    ui: String,

    /// Suppress verbose notifications
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Actions to perform (interactive prompt when omitted)
    #[arg(value_name = "ACTION", trailing_var_arg = true)]
    actions: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("elmover: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let ui_mode: UiMode = cli.ui.parse()?;
    let revprops = build_revprops(&cli)?;

    let repo = MemRepo::open(&cli.url)?;
    let branch_id = cli
        .branch_id
        .as_deref()
        .map(BranchId::new)
        .transpose()
        .context("invalid --branch-id")?;
    let mut wc = Workspace::checkout(repo, cli.revision.map(RevNum::new), branch_id)?;

    let interactive = cli.actions.is_empty() && std::io::stdin().is_terminal();
    let ctx = CommandContext {
        config: PresentationConfig {
            ui_mode,
            quiet: cli.quiet,
        },
        revprops,
        interactive,
        ..CommandContext::default()
    };

    let mut out = std::io::stdout().lock();
    if cli.actions.is_empty() {
        command_loop(&mut wc, &ctx, interactive, &mut out)
    } else {
        let actions = parse_actions(&cli.actions)?;
        execute(&mut wc, &ctx, &actions, &mut out)?;
        out.flush()?;
        Ok(())
    }
}

fn build_revprops(cli: &Cli) -> Result<RevProps> {
    let mut revprops = RevProps::new();
    for spec in &cli.with_revprop {
        let (name, value) = spec.split_once('=').ok_or_else(|| {
            EngineError::IncorrectParams(format!("--with-revprop '{spec}': expected NAME=VALUE"))
        })?;
        revprops.insert(name.to_owned(), value.to_owned());
    }
    if let Some(message) = &cli.message {
        revprops.insert(REVPROP_LOG.to_owned(), message.clone());
    } else if let Some(path) = &cli.message_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read log message from {}", path.display()))?;
        revprops.insert(REVPROP_LOG.to_owned(), text);
    }
    Ok(revprops)
}

/// Read command lines from stdin. Interactively, each error is printed and
/// the prompt continues; with piped input the first error aborts. EOF (or
/// a cancelled prompt) is a clean exit.
fn command_loop<W: Write>(
    wc: &mut Workspace<MemRepo>,
    ctx: &CommandContext,
    interactive: bool,
    out: &mut W,
) -> Result<()> {
    let stdin = std::io::stdin();
    loop {
        if interactive {
            write!(out, "elmover> ")?;
            out.flush()?;
        }
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(());
        }
        let words: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        if words.is_empty() {
            continue;
        }

        let outcome = parse_actions(&words).and_then(|actions| execute(wc, ctx, &actions, out));
        match outcome {
            Ok(()) => {}
            Err(EngineError::Cancelled) => return Ok(()),
            Err(err) if interactive => {
                writeln!(out, "error: {err}")?;
            }
            Err(err) => return Err(err.into()),
        }
        out.flush()?;
    }
}
