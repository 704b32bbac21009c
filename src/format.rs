//! Presentation: UI modes and rendering of diffs, listings and conflicts.
//!
//! The two presentational knobs — the UI mode and the quiet flag — thread
//! through as an explicit [`PresentationConfig`] passed into the command
//! layer; the core layers never see them. Rendering functions return lines;
//! the command layer decides where they go.
//!
//! Diff lines carry a status column (`M` modified, `A` added, `D` deleted,
//! `d` deleted-under-a-deleted-parent) and two flag columns: `v` when the
//! element moved (parent changed) and `r` when it was renamed.

use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::merge::ConflictStorage;
use crate::model::element::Element;
use crate::model::ids::Eid;
use crate::model::tree::ElementTree;

// ---------------------------------------------------------------------------
// UiMode / PresentationConfig
// ---------------------------------------------------------------------------

/// How diffs and listings refer to elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UiMode {
    /// Refer to elements by EID.
    #[default]
    Eids,
    /// Refer to elements by path.
    Paths,
    /// Emit the plain-text serialization instead of a listing.
    Serial,
}

impl fmt::Display for UiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eids => write!(f, "eids"),
            Self::Paths => write!(f, "paths"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

impl FromStr for UiMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eids" => Ok(Self::Eids),
            "paths" => Ok(Self::Paths),
            "serial" => Ok(Self::Serial),
            other => Err(EngineError::IncorrectParams(format!(
                "--ui must be one of 'eids', 'paths', 'serial', got '{other}'"
            ))),
        }
    }
}

/// The presentational knobs passed into the command layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresentationConfig {
    /// Diff/listing output mode.
    pub ui_mode: UiMode,
    /// Suppress verbose notifications.
    pub quiet: bool,
}

// ---------------------------------------------------------------------------
// Diff items
// ---------------------------------------------------------------------------

/// One element's worth of difference between two trees, prepared for
/// display.
#[derive(Clone, Debug)]
pub struct DiffItem {
    /// The element.
    pub eid: Eid,
    /// Left-side content, if present there.
    pub e0: Option<Element>,
    /// Right-side content, if present there.
    pub e1: Option<Element>,
    /// Left-side path, when the element had one.
    pub relpath0: Option<String>,
    /// Right-side path, when the element has one.
    pub relpath1: Option<String>,
    /// Parent changed.
    pub reparented: bool,
    /// Name changed.
    pub renamed: bool,
}

impl DiffItem {
    /// The path shown for this item: the right-hand one if the element
    /// exists there, else the left-hand one.
    #[must_use]
    pub fn major_path(&self) -> &str {
        self.relpath1
            .as_deref()
            .or(self.relpath0.as_deref())
            .unwrap_or("")
    }
}

/// Compute display-ready diff items between two trees.
#[must_use]
pub fn diff_items(left: &ElementTree, right: &ElementTree) -> Vec<DiffItem> {
    let diff = left.differences(right);
    diff.into_iter()
        .map(|(eid, (e0, e1))| {
            let reparented = match (&e0, &e1) {
                (Some(a), Some(b)) => a.parent != b.parent,
                _ => false,
            };
            let renamed = match (&e0, &e1) {
                (Some(a), Some(b)) => a.name != b.name,
                _ => false,
            };
            DiffItem {
                eid,
                relpath0: e0.as_ref().and_then(|_| left.path_of(eid)),
                relpath1: e1.as_ref().and_then(|_| right.path_of(eid)),
                e0,
                e1,
                reparented,
                renamed,
            }
        })
        .collect()
}

/// Render a subtree diff, one line per changed element, ordered with
/// deletions first. Paths mode sorts by path and annotates moves and
/// renames; EIDs mode sorts by EID.
#[must_use]
pub fn subtree_diff_lines(
    left: &ElementTree,
    right: &ElementTree,
    mode: UiMode,
    prefix: &str,
) -> Vec<String> {
    let mut items = diff_items(left, right);
    // Lowercase 'd' for a deleted element whose parent was also deleted.
    let deleted_parents: std::collections::BTreeSet<Eid> = items
        .iter()
        .filter(|item| item.e1.is_none())
        .map(|item| item.eid)
        .collect();

    match mode {
        UiMode::Paths => items.sort_by(|a, b| {
            let da = a.e0.is_some() && a.e1.is_none();
            let db = b.e0.is_some() && b.e1.is_none();
            db.cmp(&da).then_with(|| a.major_path().cmp(b.major_path()))
        }),
        _ => items.sort_by_key(|item| item.eid),
    }

    items
        .iter()
        .map(|item| {
            let mut status = match (&item.e0, &item.e1) {
                (Some(_), Some(_)) => 'M',
                (Some(_), None) => 'D',
                _ => 'A',
            };
            if status == 'D' {
                let parent_also_deleted = item
                    .e0
                    .as_ref()
                    .and_then(|el| el.parent)
                    .is_some_and(|parent| deleted_parents.contains(&parent));
                if parent_also_deleted {
                    status = 'd';
                }
            }
            let flags = format!(
                "{}{}",
                if item.reparented { 'v' } else { ' ' },
                if item.renamed { 'r' } else { ' ' }
            );
            match mode {
                UiMode::Paths => {
                    let from = match (item.reparented, item.renamed, &item.e0, &item.relpath0) {
                        (false, true, Some(e0), _) => {
                            format!(" (renamed from .../{})", e0.name)
                        }
                        (true, false, _, Some(p0)) => {
                            format!(" (moved from {}/...)", dirname(p0))
                        }
                        (true, true, _, Some(p0)) => format!(" (moved+renamed from {p0})"),
                        _ => String::new(),
                    };
                    format!("{prefix}{status}{flags} {}{from}", item.major_path())
                }
                _ => {
                    let new_desc = item.e1.as_ref().map(peid_name).unwrap_or_default();
                    let old_desc = match (&item.e0, &item.e1) {
                        (Some(e0), Some(_)) => format!(" (from {})", peid_name(e0)),
                        _ => String::new(),
                    };
                    format!("{prefix}{status}{flags} e{:<3} {new_desc}{old_desc}", item.eid.value())
                }
            }
        })
        .collect()
}

/// `e<parent>/<name>` for display in EIDs mode.
fn peid_name(el: &Element) -> String {
    match el.parent {
        Some(parent) => format!("{parent}/{}", el.name),
        None => "/".to_owned(),
    }
}

fn dirname(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// List a branch's reachable elements by path, one line per element,
/// annotating subbranch roots with their nested branch id.
#[must_use]
pub fn branch_elements_by_path(
    tree: &ElementTree,
    subbranch_id_of: impl Fn(Eid) -> Option<String>,
) -> Vec<String> {
    let mut entries: Vec<(String, Eid)> = tree
        .iter()
        .filter_map(|(eid, _)| tree.path_of(eid).map(|path| (path, eid)))
        .collect();
    entries.sort();
    entries
        .into_iter()
        .map(|(path, eid)| {
            let suffix = subbranch_id_of(eid)
                .map(|bid| format!(" (branch {bid})"))
                .unwrap_or_default();
            let shown = if path.is_empty() { "/" } else { path.as_str() };
            format!("  {shown}{suffix}")
        })
        .collect()
}

/// List a branch's elements by EID, orphans included.
#[must_use]
pub fn branch_elements_by_eid(
    tree: &ElementTree,
    subbranch_id_of: impl Fn(Eid) -> Option<String>,
) -> Vec<String> {
    tree.iter()
        .map(|(eid, el)| {
            let suffix = subbranch_id_of(eid)
                .map(|bid| format!(" (branch {bid})"))
                .unwrap_or_default();
            format!("  e{:<3} {}{suffix}", eid.value(), peid_name(el))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Render every conflict in `storage`, one line each, prefixed (for example
/// with `"merge: "`).
#[must_use]
pub fn conflict_lines(storage: &ConflictStorage, prefix: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for c in &storage.single_element {
        lines.push(format!(
            "{prefix}single-element conflict on {} in {}: yca={}, src={}, tgt={}",
            c.eid,
            c.bid,
            describe(c.yca.as_ref()),
            describe(c.src.as_ref()),
            describe(c.tgt.as_ref()),
        ));
    }
    for c in &storage.name_clash {
        let eids: Vec<String> = c.eids.iter().map(ToString::to_string).collect();
        lines.push(format!(
            "{prefix}name-clash conflict in {}: '{}' under {} claimed by {}",
            c.bid,
            c.name,
            c.parent,
            eids.join(", ")
        ));
    }
    for c in &storage.orphan {
        lines.push(format!(
            "{prefix}orphan conflict in {}: {} lost its parent {}",
            c.bid, c.eid, c.parent
        ));
    }
    lines
}

fn describe(el: Option<&Element>) -> String {
    match el {
        None => "(deleted)".to_owned(),
        Some(el) => format!("{} '{}' ({})", peid_name(el), el.name, el.payload.kind()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
