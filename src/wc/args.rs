//! Command-argument grammar: `[^B<branch-id>/]<relpath>[@<rev>]`.
//!
//! A path argument optionally names a branch (`^B2.5/doc/readme`) and
//! optionally pins a revision (`doc/readme@4`, `.@head`). The revision word
//! is a number or one of `head`, `base`, `committed`; when absent, the
//! reference is into the working branch.

use crate::error::{EngineError, Result};
use crate::model::ids::{BranchId, RevNum};

// ---------------------------------------------------------------------------
// RevSpec / ArgSpec
// ---------------------------------------------------------------------------

/// A parsed revision word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevSpec {
    /// An explicit revision number.
    Number(RevNum),
    /// The latest revision.
    Head,
    /// The workspace base revision.
    Base,
    /// Synonym for `Base` in this engine (no per-path committed revisions).
    Committed,
}

/// A parsed path argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgSpec {
    /// Explicit branch, if the argument carried a `^B.../` prefix.
    pub bid: Option<BranchId>,
    /// The relative path (normalized: no leading `./`, no trailing `/`).
    pub relpath: String,
    /// The pinned revision, if any.
    pub rev: Option<RevSpec>,
}

impl ArgSpec {
    /// The parent path and final name component of `relpath`.
    /// `"a/b/c"` → `("a/b", "c")`; `"a"` → `("", "a")`; `""` → `("", "")`.
    #[must_use]
    pub fn split_parent(&self) -> (&str, &str) {
        match self.relpath.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", self.relpath.as_str()),
        }
    }
}

/// Parse one path argument.
///
/// # Errors
/// `BadId` for a malformed branch prefix, `IncorrectParams` for a revision
/// word that is not a number or `head`/`base`/`committed`.
pub fn parse_arg(raw: &str) -> Result<ArgSpec> {
    let (body, rev) = match raw.rsplit_once('@') {
        Some((body, rev_word)) => (body, Some(parse_rev_word(raw, rev_word)?)),
        None => (raw, None),
    };

    let (bid, relpath) = match body.strip_prefix('^') {
        Some(rest) => match rest.split_once('/') {
            Some((bid, path)) => (Some(bid.parse::<BranchId>()?), path),
            None => (Some(rest.parse::<BranchId>()?), ""),
        },
        None => (None, body),
    };

    Ok(ArgSpec {
        bid,
        relpath: normalize(relpath),
        rev,
    })
}

fn parse_rev_word(raw: &str, word: &str) -> Result<RevSpec> {
    match word {
        "head" => Ok(RevSpec::Head),
        "base" => Ok(RevSpec::Base),
        "committed" => Ok(RevSpec::Committed),
        _ => word.parse::<u64>().map(RevNum::new).map(RevSpec::Number).map_err(|_| {
            EngineError::IncorrectParams(format!(
                "'{raw}': revision specifier must be a number or 'head', 'base' or 'committed'"
            ))
        }),
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path() {
        let arg = parse_arg("doc/readme").unwrap();
        assert_eq!(arg.bid, None);
        assert_eq!(arg.relpath, "doc/readme");
        assert_eq!(arg.rev, None);
    }

    #[test]
    fn path_with_revision_number() {
        let arg = parse_arg("doc/readme@4").unwrap();
        assert_eq!(arg.rev, Some(RevSpec::Number(RevNum::new(4))));
    }

    #[test]
    fn rev_words() {
        assert_eq!(parse_arg(".@head").unwrap().rev, Some(RevSpec::Head));
        assert_eq!(parse_arg(".@base").unwrap().rev, Some(RevSpec::Base));
        assert_eq!(parse_arg(".@committed").unwrap().rev, Some(RevSpec::Committed));
    }

    #[test]
    fn branch_prefix() {
        let arg = parse_arg("^B2.5/doc/readme@7").unwrap();
        assert_eq!(arg.bid, Some(BranchId::new("B2.5").unwrap()));
        assert_eq!(arg.relpath, "doc/readme");
        assert_eq!(arg.rev, Some(RevSpec::Number(RevNum::new(7))));
    }

    #[test]
    fn branch_prefix_without_path() {
        let arg = parse_arg("^B1").unwrap();
        assert_eq!(arg.bid, Some(BranchId::new("B1").unwrap()));
        assert_eq!(arg.relpath, "");
    }

    #[test]
    fn dot_and_slashes_normalize_away() {
        assert_eq!(parse_arg(".").unwrap().relpath, "");
        assert_eq!(parse_arg("./a/./b/").unwrap().relpath, "a/b");
        assert_eq!(parse_arg("a//b").unwrap().relpath, "a/b");
    }

    #[test]
    fn bad_rev_word_is_incorrect_params() {
        let err = parse_arg("x@latest").unwrap_err();
        assert!(matches!(err, EngineError::IncorrectParams(_)));
        assert!(format!("{err}").contains("'head', 'base' or 'committed'"));
    }

    #[test]
    fn bad_branch_prefix_is_bad_id() {
        let err = parse_arg("^Q7/x").unwrap_err();
        assert!(matches!(err, EngineError::BadId(_)));
    }

    #[test]
    fn split_parent() {
        let arg = parse_arg("a/b/c").unwrap();
        assert_eq!(arg.split_parent(), ("a/b", "c"));
        let arg = parse_arg("top").unwrap();
        assert_eq!(arg.split_parent(), ("", "top"));
        let arg = parse_arg("").unwrap();
        assert_eq!(arg.split_parent(), ("", ""));
    }
}
