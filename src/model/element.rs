//! Element content: payloads and the `(parent, name, payload)` record.
//!
//! An element is the atomic tracked object of the engine. Its content is a
//! parent link, a name (one path component), and a payload: file, directory,
//! or subbranch-root marker. History is tracked per element, so a rename or
//! move is a single alteration of one element's content.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::ids::Eid;

/// Versioned properties attached to a file or directory payload.
///
/// `BTreeMap` keeps iteration deterministic, which the serializer and the
/// diff display rely on.
pub type Props = BTreeMap<String, Vec<u8>>;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The payload of an element.
///
/// The kind-specific invariants are structural: a file always has text, a
/// subbranch-root marker carries no further data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// A file: properties plus text bytes.
    File {
        /// Versioned properties.
        props: Props,
        /// File text.
        text: Vec<u8>,
    },
    /// A directory: properties only.
    Dir {
        /// Versioned properties.
        props: Props,
    },
    /// Marker indicating this element is the outer-branch anchor of a
    /// nested branch.
    Subbranch,
}

impl Payload {
    /// An empty file payload.
    #[must_use]
    pub fn empty_file() -> Self {
        Self::File {
            props: Props::new(),
            text: Vec::new(),
        }
    }

    /// A file payload with the given text and no properties.
    #[must_use]
    pub fn file(text: impl Into<Vec<u8>>) -> Self {
        Self::File {
            props: Props::new(),
            text: text.into(),
        }
    }

    /// A directory payload with no properties.
    #[must_use]
    pub fn dir() -> Self {
        Self::Dir { props: Props::new() }
    }

    /// Returns `true` for the subbranch-root marker.
    #[must_use]
    pub const fn is_subbranch_root(&self) -> bool {
        matches!(self, Self::Subbranch)
    }

    /// Returns `true` for a directory payload.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self, Self::Dir { .. })
    }

    /// The properties, if this payload kind carries any.
    #[must_use]
    pub const fn props(&self) -> Option<&Props> {
        match self {
            Self::File { props, .. } | Self::Dir { props } => Some(props),
            Self::Subbranch => None,
        }
    }

    /// The file text, for file payloads.
    #[must_use]
    pub fn text(&self) -> Option<&[u8]> {
        match self {
            Self::File { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Short kind name for display.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Dir { .. } => "dir",
            Self::Subbranch => "subbranch",
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

/// The content of one element: parent link, name, payload.
///
/// `parent == None` iff this is a branch root, iff `name` is empty. A
/// non-root name is a single path component and never contains `/`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// The parent element, or `None` for a branch root.
    pub parent: Option<Eid>,
    /// The element's name within its parent; empty for a branch root.
    pub name: String,
    /// The element's payload.
    pub payload: Payload,
}

impl Element {
    /// Content for a branch-root element.
    #[must_use]
    pub const fn root(payload: Payload) -> Self {
        Self {
            parent: None,
            name: String::new(),
            payload,
        }
    }

    /// Content for a non-root element.
    #[must_use]
    pub const fn new(parent: Eid, name: String, payload: Payload) -> Self {
        Self {
            parent: Some(parent),
            name,
            payload,
        }
    }

    /// Returns `true` for branch-root content.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Check the shape invariants: parent and name agree, and the name is a
    /// single path component.
    ///
    /// # Errors
    /// `Branching` describing the violated invariant.
    pub fn check(&self) -> Result<()> {
        match (&self.parent, self.name.is_empty()) {
            (None, false) => {
                return Err(EngineError::Branching(format!(
                    "root element content must have an empty name, got '{}'",
                    self.name
                )));
            }
            (Some(_), true) => {
                return Err(EngineError::Branching(
                    "non-root element content must have a name".to_owned(),
                ));
            }
            _ => {}
        }
        if self.name.contains('/') {
            return Err(EngineError::Branching(format!(
                "element name must be a single path component, got '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// Deep equality of two optional element contents.
///
/// Equal iff both absent, or both present with equal parent, name and
/// payload; payload equality requires matching kinds and (for files)
/// byte-identical props and text. This is the equality the whole diff
/// machinery is keyed on.
#[must_use]
pub fn content_equal(a: Option<&Element>, b: Option<&Element>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
