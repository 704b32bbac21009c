//! Plain-text serialization of branch metadata.
//!
//! The serializer is a total function over transactions and branches; the
//! parser accepts exactly what the serializer emits and fails with
//! `BadFormat` on any structural deviation. Round-trip equality is the
//! contract; the exact bytes are not part of the engine's public interface.
//!
//! Shape (one token stream; newlines are cosmetic):
//!
//! ```text
//! elmover-branching 1
//! rev 3 next-eid 12
//! branch B0 root-eid 0
//! element 0 parent -1 name 0: dir props 0
//! element 1 parent 0 name 3:doc file props 1 5:color 3:red text 6:hello.
//! element 5 parent 0 name 3:sub subbranch
//! end
//! ```
//!
//! Names, property keys/values and file text are length-prefixed
//! (`<len>:<bytes>`), so they may contain spaces and newlines.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::branch::state::BranchState;
use crate::branch::txn::Txn;
use crate::error::{EngineError, Result};
use crate::model::element::{Payload, Props};
use crate::model::ids::{BranchId, Eid, RevBid, RevNum};

const FORMAT_NAME: &str = "elmover-branching";
const FORMAT_VERSION: u64 = 1;

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Serialize a whole transaction: header, EID allocator position, and every
/// branch in branch-id order.
#[must_use]
pub fn serialize_txn(txn: &Txn) -> Vec<u8> {
    let mut out = Vec::new();
    let mut header = String::new();
    let _ = writeln!(header, "{FORMAT_NAME} {FORMAT_VERSION}");
    let _ = writeln!(
        header,
        "rev {} next-eid {}",
        txn.rev().value(),
        txn.next_eid().value()
    );
    out.extend_from_slice(header.as_bytes());
    for branch in txn.branches() {
        out.extend_from_slice(&serialize_branch(branch));
    }
    out
}

/// Serialize a single branch section.
#[must_use]
pub fn serialize_branch(branch: &BranchState) -> Vec<u8> {
    let mut out = Vec::new();
    let mut line = format!(
        "branch {} root-eid {}",
        branch.bid(),
        branch.root_eid().value()
    );
    if let Some(pred) = branch.predecessor() {
        let _ = write!(line, " predecessor {} {}", pred.rev.value(), pred.bid);
    }
    line.push('\n');
    out.extend_from_slice(line.as_bytes());

    for (eid, el) in branch.tree().iter() {
        let parent = el.parent.map_or(-1, Eid::value);
        let mut head = format!("element {} parent {parent} name ", eid.value());
        let _ = write!(head, "{}:", el.name.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(el.name.as_bytes());
        out.push(b' ');
        write_payload(&mut out, &el.payload);
        out.push(b'\n');
    }
    out.extend_from_slice(b"end\n");
    out
}

fn write_payload(out: &mut Vec<u8>, payload: &Payload) {
    match payload {
        Payload::Dir { props } => {
            out.extend_from_slice(b"dir ");
            write_props(out, props);
        }
        Payload::File { props, text } => {
            out.extend_from_slice(b"file ");
            write_props(out, props);
            out.extend_from_slice(format!(" text {}:", text.len()).as_bytes());
            out.extend_from_slice(text);
        }
        Payload::Subbranch => out.extend_from_slice(b"subbranch"),
    }
}

fn write_props(out: &mut Vec<u8>, props: &Props) {
    out.extend_from_slice(format!("props {}", props.len()).as_bytes());
    for (key, value) in props {
        out.extend_from_slice(format!(" {}:", key.len()).as_bytes());
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(format!(" {}:", value.len()).as_bytes());
        out.extend_from_slice(value);
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a serialized transaction back into a read-only base-state [`Txn`].
///
/// # Errors
/// `BadFormat` on any deviation from the serialized shape.
pub fn parse_txn(bytes: &[u8]) -> Result<Txn> {
    let mut scanner = Scanner::new(bytes);
    scanner.expect_keyword(FORMAT_NAME)?;
    let version = scanner.read_u64("format version")?;
    if version != FORMAT_VERSION {
        return Err(EngineError::BadFormat(format!(
            "unsupported format version {version}"
        )));
    }
    scanner.expect_keyword("rev")?;
    let rev = RevNum::new(scanner.read_u64("revision")?);
    scanner.expect_keyword("next-eid")?;
    let next_eid = Eid::new(scanner.read_i64("next-eid")?);

    let mut branches = BTreeMap::new();
    while !scanner.at_end() {
        let branch = parse_branch_section(&mut scanner)?;
        if branches.insert(branch.bid().clone(), branch).is_some() {
            return Err(EngineError::BadFormat("duplicate branch section".to_owned()));
        }
    }
    Ok(Txn::base_state(rev, branches, next_eid))
}

/// Parse a single branch section (as emitted by [`serialize_branch`]).
///
/// # Errors
/// `BadFormat` on any deviation.
pub fn parse_branch(bytes: &[u8]) -> Result<BranchState> {
    let mut scanner = Scanner::new(bytes);
    let branch = parse_branch_section(&mut scanner)?;
    if !scanner.at_end() {
        return Err(EngineError::BadFormat(
            "trailing data after branch section".to_owned(),
        ));
    }
    Ok(branch)
}

fn parse_branch_section(scanner: &mut Scanner<'_>) -> Result<BranchState> {
    scanner.expect_keyword("branch")?;
    let bid: BranchId = scanner.read_token("branch id")?.parse()?;
    scanner.expect_keyword("root-eid")?;
    let root_eid = Eid::new(scanner.read_i64("root eid")?);

    let predecessor = if scanner.peek_keyword("predecessor") {
        scanner.expect_keyword("predecessor")?;
        let rev = RevNum::new(scanner.read_u64("predecessor revision")?);
        let pred_bid: BranchId = scanner.read_token("predecessor branch id")?.parse()?;
        Some(RevBid::new(rev, pred_bid))
    } else {
        None
    };

    let mut branch = BranchState::new(bid, root_eid, predecessor);
    loop {
        if scanner.peek_keyword("end") {
            scanner.expect_keyword("end")?;
            return Ok(branch);
        }
        scanner.expect_keyword("element")?;
        let eid = Eid::new(scanner.read_i64("element id")?);
        scanner.expect_keyword("parent")?;
        let parent_raw = scanner.read_i64("parent eid")?;
        let parent = if parent_raw == -1 {
            None
        } else {
            Some(Eid::new(parent_raw))
        };
        scanner.expect_keyword("name")?;
        let name_bytes = scanner.read_blob("element name")?;
        let name = String::from_utf8(name_bytes)
            .map_err(|_| EngineError::BadFormat("element name is not UTF-8".to_owned()))?;
        let payload = parse_payload(scanner)?;
        branch
            .alter_one(eid, parent, &name, payload)
            .map_err(|err| EngineError::BadFormat(format!("invalid element record: {err}")))?;
    }
}

fn parse_payload(scanner: &mut Scanner<'_>) -> Result<Payload> {
    let kind = scanner.read_token("payload kind")?;
    match kind.as_str() {
        "dir" => Ok(Payload::Dir {
            props: parse_props(scanner)?,
        }),
        "file" => {
            let props = parse_props(scanner)?;
            scanner.expect_keyword("text")?;
            let text = scanner.read_blob("file text")?;
            Ok(Payload::File { props, text })
        }
        "subbranch" => Ok(Payload::Subbranch),
        other => Err(EngineError::BadFormat(format!(
            "unknown payload kind '{other}'"
        ))),
    }
}

fn parse_props(scanner: &mut Scanner<'_>) -> Result<Props> {
    scanner.expect_keyword("props")?;
    let count = scanner.read_u64("property count")?;
    let mut props = Props::new();
    for _ in 0..count {
        let key_bytes = scanner.read_blob("property name")?;
        let key = String::from_utf8(key_bytes)
            .map_err(|_| EngineError::BadFormat("property name is not UTF-8".to_owned()))?;
        let value = scanner.read_blob("property value")?;
        props.insert(key, value);
    }
    Ok(props)
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// A strict token scanner over the serialized byte stream. Whitespace
/// separates tokens; `<len>:<bytes>` atoms are read exactly.
struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn skip_ws(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(u8::is_ascii_whitespace)
        {
            self.pos += 1;
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.bytes.len()
    }

    fn read_token(&mut self, what: &str) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| !b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(EngineError::BadFormat(format!(
                "unexpected end of input, expected {what}"
            )));
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .map(str::to_owned)
            .map_err(|_| EngineError::BadFormat(format!("{what} is not UTF-8")))
    }

    fn peek_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        let end = self.pos + keyword.len();
        self.bytes.get(self.pos..end) == Some(keyword.as_bytes())
            && self.bytes.get(end).is_none_or(u8::is_ascii_whitespace)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        let token = self.read_token(keyword)?;
        if token == keyword {
            Ok(())
        } else {
            Err(EngineError::BadFormat(format!(
                "expected '{keyword}', found '{token}'"
            )))
        }
    }

    fn read_i64(&mut self, what: &str) -> Result<i64> {
        let token = self.read_token(what)?;
        token
            .parse()
            .map_err(|_| EngineError::BadFormat(format!("invalid {what} '{token}'")))
    }

    fn read_u64(&mut self, what: &str) -> Result<u64> {
        let token = self.read_token(what)?;
        token
            .parse()
            .map_err(|_| EngineError::BadFormat(format!("invalid {what} '{token}'")))
    }

    /// Read a `<len>:<bytes>` atom.
    fn read_blob(&mut self, what: &str) -> Result<Vec<u8>> {
        self.skip_ws();
        let digits_start = self.pos;
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        if digits_start == self.pos {
            return Err(EngineError::BadFormat(format!(
                "expected length prefix for {what}"
            )));
        }
        let len: usize = std::str::from_utf8(&self.bytes[digits_start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| EngineError::BadFormat(format!("invalid length prefix for {what}")))?;
        if self.bytes.get(self.pos) != Some(&b':') {
            return Err(EngineError::BadFormat(format!(
                "expected ':' after length prefix for {what}"
            )));
        }
        self.pos += 1;
        let end = self.pos + len;
        let data = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| EngineError::BadFormat(format!("truncated {what}")))?;
        self.pos = end;
        Ok(data.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
