//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of midtools.
//
// midtools is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public  License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// midtools is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// midtools. If not, see <http://www.gnu.org/licenses/>.

//! Parser for the parenthesised-list syntax of IMAP `BODYSTRUCTURE`.
//!
//! The parser is deliberately structural: it knows nothing about which field
//! means what, and simply produces a tree of lists, strings and `NIL`s. It is
//! normally fed the entire FETCH response (`<seq> (UID <n> BODYSTRUCTURE
//! (...))`), so the body structure itself ends up nested a couple of levels
//! down; see `locate` for how it is found.
//!
//! Parsing is a single pass with an explicit stack of lists under
//! construction, so arbitrarily deep nesting cannot exhaust the call stack.
//! Dropping and formatting a tree are iterative for the same reason.

use std::fmt;
use std::mem;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Unbalanced ')' at offset {0}")]
    UnbalancedClose(usize),
    #[error("{0} list(s) not closed at end of input")]
    Unclosed(usize),
    #[error("Unterminated quoted string starting at offset {0}")]
    UnterminatedString(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// `NIL`, as distinct from an empty string.
    Nil,
    /// A quoted string, literal or bare token.
    Scalar(String),
    /// A parenthesised list.
    List(Vec<Node>),
}

impl Node {
    /// Parse `text` into a list of its top-level fields.
    pub fn parse(text: &[u8]) -> Result<Node, Error> {
        let mut stack: Vec<Vec<Node>> = Vec::new();
        let mut current: Vec<Node> = Vec::new();
        let mut pos = 0;

        while pos < text.len() {
            match text[pos] {
                b'(' => {
                    stack.push(mem::take(&mut current));
                    pos += 1;
                }

                b')' => {
                    let parent =
                        stack.pop().ok_or(Error::UnbalancedClose(pos))?;
                    let complete = mem::replace(&mut current, parent);
                    current.push(Node::List(complete));
                    pos += 1;
                }

                b' ' | b'\t' | b'\r' | b'\n' => pos += 1,

                b'"' => {
                    let (s, next) = quoted(text, pos)?;
                    current.push(Node::Scalar(s));
                    pos = next;
                }

                b'{' => {
                    if let Some((data, next)) = literal(text, pos) {
                        current.push(Node::Scalar(
                            String::from_utf8_lossy(data).into_owned(),
                        ));
                        pos = next;
                    } else {
                        pos = token(text, pos, &mut current);
                    }
                }

                _ => pos = token(text, pos, &mut current),
            }
        }

        if !stack.is_empty() {
            return Err(Error::Unclosed(stack.len()));
        }

        Ok(Node::List(current))
    }

    /// Follow `path` down from this node.
    pub fn at(&self, path: &[usize]) -> Option<&Node> {
        let mut here = self;
        for &ix in path {
            here = here.as_list()?.get(ix)?;
        }
        Some(here)
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match *self {
            Node::List(ref children) => Some(children),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Node::Scalar(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        Node::Nil == *self
    }

    pub fn is_list(&self) -> bool {
        matches!(*self, Node::List(_))
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = match *self {
            Node::List(ref mut children) => mem::take(children),
            _ => return,
        };

        // Each node is emptied before it goes out of scope, so the drop glue
        // never has more than one level to walk.
        while let Some(mut node) = pending.pop() {
            if let Node::List(ref mut children) = node {
                pending.append(children);
            }
        }
    }
}

enum Emit<'a> {
    Node(&'a Node),
    Text(&'static str),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending = vec![Emit::Node(self)];
        while let Some(next) = pending.pop() {
            match next {
                Emit::Text(text) => f.write_str(text)?,
                Emit::Node(Node::Nil) => f.write_str("NIL")?,
                Emit::Node(Node::Scalar(s)) => {
                    f.write_str("\"")?;
                    for ch in s.chars() {
                        if '"' == ch || '\\' == ch {
                            f.write_str("\\")?;
                        }
                        write!(f, "{}", ch)?;
                    }
                    f.write_str("\"")?;
                }
                Emit::Node(Node::List(children)) => {
                    f.write_str("(")?;
                    pending.push(Emit::Text(")"));
                    for (ix, child) in children.iter().enumerate().rev() {
                        pending.push(Emit::Node(child));
                        if ix > 0 {
                            pending.push(Emit::Text(" "));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Read the quoted string whose opening quote is at `start`.
fn quoted(text: &[u8], start: usize) -> Result<(String, usize), Error> {
    let mut content = Vec::new();
    let mut pos = start + 1;
    while pos < text.len() {
        match text[pos] {
            b'"' => {
                return Ok((
                    String::from_utf8_lossy(&content).into_owned(),
                    pos + 1,
                ))
            }
            b'\\' if pos + 1 < text.len() => {
                content.push(text[pos + 1]);
                pos += 2;
            }
            b => {
                content.push(b);
                pos += 1;
            }
        }
    }

    Err(Error::UnterminatedString(start))
}

/// Read the literal whose `{` is at `start`, if it is well-formed.
fn literal(text: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let close = start + 1 + memchr::memchr(b'}', &text[start + 1..])?;
    let digits = &text[start + 1..close];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    let len: usize = std::str::from_utf8(digits).ok()?.parse().ok()?;
    let data_start = close + 1 + 2;
    if text.get(close + 1..data_start) != Some(&b"\r\n"[..]) {
        return None;
    }

    let data_end = data_start.checked_add(len)?;
    let data = text.get(data_start..data_end)?;
    Some((data, data_end))
}

/// Read the bare token at `start` into `dst` and return where it ends.
fn token(text: &[u8], start: usize, dst: &mut Vec<Node>) -> usize {
    let len = text[start..]
        .iter()
        .position(|&b| {
            matches!(b, b'(' | b')' | b' ' | b'\t' | b'\r' | b'\n' | b'"')
        })
        .unwrap_or(text.len() - start);
    let end = start + len;
    let token = &text[start..end];

    if token.eq_ignore_ascii_case(b"NIL") {
        dst.push(Node::Nil);
    } else {
        dst.push(Node::Scalar(String::from_utf8_lossy(token).into_owned()));
    }

    end
}
