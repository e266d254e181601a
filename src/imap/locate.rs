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

//! Finding body parts in a parsed FETCH BODYSTRUCTURE response.
//!
//! Paths are sequences of zero-based indices from the root of the whole
//! parsed response. The body structure itself conventionally lives at
//! `[1, 3]`: the second top-level field is the data item list, and the
//! structure follows the `UID <n> BODYSTRUCTURE` items within it.

use super::bodystructure::Node;

/// Where the body structure is found in `<seq> (UID <n> BODYSTRUCTURE (...))`.
pub const ROOT: [usize; 2] = [1, 3];

/// Locate the body structure within a parsed FETCH response.
///
/// This is `ROOT` for the usual item order, but servers are free to return
/// the items in any order, so the `BODYSTRUCTURE` keyword is looked up.
pub fn root_path(tree: &Node) -> Option<Vec<usize>> {
    let items = tree.at(&ROOT[..1])?.as_list()?;
    let keyword = items.iter().position(|item| {
        item.as_str()
            .map_or(false, |s| s.eq_ignore_ascii_case("BODYSTRUCTURE"))
    })?;

    let path = vec![ROOT[0], keyword + 1];
    if tree.at(&path)?.is_list() {
        Some(path)
    } else {
        None
    }
}

/// The part fetched when looking up a whole message: the second top-level
/// part, i.e. the first attachment after the introductory text.
pub fn default_path(root: &[usize]) -> Vec<usize> {
    let mut path = root.to_vec();
    path.push(1);
    path
}

/// Find every part whose Content-ID is `cid`, in depth-first order.
///
/// The Content-ID is field 3 of a body part. Once a list has produced a
/// scalar field, lists that follow it in the same list are not descended
/// into: in a multipart body these are extension data rather than parts.
pub fn find_content_id(tree: &Node, root: &[usize], cid: &str) -> Vec<Vec<usize>> {
    struct Frame<'a> {
        fields: &'a [Node],
        next: usize,
        subs: bool,
    }

    let mut found = Vec::new();
    let start = match tree.at(root).and_then(Node::as_list) {
        Some(start) => start,
        None => return found,
    };

    let mut path = root.to_vec();
    let mut stack = vec![Frame {
        fields: start,
        next: 0,
        subs: true,
    }];

    while let Some(frame) = stack.last_mut() {
        let fields = frame.fields;
        let ix = frame.next;
        if ix >= fields.len() {
            stack.pop();
            if !stack.is_empty() {
                path.pop();
            }
            continue;
        }

        frame.next += 1;
        let descend = match fields[ix] {
            Node::List(ref children) if frame.subs => Some(children),
            Node::List(_) => None,
            ref scalar => {
                if 3 == ix && Some(cid) == scalar.as_str() {
                    found.push(path.clone());
                }
                frame.subs = false;
                None
            }
        };

        if let Some(children) = descend {
            path.push(ix);
            stack.push(Frame {
                fields: children,
                next: 0,
                subs: true,
            });
        }
    }

    found
}

/// The IMAP section specifier for the part at `path`, e.g. `2` or `1.3`.
///
/// The first two path elements only lead to the body structure, so they do
/// not contribute. A path that does not descend into the structure
/// addresses the first part.
pub fn body_section(path: &[usize]) -> String {
    let section = path
        .iter()
        .skip(ROOT.len())
        .map(|ix| (ix + 1).to_string())
        .collect::<Vec<_>>()
        .join(".");

    if section.is_empty() {
        "1".to_owned()
    } else {
        section
    }
}

/// `BODY[<section>]` for the part at `path`.
pub fn body_spec(path: &[usize]) -> String {
    format!("BODY[{}]", body_section(path))
}

/// Field accessors for one body part of a body structure.
#[derive(Clone, Copy, Debug)]
pub struct Part<'a> {
    fields: &'a [Node],
}

impl<'a> Part<'a> {
    pub fn new(node: &'a Node) -> Option<Self> {
        node.as_list().map(|fields| Part { fields })
    }

    pub fn is_multipart(&self) -> bool {
        self.fields.first().map_or(false, Node::is_list)
    }

    /// Index of the first field after the child parts of a multipart.
    fn multipart_subtype(&self) -> usize {
        self.fields
            .iter()
            .position(|f| !f.is_list())
            .unwrap_or(self.fields.len())
    }

    fn str_at(&self, ix: usize) -> Option<&'a str> {
        self.fields.get(ix).and_then(Node::as_str)
    }

    pub fn mime_type(&self) -> String {
        if self.is_multipart() {
            format!(
                "multipart/{}",
                self.str_at(self.multipart_subtype()).unwrap_or("mixed")
            )
        } else {
            format!(
                "{}/{}",
                self.str_at(0).unwrap_or("?"),
                self.str_at(1).unwrap_or("?")
            )
        }
    }

    /// The body parameter list, a list of alternating names and values, or
    /// `NIL`.
    pub fn params(&self) -> Option<&'a Node> {
        if self.is_multipart() {
            self.fields.get(self.multipart_subtype() + 1)
        } else {
            self.fields.get(2)
        }
    }

    pub fn param(&self, name: &str) -> Option<&'a str> {
        self.params().and_then(|params| lookup(params, name))
    }

    pub fn content_id(&self) -> Option<&'a str> {
        self.single_str(3)
    }

    pub fn description(&self) -> Option<&'a str> {
        self.single_str(4)
    }

    pub fn encoding(&self) -> Option<&'a str> {
        self.single_str(5)
    }

    pub fn size(&self) -> Option<u64> {
        self.single_str(6).and_then(|s| s.parse().ok())
    }

    fn single_str(&self, ix: usize) -> Option<&'a str> {
        if self.is_multipart() {
            None
        } else {
            self.str_at(ix)
        }
    }

    /// The Content-Disposition extension field as `(type, params)`.
    ///
    /// Its position depends on the media type, so this looks for the first
    /// extension field shaped like one.
    pub fn disposition(&self) -> Option<(&'a str, &'a Node)> {
        let first_extension = if self.is_multipart() {
            self.multipart_subtype() + 2
        } else {
            7
        };

        self.fields
            .iter()
            .skip(first_extension)
            .filter_map(Node::as_list)
            .find_map(|field| match field {
                [Node::Scalar(kind), params] if params.is_list() || params.is_nil() => {
                    Some((kind.as_str(), params))
                }
                _ => None,
            })
    }

    /// The name of the part: the `name` parameter, or else the
    /// `filename` parameter of its disposition.
    pub fn name(&self) -> Option<&'a str> {
        self.param("name").or_else(|| {
            self.disposition()
                .and_then(|(_, params)| lookup(params, "filename"))
        })
    }
}

fn lookup<'a>(params: &'a Node, name: &str) -> Option<&'a str> {
    params
        .as_list()?
        .chunks(2)
        .find(|pair| {
            pair[0]
                .as_str()
                .map_or(false, |key| key.eq_ignore_ascii_case(name))
        })
        .and_then(|pair| pair.get(1))
        .and_then(Node::as_str)
}
