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

//! RFC 2392 `mid:` and `cid:` URIs.

use percent_encoding::percent_decode_str;

use super::error::Error;
use crate::imap::SearchKey;

/// What one command-line identifier asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// The Message-ID, including angle brackets.
    pub message_id: Option<String>,
    /// The Content-ID, including angle brackets.
    pub content_id: Option<String>,
}

impl Target {
    /// Parse a `mid:<message>`, `mid:<message>/<content>` or `cid:<content>`
    /// URI.
    pub fn parse(arg: &str) -> Result<Self, Error> {
        let bad = || Error::BadUri(arg.to_owned());
        let scheme = arg.get(..4).ok_or_else(bad)?;
        let rest = &arg[4..];

        if scheme.eq_ignore_ascii_case("mid:") {
            match rest.find('/') {
                Some(slash) => Ok(Target {
                    message_id: Some(wrap_id(&rest[..slash]).ok_or_else(bad)?),
                    content_id: Some(
                        wrap_id(&rest[slash + 1..]).ok_or_else(bad)?,
                    ),
                }),
                None => Ok(Target {
                    message_id: Some(wrap_id(rest).ok_or_else(bad)?),
                    content_id: None,
                }),
            }
        } else if scheme.eq_ignore_ascii_case("cid:") {
            Ok(Target {
                message_id: None,
                content_id: Some(wrap_id(rest).ok_or_else(bad)?),
            })
        } else {
            Err(bad())
        }
    }

    /// The search that finds the message(s) holding this target.
    ///
    /// Searching by Message-ID is much faster on most servers, so the
    /// full-text search is only used when there is nothing else.
    pub fn search_key(&self) -> SearchKey<'_> {
        match (&self.message_id, &self.content_id) {
            (Some(mid), _) => SearchKey::Header("Message-ID", mid),
            (None, Some(cid)) => SearchKey::Text(cid),
            (None, None) => SearchKey::Text(""),
        }
    }

    /// The name of the file the target is saved as.
    pub fn file_name(&self) -> &str {
        let id = self
            .content_id
            .as_deref()
            .or_else(|| self.message_id.as_deref())
            .unwrap_or("");
        id.strip_prefix('<')
            .and_then(|id| id.strip_suffix('>'))
            .unwrap_or(id)
    }
}

fn wrap_id(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    if decoded.is_empty() {
        None
    } else {
        Some(format!("<{}>", decoded))
    }
}
