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

//! Utilities for writing client commands under IMAP's "lexical rules".
//!
//! Commands are built up as a sequence of segments. Every segment but the
//! last ends with the header of a synchronising literal, so the client must
//! wait for a continuation response from the server before sending the next
//! segment.
//!
//! # Encoding Decisions
//!
//! Given the choice between encoding a string as an atom or some other form,
//! we only use an atom if all characters are in the set `a-zA-Z0-9?=+/_.-`
//! and the string is not "NIL".
//!
//! Given the choice between a quoted string and a literal, we only use the
//! quoted string if it contains no controls, backslash or double-quote, is
//! less than 100 bytes long, and is pure ASCII. We never assume the server
//! is Unicode-aware.
//!
//! Mailbox names containing non-ASCII characters are sent in modified UTF-7
//! as RFC 3501 requires.

use std::mem;

#[derive(Clone, Debug, Default)]
pub struct LexWriter {
    segments: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl LexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `s` exactly as given.
    pub fn verbatim(&mut self, s: &str) -> &mut Self {
        self.current.extend_from_slice(s.as_bytes());
        self
    }

    pub fn sp(&mut self) -> &mut Self {
        self.verbatim(" ")
    }

    pub fn num_u32(&mut self, value: u32) -> &mut Self {
        self.verbatim(&value.to_string())
    }

    pub fn astring(&mut self, s: &str) -> &mut Self {
        if is_conservative_atom(s) {
            self.verbatim(s)
        } else {
            self.string(s)
        }
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        if is_quotable(s) {
            self.current.push(b'"');
            self.current.extend_from_slice(s.as_bytes());
            self.current.push(b'"');
            self
        } else {
            self.literal(s.as_bytes())
        }
    }

    pub fn mailbox(&mut self, name: &str) -> &mut Self {
        if is_conservative_atom(name) {
            self.verbatim(name)
        } else if name.is_ascii() && !name.contains('&') {
            self.string(name)
        } else {
            let encoded = encode_mutf7(name);
            self.string(&encoded)
        }
    }

    /// Append `data` as a synchronising literal.
    pub fn literal(&mut self, data: &[u8]) -> &mut Self {
        self.current
            .extend_from_slice(format!("{{{}}}\r\n", data.len()).as_bytes());
        self.segments.push(mem::take(&mut self.current));
        self.current.extend_from_slice(data);
        self
    }

    /// Terminate the command with CRLF and return its segments.
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        self.current.extend_from_slice(b"\r\n");
        self.segments.push(self.current);
        self.segments
    }
}

pub fn is_conservative_atom(s: &str) -> bool {
    !"nil".eq_ignore_ascii_case(s)
        && !s.is_empty()
        && s.as_bytes().iter().copied().all(|b| {
            matches!(
                b,
                b'a'..=b'z'
                    | b'A'..=b'Z'
                    | b'0'..=b'9'
                    | b'='
                    | b'?'
                    | b'/'
                    | b'+'
                    | b'_'
                    | b'.'
                    | b'-'
            )
        })
}

pub fn is_quotable(s: &str) -> bool {
    s.len() < 100
        && s.as_bytes().iter().copied().all(|b| match b {
            0..=31 | 127..=255 | b'\\' | b'"' => false,
            _ => true,
        })
}

/// Encode a mailbox name in IMAP's modified UTF-7 (RFC 3501 § 5.1.3).
pub fn encode_mutf7(s: &str) -> String {
    let mut transformed = String::new();
    let mut pending = String::new();

    fn flush(dst: &mut String, pending: &mut String) {
        if pending.is_empty() {
            return;
        }

        let mut buf = Vec::<u8>::with_capacity(pending.len() * 2);
        for unit in pending.encode_utf16() {
            buf.extend_from_slice(&unit.to_be_bytes());
        }

        dst.push('&');
        dst.push_str(&base64::encode_config(&buf, base64::IMAP_MUTF7));
        dst.push('-');
        pending.clear();
    }

    for ch in s.chars() {
        if ' ' <= ch && ch < '\x7f' {
            flush(&mut transformed, &mut pending);
            if '&' == ch {
                transformed.push_str("&-");
            } else {
                transformed.push(ch);
            }
        } else {
            pending.push(ch);
        }
    }

    flush(&mut transformed, &mut pending);
    transformed
}

#[cfg(test)]
mod test {
    use super::*;

    fn to_strings(segments: Vec<Vec<u8>>) -> Vec<String> {
        segments
            .into_iter()
            .map(|s| String::from_utf8(s).unwrap())
            .collect()
    }

    #[test]
    fn astring_forms() {
        let mut l = LexWriter::new();
        l.astring("foo")
            .sp()
            .astring("nil")
            .sp()
            .astring("foo bar")
            .sp()
            .astring("foo\\ bar")
            .sp()
            .astring("föö");

        assert_eq!(
            vec![
                "foo \"nil\" \"foo bar\" {8}\r\n".to_owned(),
                "foo\\ bar {5}\r\n".to_owned(),
                "föö\r\n".to_owned(),
            ],
            to_strings(l.finish())
        );
    }

    #[test]
    fn long_strings_become_literals() {
        let long = "x ".repeat(60);
        let mut l = LexWriter::new();
        l.verbatim("SEARCH").sp().string(&long);
        let segments = l.finish();
        assert_eq!(2, segments.len());
        assert_eq!(b"SEARCH {120}\r\n", &segments[0][..]);
        assert_eq!(122, segments[1].len());
    }

    #[test]
    fn search_criteria() {
        let mut l = LexWriter::new();
        l.verbatim("UID SEARCH HEADER Message-ID ")
            .string("<abc@example.org>");
        assert_eq!(
            vec![
                "UID SEARCH HEADER Message-ID \"<abc@example.org>\"\r\n"
                    .to_owned()
            ],
            to_strings(l.finish())
        );
    }

    #[test]
    fn mailbox_names() {
        let mut l = LexWriter::new();
        l.mailbox("INBOX")
            .sp()
            .mailbox("Lost & Found")
            .sp()
            .mailbox("Sent Items")
            .sp()
            .mailbox("~peter/mail/台北/日本語");
        assert_eq!(
            vec![
                "INBOX \"Lost &- Found\" \"Sent Items\" \
                 \"~peter/mail/&U,BTFw-/&ZeVnLIqe-\"\r\n"
                    .to_owned()
            ],
            to_strings(l.finish())
        );
    }

    #[test]
    fn mutf7() {
        assert_eq!("INBOX", encode_mutf7("INBOX"));
        assert_eq!("&Jjo-!", encode_mutf7("☺!"));
        assert_eq!("&U,BTF2XlZyyKng-", encode_mutf7("台北日本語"));
    }
}
