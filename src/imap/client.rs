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

//! A small synchronous IMAP client.
//!
//! This implements only the subset of IMAP4rev1 needed to authenticate with
//! SASL, locate a message, download parts of it and upload a draft. Untagged
//! responses the client has no use for are silently discarded.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::str;

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::bytes::Regex;
use thiserror::Error;

use super::lex::LexWriter;
use super::response::{self as r, FetchValue, ResponseLine, Status};
use crate::sasl::{self, Authenticator, Response};

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r#"~?\{([0-9]+)\+?\}\r\n$"#).unwrap();
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Nom(String),
    #[error("Failed to parse whole response")]
    PartialParse,
    #[error("Unexpected response from server: {0}")]
    Unexpected(String),
    #[error("Server closed the connection: {0}")]
    Bye(String),
    #[error("{what} failed: {status} {text}")]
    Rejected {
        what: &'static str,
        status: Status,
        text: String,
    },
    #[error("Invalid base64 in server challenge: {0}")]
    BadChallenge(#[from] base64::DecodeError),
    #[error("Authentication failed: {0}")]
    Sasl(#[from] sasl::Error),
    #[error("Authentication aborted due to a malformed security layer token")]
    Aborted,
}

/// The result of one tagged command.
#[derive(Clone, Debug)]
pub struct Outcome<T> {
    pub status: Status,
    pub text: String,
    pub data: T,
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        Status::Ok == self.status
    }

    /// Return the data if the command succeeded, or describe `what` was
    /// rejected otherwise.
    pub fn into_result(self, what: &'static str) -> Result<T, Error> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(Error::Rejected {
                what,
                status: self.status,
                text: self.text,
            })
        }
    }
}

/// One untagged FETCH response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchData {
    pub seqnum: u32,
    /// The parenthesised list of data items, literals inline.
    pub items: Vec<u8>,
}

impl FetchData {
    /// The whole response as `<seqnum> (<items>)`.
    pub fn text(&self) -> Vec<u8> {
        let mut text = format!("{} ", self.seqnum).into_bytes();
        text.extend_from_slice(&self.items);
        text
    }

    pub fn uid(&self) -> Result<Option<u32>, Error> {
        let (_, items) = self.parse_items()?;
        Ok(items.into_iter().find_map(|(name, value)| {
            match value {
                FetchValue::Other(v) if name.eq_ignore_ascii_case("UID") => {
                    str::from_utf8(v).ok().and_then(|v| v.parse().ok())
                }
                _ => None,
            }
        }))
    }

    /// The content of `BODY[section]`, or `None` if it is absent or `NIL`.
    pub fn body(&self, section: &str) -> Result<Option<Vec<u8>>, Error> {
        let key = format!("BODY[{}]", section);
        let (_, items) = self.parse_items()?;
        for (name, value) in items {
            let matches = name
                .get(..key.len())
                .map_or(false, |prefix| prefix.eq_ignore_ascii_case(&key))
                && name
                    .get(key.len()..)
                    .map_or(false, |rest| rest.is_empty() || rest.starts_with('<'));
            if !matches {
                continue;
            }

            return match value {
                FetchValue::NString(data) => {
                    Ok(data.map(Cow::into_owned))
                }
                FetchValue::Other(_) => Err(Error::Unexpected(format!(
                    "{} is not a string",
                    name
                ))),
            };
        }

        Ok(None)
    }

    fn parse_items(
        &self,
    ) -> Result<(&[u8], Vec<(Cow<str>, FetchValue<'_>)>), Error> {
        let (remaining, items) = r::fetch_items(&self.items)
            .map_err(|e| Error::Nom(format!("{:?}", e)))?;
        Ok((remaining, items))
    }
}

/// The search criteria the tools use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchKey<'a> {
    /// Messages with a header field containing a value.
    Header(&'a str, &'a str),
    /// Messages containing a string anywhere in header or body.
    Text(&'a str),
}

impl SearchKey<'_> {
    fn write_to(&self, lex: &mut LexWriter) {
        lex.verbatim("(");
        match *self {
            SearchKey::Header(field, value) => {
                lex.verbatim("HEADER ").astring(field).sp().string(value);
            }
            SearchKey::Text(value) => {
                lex.verbatim("TEXT ").string(value);
            }
        }
        lex.verbatim(")");
    }
}

impl fmt::Display for SearchKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SearchKey::Header(field, value) => {
                write!(f, "(HEADER {} \"{}\")", field, value)
            }
            SearchKey::Text(value) => write!(f, "(TEXT \"{}\")", value),
        }
    }
}

enum Line {
    Tagged {
        tag: String,
        status: Status,
        text: String,
    },
    Continuation(String),
    Status {
        status: Status,
        text: String,
    },
    Data,
}

fn parse_line(line: &[u8]) -> Result<ResponseLine<'_>, Error> {
    let (remaining, parsed) =
        ResponseLine::parse(line).map_err(|e| Error::Nom(format!("{:?}", e)))?;
    if !remaining.is_empty() {
        return Err(Error::PartialParse);
    }

    Ok(parsed)
}

fn classify(line: &[u8]) -> Result<Line, Error> {
    Ok(match parse_line(line)? {
        ResponseLine::Tagged { tag, status, text } => Line::Tagged {
            tag: tag.into_owned(),
            status,
            text: text.into_owned(),
        },
        ResponseLine::Continuation(text) => {
            Line::Continuation(text.into_owned())
        }
        ResponseLine::Status { status, text } => Line::Status {
            status,
            text: text.into_owned(),
        },
        _ => Line::Data,
    })
}

pub struct Client<R, W> {
    read: R,
    write: W,
    trace_stderr: Option<&'static str>,
    next_tag: u64,
}

impl<R: BufRead, W: Write> Client<R, W> {
    pub fn new(read: R, write: W, trace_stderr: Option<&'static str>) -> Self {
        Client {
            read,
            write,
            trace_stderr,
            next_tag: 0,
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.read, self.write)
    }

    /// Read the server greeting, which must be `OK` or `PREAUTH`.
    pub fn greeting(&mut self) -> Result<Outcome<()>, Error> {
        let line = self.read_response()?;
        match classify(&line)? {
            Line::Status {
                status: Status::Bye,
                text,
            } => Err(Error::Bye(text)),
            Line::Status { status, text } => Ok(Outcome {
                status,
                text,
                data: (),
            }),
            _ => Err(Error::Unexpected(
                String::from_utf8_lossy(&line).into_owned(),
            )),
        }
    }

    /// Run `AUTHENTICATE`, answering every server challenge through
    /// `authenticator`.
    ///
    /// If the authenticator fails or aborts, the exchange is cancelled and
    /// the failure is returned once the server has acknowledged it.
    pub fn authenticate<A: Authenticator + ?Sized>(
        &mut self,
        authenticator: &mut A,
    ) -> Result<Outcome<()>, Error> {
        let tag = self.next_tag();
        let command =
            format!("{} AUTHENTICATE {}\r\n", tag, authenticator.mechanism());
        self.write_traced(">>[cmd]", command.as_bytes())?;

        let mut failure: Option<Error> = None;
        loop {
            let line = self.read_response()?;
            match classify(&line)? {
                Line::Continuation(_) if failure.is_some() => {
                    self.write_traced(">>[sasl]", b"*\r\n")?;
                }

                Line::Continuation(text) => {
                    let reply = base64::decode(text.trim())
                        .map_err(Error::from)
                        .and_then(|challenge| {
                            authenticator.step(&challenge).map_err(Error::from)
                        });

                    match reply {
                        Ok(Response::Token(token)) => {
                            let mut encoded = base64::encode(&token);
                            encoded.push_str("\r\n");
                            self.write_traced(">>[sasl]", encoded.as_bytes())?;
                        }
                        Ok(Response::Abort) => {
                            warn!("Cancelling authentication");
                            failure = Some(Error::Aborted);
                            self.write_traced(">>[sasl]", b"*\r\n")?;
                        }
                        Err(e) => {
                            warn!("Cancelling authentication: {}", e);
                            failure = Some(e);
                            self.write_traced(">>[sasl]", b"*\r\n")?;
                        }
                    }
                }

                Line::Tagged {
                    tag: t,
                    status,
                    text,
                } if t == tag => {
                    if let Some(failure) = failure {
                        debug!("Server answered cancellation: {} {}", status, text);
                        return Err(failure);
                    }

                    return Ok(Outcome {
                        status,
                        text,
                        data: (),
                    });
                }

                Line::Tagged { .. } => {
                    return Err(Error::Unexpected(
                        String::from_utf8_lossy(&line).into_owned(),
                    ))
                }

                Line::Status {
                    status: Status::Bye,
                    text,
                } => return Err(Error::Bye(text)),

                Line::Status { .. } | Line::Data => (),
            }
        }
    }

    pub fn select(&mut self, mailbox: &str) -> Result<Outcome<()>, Error> {
        debug!("Selecting {}", mailbox);
        let mut command = LexWriter::new();
        command.verbatim("SELECT ").mailbox(mailbox);
        let outcome = self.command(command, false)?;
        Ok(Outcome {
            status: outcome.status,
            text: outcome.text,
            data: (),
        })
    }

    pub fn uid_search(
        &mut self,
        key: SearchKey<'_>,
    ) -> Result<Outcome<Vec<u32>>, Error> {
        debug!("Searching for {}", key);
        let mut command = LexWriter::new();
        command.verbatim("UID SEARCH ");
        key.write_to(&mut command);
        let outcome = self.command(command, false)?;

        let mut uids = Vec::new();
        for line in &outcome.data {
            if let ResponseLine::Search(found) = parse_line(line)? {
                uids.extend(found);
            }
        }

        Ok(Outcome {
            status: outcome.status,
            text: outcome.text,
            data: uids,
        })
    }

    /// Fetch `items` (e.g. `BODYSTRUCTURE` or `(BODY.PEEK[1])`) for the
    /// message with the given UID.
    pub fn uid_fetch(
        &mut self,
        uid: u32,
        items: &str,
    ) -> Result<Outcome<Vec<FetchData>>, Error> {
        debug!("Fetching {} for UID {}", items, uid);
        let mut command = LexWriter::new();
        command
            .verbatim("UID FETCH ")
            .num_u32(uid)
            .sp()
            .verbatim(items);
        let outcome = self.command(command, false)?;

        let mut fetched = Vec::new();
        for line in &outcome.data {
            if let ResponseLine::Fetch { seqnum, items } = parse_line(line)? {
                fetched.push(FetchData {
                    seqnum,
                    items: items.to_vec(),
                });
            }
        }

        Ok(Outcome {
            status: outcome.status,
            text: outcome.text,
            data: fetched,
        })
    }

    pub fn append(
        &mut self,
        mailbox: &str,
        flags: &[String],
        message: &[u8],
    ) -> Result<Outcome<()>, Error> {
        debug!("Appending {} bytes to {}", message.len(), mailbox);
        let mut command = LexWriter::new();
        command.verbatim("APPEND ").mailbox(mailbox).sp();
        if !flags.is_empty() {
            command.verbatim("(").verbatim(&flags.join(" ")).verbatim(") ");
        }
        command.literal(message);

        let outcome = self.command(command, false)?;
        Ok(Outcome {
            status: outcome.status,
            text: outcome.text,
            data: (),
        })
    }

    pub fn logout(&mut self) -> Result<Outcome<()>, Error> {
        let mut command = LexWriter::new();
        command.verbatim("LOGOUT");
        let outcome = self.command(command, true)?;
        Ok(Outcome {
            status: outcome.status,
            text: outcome.text,
            data: (),
        })
    }

    /// Send a command and collect the untagged responses up to its
    /// completion.
    ///
    /// Segments after the first are only sent once the server has invited
    /// the literal with a continuation response.
    fn command(
        &mut self,
        command: LexWriter,
        bye_expected: bool,
    ) -> Result<Outcome<Vec<Vec<u8>>>, Error> {
        let tag = self.next_tag();
        let mut segments = command.finish().into_iter();
        let mut untagged = Vec::new();

        let mut first = format!("{} ", tag).into_bytes();
        first.extend(segments.next().unwrap_or_default());
        let mut segment = Some(first);
        let mut what = ">>[cmd]";

        while let Some(data) = segment.take() {
            self.write_traced(what, &data)?;
            what = ">>[lit]";
            if 0 == segments.len() {
                break;
            }

            loop {
                let line = self.read_response()?;
                match classify(&line)? {
                    Line::Continuation(_) => break,
                    Line::Tagged { tag: t, status, text } if t == tag => {
                        // The server refused the literal
                        return Ok(Outcome {
                            status,
                            text,
                            data: untagged,
                        });
                    }
                    Line::Tagged { .. } => {
                        return Err(Error::Unexpected(
                            String::from_utf8_lossy(&line).into_owned(),
                        ))
                    }
                    Line::Status {
                        status: Status::Bye,
                        text,
                    } => return Err(Error::Bye(text)),
                    Line::Status { .. } | Line::Data => untagged.push(line),
                }
            }

            segment = segments.next();
        }

        self.read_until_tagged(&tag, untagged, bye_expected)
    }

    fn read_until_tagged(
        &mut self,
        tag: &str,
        mut untagged: Vec<Vec<u8>>,
        bye_expected: bool,
    ) -> Result<Outcome<Vec<Vec<u8>>>, Error> {
        loop {
            let line = self.read_response()?;
            match classify(&line)? {
                Line::Tagged { tag: t, status, text } if t == tag => {
                    return Ok(Outcome {
                        status,
                        text,
                        data: untagged,
                    });
                }
                Line::Tagged { .. } | Line::Continuation(_) => {
                    return Err(Error::Unexpected(
                        String::from_utf8_lossy(&line).into_owned(),
                    ))
                }
                Line::Status {
                    status: Status::Bye,
                    text,
                } if !bye_expected => return Err(Error::Bye(text)),
                Line::Status { .. } | Line::Data => untagged.push(line),
            }
        }
    }

    fn next_tag(&mut self) -> String {
        let tag = format!("M{}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    fn write_traced(&mut self, what: &str, bytes: &[u8]) -> Result<(), Error> {
        self.trace(">>[lit]" == what, what, bytes);
        self.write.write_all(bytes)?;
        self.write.flush()?;
        Ok(())
    }

    /// Read one logical response line and strip its CRLF.
    fn read_response(&mut self) -> Result<Vec<u8>, Error> {
        let mut line = Vec::new();
        self.read_logical_line(&mut line)?;
        line.truncate(line.len() - 2);
        Ok(line)
    }

    fn read_line_raw(&mut self, dst: &mut Vec<u8>) -> Result<usize, Error> {
        let start = dst.len();
        let nread = self.read.read_until(b'\n', dst)?;
        self.trace(false, "<<[eol]", &dst[start..]);
        Ok(nread)
    }

    fn read_data_raw(
        &mut self,
        dst: &mut Vec<u8>,
        n: u32,
    ) -> Result<usize, Error> {
        let start = dst.len();
        let nread = self.read.by_ref().take(n.into()).read_to_end(dst)?;
        self.trace(true, "<<[lit]", &dst[start..]);
        if n > nread as u32 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Hit EOF before end of literal",
            )));
        }

        Ok(nread)
    }

    fn read_logical_line(&mut self, dst: &mut Vec<u8>) -> Result<(), Error> {
        loop {
            let nread = self.read_line_raw(dst)?;
            if !dst.ends_with(b"\r\n") {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Line didn't end with CRLF",
                )));
            }

            let literal_len = LITERAL_AT_EOL
                .captures(&dst[dst.len() - nread..])
                .and_then(|cap| cap.get(1))
                .and_then(|len| str::from_utf8(len.as_bytes()).ok())
                .and_then(|len| len.parse::<u32>().ok());

            if let Some(literal_len) = literal_len {
                self.read_data_raw(dst, literal_len)?;
            } else {
                break;
            }
        }

        Ok(())
    }

    fn trace(&self, truncate: bool, what: &str, data: &[u8]) {
        if let Some(prefix) = self.trace_stderr {
            for line in trace_lines(data, truncate) {
                eprintln!("{} WIRE {} {}", prefix, what, line);
            }
        }
    }
}

/// Literal payloads are cut to this many bytes in the wire trace.
const TRACE_LITERAL_LIMIT: usize = 128;

/// Render `data` for the wire trace, one entry per line it contains, with
/// anything outside printable ASCII escaped.
fn trace_lines(data: &[u8], truncate: bool) -> Vec<String> {
    if data.is_empty() {
        return vec!["<empty>".to_owned()];
    }

    let shown = if truncate {
        data.len().min(TRACE_LITERAL_LIMIT)
    } else {
        data.len()
    };

    let mut lines = data[..shown]
        .split_inclusive(|&b| b'\n' == b)
        .map(|line| line.iter().map(|&b| escape_wire_byte(b)).collect())
        .collect::<Vec<String>>();
    if shown < data.len() {
        lines.push(format!("<{} more bytes>", data.len() - shown));
    }
    lines
}

fn escape_wire_byte(b: u8) -> String {
    match b {
        b'\n' => "\\n".to_owned(),
        b'\r' => "\\r".to_owned(),
        b' '..=b'~' => (b as char).to_string(),
        _ => format!("\\x{:02X}", b),
    }
}
