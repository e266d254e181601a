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

//! Assembling the draft message uploaded by `midput`.
//!
//! The draft is a `multipart/mixed` message whose first part is a short
//! introductory text, followed by one part per attached file. Everything is
//! written with CRLF line endings, ready to be sent as an IMAP literal.

use std::fs;
use std::io;
use std::path::Path;

use chrono::prelude::*;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::{rngs::OsRng, Rng};

use super::sniff::{detect_type, MediaType};
use super::transfer::{encode_base64_lines, TransferEncoding};

/// Characters that must be percent-encoded in an RFC 2231 parameter value.
const ATTR_CHAR_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'{')
    .add(b'}');

const BASE64_WIDTH: usize = 76;
/// RFC 5322 limit on a line, excluding the CRLF.
const MAX_LINE: usize = 998;

/// A file to be attached to the draft.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// The file name presented to the recipient.
    pub name: String,
    pub media_type: MediaType,
    pub content: Vec<u8>,
}

impl Attachment {
    /// Read the file at `path`, naming the attachment after its base name.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let content = fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let media_type = detect_type(path, &content);

        Ok(Attachment {
            name,
            media_type,
            content,
        })
    }

    /// Whether the content can be sent without a transfer encoding.
    fn is_verbatim_text(&self) -> bool {
        self.media_type.is_text()
            && !self.content.contains(&0)
            && std::str::from_utf8(&self.content).is_ok()
    }
}

#[derive(Clone, Debug)]
pub struct Draft {
    intro: String,
    attachments: Vec<Attachment>,
    boundary: String,
    date: DateTime<FixedOffset>,
}

impl Draft {
    pub fn new(intro: &str) -> Self {
        Draft {
            intro: intro.to_owned(),
            attachments: Vec::new(),
            boundary: format!(
                "=_{:016x}{:016x}",
                OsRng.gen::<u64>(),
                OsRng.gen::<u64>()
            ),
            date: Local::now().into(),
        }
    }

    pub fn with_boundary(mut self, boundary: &str) -> Self {
        self.boundary = boundary.to_owned();
        self
    }

    pub fn with_date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = date;
        self
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Serialise the whole message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        header(&mut out, "MIME-Version", "1.0");
        header(&mut out, "Date", &self.date.to_rfc2822());
        header(
            &mut out,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{}\"", self.boundary),
        );
        out.extend_from_slice(b"\r\n");

        self.delimiter(&mut out, false);
        let intro = crlf(self.intro.as_bytes());
        let charset = if self.intro.is_ascii() { "us-ascii" } else { "utf-8" };
        header(
            &mut out,
            "Content-Type",
            &format!("text/plain; charset=\"{}\"", charset),
        );
        text_body(&mut out, &intro);

        for attachment in &self.attachments {
            self.delimiter(&mut out, false);
            header(
                &mut out,
                "Content-Type",
                &format!(
                    "{}; {}",
                    attachment.media_type,
                    parameter("name", &attachment.name)
                ),
            );
            header(
                &mut out,
                "Content-Disposition",
                &format!("attachment; {}", parameter("filename", &attachment.name)),
            );

            if attachment.is_verbatim_text() {
                text_body(&mut out, &crlf(&attachment.content));
            } else {
                base64_body(&mut out, &attachment.content);
            }
        }

        self.delimiter(&mut out, true);
        out
    }

    fn delimiter(&self, out: &mut Vec<u8>, last: bool) {
        out.extend_from_slice(b"--");
        out.extend_from_slice(self.boundary.as_bytes());
        if last {
            out.extend_from_slice(b"--");
        }
        out.extend_from_slice(b"\r\n");
    }
}

fn header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Write CRLF-normalised `content` as 7bit or 8bit, or as base64 if some line
/// is too long to go out unencoded.
fn text_body(out: &mut Vec<u8>, content: &[u8]) {
    if !fits_line_limit(content) {
        base64_body(out, content);
        return;
    }

    header(
        out,
        "Content-Transfer-Encoding",
        &seven_or_eight_bit(content).to_string(),
    );
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(content);
    if !content.is_empty() && !content.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
}

fn base64_body(out: &mut Vec<u8>, content: &[u8]) {
    header(
        out,
        "Content-Transfer-Encoding",
        &TransferEncoding::Base64.to_string(),
    );
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&encode_base64_lines(content, BASE64_WIDTH));
}

fn fits_line_limit(content: &[u8]) -> bool {
    content.split(|&b| b'\n' == b).all(|line| {
        line.strip_suffix(b"\r").unwrap_or(line).len() <= MAX_LINE
    })
}

/// Format a MIME parameter, using RFC 2231 encoding for non-ASCII values.
fn parameter(name: &str, value: &str) -> String {
    if value.is_ascii() && !value.bytes().any(|b| b.is_ascii_control()) {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("{}=\"{}\"", name, escaped)
    } else {
        format!(
            "{}*=utf-8''{}",
            name,
            utf8_percent_encode(value, ATTR_CHAR_ESCAPES)
        )
    }
}

/// Normalise every line ending to CRLF.
fn crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut ix = 0;
    while ix < data.len() {
        match data[ix] {
            b'\r' => {
                out.extend_from_slice(b"\r\n");
                if Some(&b'\n') == data.get(ix + 1) {
                    ix += 1;
                }
            }
            b'\n' => out.extend_from_slice(b"\r\n"),
            b => out.push(b),
        }
        ix += 1;
    }
    out
}

fn seven_or_eight_bit(data: &[u8]) -> TransferEncoding {
    if data.is_ascii() {
        TransferEncoding::SevenBit
    } else {
        TransferEncoding::EightBit
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;
    use crate::mime::transfer::decode_base64;

    fn date() -> DateTime<FixedOffset> {
        FixedOffset::east(3600).ymd(2020, 7, 14).and_hms(12, 30, 0)
    }

    fn attachment(name: &str, media_type: &str, content: &[u8]) -> Attachment {
        Attachment {
            name: name.to_owned(),
            media_type: MediaType::parse(media_type).unwrap(),
            content: content.to_vec(),
        }
    }

    #[test]
    fn intro_only() {
        let draft = Draft::new("Hello,\n\nAttached, you will find \n")
            .with_boundary("XYZ")
            .with_date(date());
        assert_eq!(
            "MIME-Version: 1.0\r\n\
             Date: Tue, 14 Jul 2020 12:30:00 +0100\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n\
             --XYZ\r\n\
             Content-Type: text/plain; charset=\"us-ascii\"\r\n\
             Content-Transfer-Encoding: 7bit\r\n\
             \r\n\
             Hello,\r\n\
             \r\n\
             Attached, you will find \r\n\
             --XYZ--\r\n",
            String::from_utf8(draft.to_bytes()).unwrap()
        );
    }

    #[test]
    fn attachments_in_order() {
        let mut draft = Draft::new("Hi")
            .with_boundary("XYZ")
            .with_date(date());
        draft.attach(attachment("notes.txt", "text/plain", b"a\nb\r\nc"));
        draft.attach(attachment("logo.png", "image/png", &[0x89, b'P', 0, 1]));

        let text = String::from_utf8(draft.to_bytes()).unwrap();
        let parts: Vec<&str> = text.split("--XYZ").collect();
        // Headers, intro, two attachments, closing marker
        assert_eq!(5, parts.len());
        assert!(parts[1].contains("Hi\r\n"));

        assert_eq!(
            "\r\nContent-Type: text/plain; name=\"notes.txt\"\r\n\
             Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
             Content-Transfer-Encoding: 7bit\r\n\
             \r\n\
             a\r\nb\r\nc\r\n",
            parts[2]
        );

        assert!(parts[3].starts_with(
            "\r\nContent-Type: image/png; name=\"logo.png\"\r\n\
             Content-Disposition: attachment; filename=\"logo.png\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n"
        ));
        let encoded = parts[3].splitn(2, "\r\n\r\n").nth(1).unwrap();
        assert_eq!(
            vec![0x89, b'P', 0, 1],
            decode_base64(encoded.as_bytes()).unwrap()
        );
        assert_eq!("--\r\n", parts[4]);
    }

    #[test]
    fn binary_text_is_base64() {
        let mut draft = Draft::new("Hi").with_boundary("B");
        draft.attach(attachment("weird.txt", "text/plain", b"nul\0byte"));
        let text = String::from_utf8(draft.to_bytes()).unwrap();
        assert!(text.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(text.contains(&base64::encode(b"nul\0byte")));
    }

    #[test]
    fn eight_bit_text() {
        let mut draft = Draft::new("Grüße").with_boundary("B");
        draft.attach(attachment("ü.txt", "text/plain", "ä\n".as_bytes()));
        let text = String::from_utf8(draft.to_bytes()).unwrap();
        assert!(text.contains("charset=\"utf-8\""));
        assert!(text.contains("Content-Transfer-Encoding: 8bit\r\n\r\nä\r\n"));
        assert!(text.contains("name*=utf-8''%C3%BC.txt"));
        assert!(text.contains("filename*=utf-8''%C3%BC.txt"));
    }

    #[test]
    fn overlong_lines_are_base64() {
        let long = "x".repeat(MAX_LINE + 1);
        let limit = "y".repeat(MAX_LINE);
        let mut draft = Draft::new(&long).with_boundary("B");
        draft.attach(attachment(
            "long.txt",
            "text/plain",
            format!("short\n{}\n", long).as_bytes(),
        ));
        draft.attach(attachment(
            "limit.txt",
            "text/plain",
            format!("{}\r\n", limit).as_bytes(),
        ));
        let text = String::from_utf8(draft.to_bytes()).unwrap();

        let encoded = |data: &[u8]| {
            String::from_utf8(encode_base64_lines(data, BASE64_WIDTH)).unwrap()
        };
        assert!(!text.contains(&long));
        assert!(text.contains(&encoded(long.as_bytes())));
        assert!(text.contains(&encoded(
            format!("short\r\n{}\r\n", long).as_bytes()
        )));
        assert!(text.contains(&format!(
            "Content-Transfer-Encoding: 7bit\r\n\r\n{}\r\n",
            limit
        )));
        assert_eq!(2, text.matches("Content-Transfer-Encoding: base64").count());
    }

    #[test]
    fn parameters() {
        assert_eq!("name=\"a b.pdf\"", parameter("name", "a b.pdf"));
        assert_eq!(
            "name=\"say \\\"hi\\\".txt\"",
            parameter("name", "say \"hi\".txt")
        );
        assert_eq!(
            "filename*=utf-8''caf%C3%A9%20menu.pdf",
            parameter("filename", "café menu.pdf")
        );
    }

    #[test]
    fn line_endings() {
        assert_eq!(b"a\r\nb\r\nc\r\n\r\n".to_vec(), crlf(b"a\nb\r\nc\r\r\n"));
        assert_eq!(b"".to_vec(), crlf(b""));
    }

    #[test]
    fn boundaries_are_random() {
        let a = Draft::new("x");
        let b = Draft::new("x");
        assert_ne!(a.boundary, b.boundary);
        assert_eq!(34, a.boundary.len());
    }

    #[test]
    fn attachment_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"hello\n").unwrap();
        drop(file);

        let attachment = Attachment::from_file(&path).unwrap();
        assert_eq!("hello.txt", attachment.name);
        assert!(attachment.media_type.is_text());
        assert_eq!(b"hello\n".to_vec(), attachment.content);

        assert!(Attachment::from_file(&dir.path().join("missing")).is_err());
    }
}
