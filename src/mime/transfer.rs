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

//! Content-Transfer-Encoding handling for whole body parts.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Interpret the encoding field of a body structure.
    ///
    /// Anything unknown, including a missing field, is treated as an
    /// identity encoding.
    pub fn from_field(field: Option<&str>) -> Self {
        match field {
            Some(s) if s.eq_ignore_ascii_case("base64") => {
                TransferEncoding::Base64
            }
            Some(s) if s.eq_ignore_ascii_case("quoted-printable") => {
                TransferEncoding::QuotedPrintable
            }
            Some(s) if s.eq_ignore_ascii_case("7bit") => {
                TransferEncoding::SevenBit
            }
            Some(s) if s.eq_ignore_ascii_case("8bit") => {
                TransferEncoding::EightBit
            }
            _ => TransferEncoding::Binary,
        }
    }

    /// Reverse this encoding on `data`.
    pub fn decode<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>, Error> {
        match *self {
            TransferEncoding::Base64 => {
                decode_base64(data).map(Cow::Owned)
            }
            TransferEncoding::QuotedPrintable => Ok(qp_decode(data)),
            TransferEncoding::SevenBit
            | TransferEncoding::EightBit
            | TransferEncoding::Binary => Ok(Cow::Borrowed(data)),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            TransferEncoding::SevenBit => "7bit",
            TransferEncoding::EightBit => "8bit",
            TransferEncoding::Binary => "binary",
            TransferEncoding::Base64 => "base64",
            TransferEncoding::QuotedPrintable => "quoted-printable",
        })
    }
}

/// Decode base64 content, ignoring line breaks and any other bytes outside
/// the base64 alphabet.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>, Error> {
    let filtered = data
        .iter()
        .copied()
        .filter(|&b| {
            matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'+' | b'/' | b'=')
        })
        .collect::<Vec<u8>>();

    let mut decoded = Vec::with_capacity(filtered.len() / 4 * 3);
    base64::decode_config_buf(&filtered, base64::STANDARD, &mut decoded)?;
    Ok(decoded)
}

/// Encode `data` as base64 broken into CRLF-terminated lines of at most
/// `width` characters.
pub fn encode_base64_lines(data: &[u8], width: usize) -> Vec<u8> {
    let encoded = base64::encode(data);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / width * 2 + 2);
    for line in encoded.as_bytes().chunks(width) {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Decodes quoted-printable encoding, as described by RFC 2045.
///
/// Soft line breaks are removed, with either DOS or UNIX line endings. This
/// never fails; malformed escape sequences are passed through untransformed.
pub fn qp_decode(data: &[u8]) -> Cow<[u8]> {
    if memchr::memchr(b'=', data).is_none() {
        return Cow::Borrowed(data);
    }

    fn hex(b: u8) -> Option<u8> {
        (b as char).to_digit(16).map(|d| d as u8)
    }

    let mut out = Vec::with_capacity(data.len());
    let mut ix = 0;
    while ix < data.len() {
        if b'=' != data[ix] {
            out.push(data[ix]);
            ix += 1;
            continue;
        }

        match (data.get(ix + 1).copied(), data.get(ix + 2).copied()) {
            (Some(b'\r'), Some(b'\n')) => ix += 3,
            (Some(b'\n'), _) => ix += 2,
            (Some(hi), Some(lo)) => match (hex(hi), hex(lo)) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    ix += 3;
                }
                _ => {
                    out.push(b'=');
                    ix += 1;
                }
            },
            _ => {
                out.push(b'=');
                ix += 1;
            }
        }
    }

    Cow::Owned(out)
}
