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

//! Parsers for the server responses the client understands.
//!
//! Lines are parsed after literals have been read inline, so a FETCH line
//! may contain arbitrary binary data inside its literals. Only the response
//! types needed by the tools are broken down any further; everything else is
//! passed through as `ResponseLine::Other`.

use std::borrow::Cow;
use std::fmt;
use std::str;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case as kw, take_while1},
    combinator::{map, map_opt, opt, recognize, rest},
    *,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
    Bye,
    Preauth,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Status::Ok => "OK",
            Status::No => "NO",
            Status::Bad => "BAD",
            Status::Bye => "BYE",
            Status::Preauth => "PREAUTH",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseLine<'a> {
    Tagged {
        tag: Cow<'a, str>,
        status: Status,
        text: Cow<'a, str>,
    },
    Continuation(Cow<'a, str>),
    Status {
        status: Status,
        text: Cow<'a, str>,
    },
    Search(Vec<u32>),
    Fetch {
        seqnum: u32,
        items: &'a [u8],
    },
    Other(&'a [u8]),
}

impl<'a> ResponseLine<'a> {
    /// Parse one logical response line, without its final CRLF.
    pub fn parse(i: &'a [u8]) -> IResult<&'a [u8], Self> {
        alt((continuation, untagged, tagged))(i)
    }
}

fn number(i: &[u8]) -> IResult<&[u8], u32> {
    map_opt(character::complete::digit1, |s| {
        str::from_utf8(s).ok().and_then(|s| s.parse::<u32>().ok())
    })(i)
}

fn status(i: &[u8]) -> IResult<&[u8], Status> {
    alt((
        map(kw("OK"), |_| Status::Ok),
        map(kw("NO"), |_| Status::No),
        map(kw("BAD"), |_| Status::Bad),
        map(kw("BYE"), |_| Status::Bye),
        map(kw("PREAUTH"), |_| Status::Preauth),
    ))(i)
}

fn resp_text(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    map(
        sequence::preceded(opt(tag(" ")), rest),
        String::from_utf8_lossy,
    )(i)
}

fn tag_chars(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    map(
        take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b'+' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn tagged(i: &[u8]) -> IResult<&[u8], ResponseLine<'_>> {
    map(
        sequence::tuple((tag_chars, tag(" "), status, resp_text)),
        |(tag, _, status, text)| ResponseLine::Tagged { tag, status, text },
    )(i)
}

fn continuation(i: &[u8]) -> IResult<&[u8], ResponseLine<'_>> {
    map(
        sequence::preceded(tag("+"), resp_text),
        ResponseLine::Continuation,
    )(i)
}

fn untagged(i: &[u8]) -> IResult<&[u8], ResponseLine<'_>> {
    sequence::preceded(
        tag("* "),
        alt((
            search,
            fetch,
            map(sequence::pair(status, resp_text), |(status, text)| {
                ResponseLine::Status { status, text }
            }),
            map(rest, ResponseLine::Other),
        )),
    )(i)
}

fn search(i: &[u8]) -> IResult<&[u8], ResponseLine<'_>> {
    map(
        sequence::terminated(
            sequence::preceded(
                kw("SEARCH"),
                multi::many0(sequence::preceded(tag(" "), number)),
            ),
            character::complete::space0,
        ),
        ResponseLine::Search,
    )(i)
}

fn fetch(i: &[u8]) -> IResult<&[u8], ResponseLine<'_>> {
    map(
        sequence::tuple((number, tag(" "), kw("FETCH"), tag(" "), rest)),
        |(seqnum, _, _, _, items)| ResponseLine::Fetch { seqnum, items },
    )(i)
}

/// The value of one FETCH data item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchValue<'a> {
    /// A string or `NIL`.
    NString(Option<Cow<'a, [u8]>>),
    /// An atom, number or parenthesised list, verbatim.
    Other(&'a [u8]),
}

/// Split the parenthesised item list of a FETCH response into
/// `(name, value)` pairs.
pub fn fetch_items(i: &[u8]) -> IResult<&[u8], Vec<(Cow<str>, FetchValue<'_>)>> {
    sequence::delimited(
        tag("("),
        multi::separated_list(
            tag(" "),
            sequence::separated_pair(item_name, tag(" "), fetch_value),
        ),
        tag(")"),
    )(i)
}

fn item_name(i: &[u8]) -> IResult<&[u8], Cow<str>> {
    map(
        recognize(sequence::tuple((
            take_while1(|b: u8| b.is_ascii_alphanumeric() || b'.' == b),
            opt(sequence::tuple((tag("["), opt(is_not("]")), tag("]")))),
            opt(sequence::tuple((tag("<"), number, tag(">")))),
        ))),
        String::from_utf8_lossy,
    )(i)
}

fn fetch_value(i: &[u8]) -> IResult<&[u8], FetchValue<'_>> {
    alt((
        map(nstring, FetchValue::NString),
        map(recognize(value), FetchValue::Other),
    ))(i)
}

fn value(i: &[u8]) -> IResult<&[u8], ()> {
    alt((
        map(nstring, |_| ()),
        map(
            // Multipart bodies are not separated by spaces.
            sequence::delimited(
                tag("("),
                multi::many0(sequence::preceded(
                    bytes::complete::take_while(|b: u8| b' ' == b),
                    value,
                )),
                tag(")"),
            ),
            |_| (),
        ),
        map(
            take_while1(|b| match b {
                0..=b' ' | 127 => false,
                b'(' | b')' | b'"' | b'{' => false,
                _ => true,
            }),
            |_| (),
        ),
    ))(i)
}

fn nstring(i: &[u8]) -> IResult<&[u8], Option<Cow<[u8]>>> {
    alt((
        map(literal, |l| Some(Cow::Borrowed(l))),
        map(quoted, Some),
        map(
            sequence::terminated(
                kw("NIL"),
                combinator::not(combinator::peek(take_while1(
                    |b: u8| b.is_ascii_alphanumeric(),
                ))),
            ),
            |_| None,
        ),
    ))(i)
}

fn literal(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, len) = sequence::delimited(
        alt((tag("~{"), tag("{"))),
        number,
        alt((tag("+}\r\n"), tag("}\r\n"))),
    )(i)?;
    bytes::complete::take(len)(i)
}

fn quoted_char(i: &[u8]) -> IResult<&[u8], &[u8]> {
    sequence::preceded(tag("\\"), alt((tag("\\"), tag("\""))))(i)
}

fn quoted(i: &[u8]) -> IResult<&[u8], Cow<[u8]>> {
    sequence::delimited(
        tag("\""),
        multi::fold_many0(
            alt((quoted_char, is_not("\r\n\"\\"))),
            Cow::Borrowed(&[] as &[u8]),
            |mut accum: Cow<[u8]>, piece| {
                if accum.is_empty() {
                    Cow::Borrowed(piece)
                } else {
                    accum.to_mut().extend_from_slice(piece);
                    accum
                }
            },
        ),
        tag("\""),
    )(i)
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(line: &[u8]) -> ResponseLine<'_> {
        let (remaining, parsed) = ResponseLine::parse(line).unwrap();
        assert!(remaining.is_empty(), "unparsed: {:?}", remaining);
        parsed
    }

    #[test]
    fn status_lines() {
        assert_eq!(
            ResponseLine::Status {
                status: Status::Ok,
                text: Cow::Borrowed("[CAPABILITY IMAP4rev1] Dovecot ready."),
            },
            parse(b"* OK [CAPABILITY IMAP4rev1] Dovecot ready.")
        );
        assert_eq!(
            ResponseLine::Tagged {
                tag: Cow::Borrowed("M3"),
                status: Status::No,
                text: Cow::Borrowed("Mailbox doesn't exist: Drafts"),
            },
            parse(b"M3 NO Mailbox doesn't exist: Drafts")
        );
        assert_eq!(
            ResponseLine::Tagged {
                tag: Cow::Borrowed("M0"),
                status: Status::Ok,
                text: Cow::Borrowed(""),
            },
            parse(b"M0 ok")
        );
        assert_matches!(
            ResponseLine::Status {
                status: Status::Bye,
                ..
            },
            parse(b"* BYE shutting down")
        );
    }

    #[test]
    fn continuation_lines() {
        assert_eq!(
            ResponseLine::Continuation(Cow::Borrowed("")),
            parse(b"+ ")
        );
        assert_eq!(
            ResponseLine::Continuation(Cow::Borrowed("")),
            parse(b"+")
        );
        assert_eq!(
            ResponseLine::Continuation(Cow::Borrowed("YIIBYQYJKoZIhvcSAQICAQBv")),
            parse(b"+ YIIBYQYJKoZIhvcSAQICAQBv")
        );
    }

    #[test]
    fn search_lines() {
        assert_eq!(ResponseLine::Search(vec![]), parse(b"* SEARCH"));
        assert_eq!(
            ResponseLine::Search(vec![2, 84, 882]),
            parse(b"* SEARCH 2 84 882")
        );
        assert_eq!(ResponseLine::Search(vec![7]), parse(b"* search 7 "));
    }

    #[test]
    fn fetch_and_other_lines() {
        assert_eq!(
            ResponseLine::Fetch {
                seqnum: 12,
                items: b"(UID 5 BODY[2] {3}\r\nabc)",
            },
            parse(b"* 12 FETCH (UID 5 BODY[2] {3}\r\nabc)")
        );
        assert_eq!(ResponseLine::Other(b"3 EXISTS"), parse(b"* 3 EXISTS"));
        assert_eq!(
            ResponseLine::Other(b"FLAGS (\\Seen \\Draft)"),
            parse(b"* FLAGS (\\Seen \\Draft)")
        );
    }

    #[test]
    fn fetch_item_values() {
        let (remaining, items) = fetch_items(
            b"(UID 5 FLAGS (\\Seen) BODY[1] \"a \\\"b\\\"\" \
              BODY[2]<0> {4}\r\n(\")\r BODY[3] NIL)",
        )
        .unwrap();
        assert!(remaining.is_empty());
        assert_eq!(5, items.len());
        assert_eq!("UID", items[0].0);
        assert_eq!(FetchValue::Other(b"5"), items[0].1);
        assert_eq!(FetchValue::Other(b"(\\Seen)"), items[1].1);
        assert_eq!(
            FetchValue::NString(Some(Cow::Owned(b"a \"b\"".to_vec()))),
            items[2].1
        );
        assert_eq!("BODY[2]<0>", items[3].0);
        assert_eq!(
            FetchValue::NString(Some(Cow::Borrowed(&b"(\")\r"[..]))),
            items[3].1
        );
        assert_eq!(FetchValue::NString(None), items[4].1);
    }

    #[test]
    fn fetch_bodystructure_is_opaque() {
        let (remaining, items) = fetch_items(
            b"(UID 9 BODYSTRUCTURE ((\"text\" \"plain\" (\"charset\" \
              \"us-ascii\") NIL NIL \"7bit\" 25 1 NIL NIL NIL NIL)\
              (\"image\" \"png\" NIL NIL NIL \"base64\" 4 NIL NIL NIL NIL) \
              \"mixed\"))",
        )
        .unwrap();
        assert!(remaining.is_empty());
        assert_eq!(2, items.len());
        assert_eq!("BODYSTRUCTURE", items[1].0);
        assert_matches!(&FetchValue::Other(_), &items[1].1);
    }
}
