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

//! Kerberos-authenticated IMAP tools.
//!
//! `midget` retrieves the body parts named by RFC 2392 `mid:` and `cid:` URIs
//! from an IMAP mailbox; `midput` uploads local files as attachments of a new
//! draft. Both authenticate with SASL GSSAPI using the caller's Kerberos
//! ticket.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

/// Print a diagnostic to standard error and terminate the whole run.
///
/// Every failure of the command-line tools is terminal, so this exits with
/// status 1 regardless of the cause.
macro_rules! die {
    ($($arg:tt)*) => {{
        eprintln!($($arg)*);
        ::std::process::exit(1)
    }};
}

pub mod cli;
pub mod imap;
pub mod mime;
pub mod sasl;
pub mod support;
