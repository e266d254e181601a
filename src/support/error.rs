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

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::imap::{bodystructure, client};
use crate::mime::transfer;
use crate::sasl;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Imap(#[from] client::Error),
    #[error(transparent)]
    Sasl(#[from] sasl::Error),
    #[error("Malformed BODYSTRUCTURE: {0}")]
    BodyStructure(#[from] bodystructure::Error),
    #[error(transparent)]
    Transfer(#[from] transfer::Error),
    #[error("Error in configuration file {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },
    #[error("No server configured; use --host or set server.host")]
    NoHost,
    #[error(
        "You should only use mid:... and cid:... arguments, see RFC 2392: {0}"
    )]
    BadUri(String),
    #[error("Failed to locate content")]
    NoContent,
    #[error(
        "File {} already exists\n\
         You probably ran the command twice; or else the sender may \
         attempt overwriting",
        .0.display()
    )]
    AlreadyExists(PathBuf),
    #[error("Failed to read {}: {source}", .path.display())]
    ReadFile { path: PathBuf, source: io::Error },
    #[error("Refusing to use unsafe file name {0:?}")]
    UnsafeName(String),
    #[error("Failed to select both {0} and INBOX")]
    NoMailbox(String),
}
