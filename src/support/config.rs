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

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::Error;

/// The per-user configuration shared by `midget` and `midput`.
///
/// This is stored in a TOML file, by default `midtools.toml` under
/// `$XDG_CONFIG_HOME` or `~/.config`. Every setting has a usable default
/// except the server host, which can also be given on the command line.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// How to reach the IMAP server.
    pub server: ServerConfig,

    /// How to authenticate.
    pub gssapi: GssapiConfig,

    /// Which mailboxes to work with.
    pub mailboxes: MailboxesConfig,

    /// What `midput` puts into the drafts it creates.
    pub draft: DraftConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The host name of the IMAP server.
    ///
    /// This is also the host part of the Kerberos service principal, so it
    /// should be the canonical name of the server rather than an alias.
    pub host: Option<String>,

    /// The port to connect to. Defaults to 143, or 993 if `tls` is set.
    pub port: Option<u16>,

    /// If true, negotiate TLS immediately upon connecting.
    pub tls: bool,

    /// If true, do not verify the server certificate.
    pub allow_insecure_tls_connections: bool,
}

impl ServerConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.tls { 993 } else { 143 })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GssapiConfig {
    /// The service part of the principal, `<service>@<host>`.
    pub service: String,

    /// The GSSAPI shared library to load.
    ///
    /// If unset, the usual MIT and Heimdal library names are tried.
    pub library: Option<PathBuf>,
}

impl Default for GssapiConfig {
    fn default() -> Self {
        GssapiConfig {
            service: "imap".to_owned(),
            library: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MailboxesConfig {
    /// The mailbox `midget` searches.
    pub search: String,
    /// The mailbox `midput` adds drafts to. INBOX is used if this cannot be
    /// selected.
    pub drafts: String,
}

impl Default for MailboxesConfig {
    fn default() -> Self {
        MailboxesConfig {
            search: "INBOX".to_owned(),
            drafts: "Drafts".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DraftConfig {
    /// The text of the first body part, which precedes the attachments.
    pub intro: String,
    /// The flags set on the appended draft.
    pub flags: Vec<String>,
}

impl Default for DraftConfig {
    fn default() -> Self {
        DraftConfig {
            intro: "Hello,\n\nAttached, you will find \n".to_owned(),
            flags: vec!["\\Flagged".to_owned(), "\\Draft".to_owned()],
        }
    }
}

/// Where the configuration comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named by the user; it is an error for it not to exist.
    Explicit(PathBuf),
    /// The conventional location; it is fine for it not to exist.
    Default(PathBuf),
    /// No location could be determined.
    None,
}

impl ConfigSource {
    /// Determine where to load the configuration from.
    ///
    /// `env` looks up environment variables; it is a parameter so that tests
    /// need not touch the real environment.
    pub fn locate(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<OsString>,
    ) -> Self {
        let nonempty = |name: &str| env(name).filter(|v| !v.is_empty());

        if let Some(path) = explicit {
            ConfigSource::Explicit(path.to_owned())
        } else if let Some(path) = nonempty("MIDTOOLS_CONFIG") {
            ConfigSource::Explicit(path.into())
        } else if let Some(dir) = nonempty("XDG_CONFIG_HOME") {
            ConfigSource::Default(PathBuf::from(dir).join("midtools.toml"))
        } else if let Some(home) = nonempty("HOME") {
            ConfigSource::Default(
                PathBuf::from(home).join(".config").join("midtools.toml"),
            )
        } else {
            ConfigSource::None
        }
    }
}

impl Config {
    pub fn load(source: &ConfigSource) -> Result<Self, Error> {
        let (path, required) = match *source {
            ConfigSource::Explicit(ref path) => (path, true),
            ConfigSource::Default(ref path) => (path, false),
            ConfigSource::None => return Ok(Config::default()),
        };

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if !required && io::ErrorKind::NotFound == e.kind() => {
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(Error::Config {
                    path: path.to_owned(),
                    message: e.to_string(),
                })
            }
        };

        toml::from_str(&text).map_err(|e| Error::Config {
            path: path.to_owned(),
            message: e.to_string(),
        })
    }
}
