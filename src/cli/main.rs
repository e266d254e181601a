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

use std::path::PathBuf;
use std::process;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use structopt::StructOpt;

use crate::support::config::{Config, ConfigSource};
use crate::support::error::Error;

/// Options shared by both tools.
///
/// Anything given here overrides the configuration file.
#[derive(StructOpt, Debug, Default)]
pub(super) struct CommonOptions {
    /// The IMAP server to connect to [default: server.host from the
    /// configuration file]
    #[structopt(long)]
    pub(super) host: Option<String>,
    /// The port to connect to [default: 143, or 993 with --tls]
    #[structopt(long, short)]
    pub(super) port: Option<u16>,
    /// Use implicit TLS
    #[structopt(long)]
    pub(super) tls: bool,
    /// Allow insecure TLS connections
    #[structopt(long)]
    pub(super) allow_insecure_tls_connections: bool,
    /// Dump a trace of the IMAP connection to standard error.
    #[structopt(long)]
    pub(super) trace: bool,
    /// Log more; may be repeated up to three times.
    #[structopt(short, long, parse(from_occurrences))]
    pub(super) verbose: u8,
    /// The configuration file to use
    /// [default: $XDG_CONFIG_HOME/midtools.toml]
    #[structopt(long, parse(from_os_str))]
    pub(super) config: Option<PathBuf>,
}

impl CommonOptions {
    /// Load the configuration file and apply the command-line overrides.
    pub(super) fn configure(&self) -> Result<(Config, String), Error> {
        let source = ConfigSource::locate(self.config.as_deref(), |name| {
            std::env::var_os(name)
        });
        self.apply(Config::load(&source)?)
    }

    /// Apply the command-line overrides to `config`, returning it along with
    /// the host to connect to.
    fn apply(&self, mut config: Config) -> Result<(Config, String), Error> {
        if let Some(ref host) = self.host {
            config.server.host = Some(host.clone());
        }
        if self.port.is_some() {
            config.server.port = self.port;
        }
        config.server.tls |= self.tls;
        config.server.allow_insecure_tls_connections |=
            self.allow_insecure_tls_connections;

        let host = config
            .server
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or(Error::NoHost)?;
        Ok((config, host))
    }
}

/// Parse the command line into `T`.
///
/// Usage errors exit with status 1 like every other failure.
pub(super) fn parse_args<T: StructOpt>() -> T {
    T::from_clap(&match T::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            process::exit(0)
        }
        Err(e) => die!("{}", e.message),
    })
}

fn level_filter(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Send log output to standard error.
pub(super) fn init_logging(verbose: u8) {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{l} {m}{n}")))
        .build();

    let config = log4rs::config::Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(
            Root::builder()
                .appender("stderr")
                .build(level_filter(verbose)),
        );

    // Running without logs is better than not running at all.
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Failed to initialise logging: {}", e);
            }
        }
        Err(e) => eprintln!("Failed to initialise logging: {}", e),
    }
}
