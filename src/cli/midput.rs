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

use std::io::{BufRead, Write};
use std::path::PathBuf;

use log::{info, warn};
use structopt::StructOpt;

use super::main::{init_logging, parse_args, CommonOptions};
use super::remote::{connect, log_in};
use crate::imap::Client;
use crate::mime::draft::{Attachment, Draft};
use crate::sasl::{Kerberos, Session};
use crate::support::error::Error;

/// Create a draft email with the given files attached.
///
/// The draft starts with a short introductory text, followed by one part
/// per file. It is added to the Drafts mailbox, or to INBOX if there is no
/// Drafts mailbox, from where you can complete and send it with your usual
/// mail client.
///
/// Authentication and mailbox identities use your current Kerberos ticket.
#[derive(StructOpt)]
#[structopt(name = "midput", max_term_width = 80)]
struct Options {
    #[structopt(flatten)]
    common: CommonOptions,

    /// Add the draft to this mailbox
    /// [default: mailboxes.drafts from the configuration file]
    #[structopt(long, short)]
    mailbox: Option<String>,

    /// The files to attach.
    #[structopt(parse(from_os_str), required = true)]
    files: Vec<PathBuf>,
}

pub fn main() {
    let options: Options = parse_args();
    init_logging(options.common.verbose);

    if let Err(e) = main_impl(options) {
        die!("Error: {}", e);
    }
}

fn main_impl(options: Options) -> Result<(), Error> {
    let (config, host) = options.common.configure()?;
    // Read everything first so an unreadable file fails before connecting.
    let draft = build_draft(&config.draft.intro, &options.files)?;

    let kerberos = Kerberos::load(config.gssapi.library.as_deref())?;
    let mut session = Session::new(kerberos, &config.gssapi.service, &host);
    let mut client = connect(&config.server, &host, options.common.trace)?;
    if let Some(name) = log_in(&mut client, &mut session)? {
        info!("Accessing IMAP as {}", name);
    }

    let drafts = options
        .mailbox
        .as_deref()
        .unwrap_or(&config.mailboxes.drafts);
    let mailbox =
        upload(&mut client, drafts, &config.draft.flags, &draft.to_bytes())?;
    info!(
        "Added draft with {} attachment(s) to {}",
        draft.attachments().len(),
        mailbox
    );
    Ok(())
}

fn build_draft(intro: &str, files: &[PathBuf]) -> Result<Draft, Error> {
    let mut draft = Draft::new(intro);
    for path in files {
        let attachment =
            Attachment::from_file(path).map_err(|source| Error::ReadFile {
                path: path.clone(),
                source,
            })?;
        info!(
            "Attaching {} as {} ({})",
            path.display(),
            attachment.name,
            attachment.media_type
        );
        draft.attach(attachment);
    }

    Ok(draft)
}

/// Append `message` to `drafts`, falling back to INBOX if `drafts` cannot be
/// selected, then log out.
///
/// Returns the mailbox the message went into.
fn upload<'a, R: BufRead, W: Write>(
    client: &mut Client<R, W>,
    drafts: &'a str,
    flags: &[String],
    message: &[u8],
) -> Result<&'a str, Error> {
    let mailbox = if client.select(drafts)?.is_ok() {
        drafts
    } else if client.select("INBOX")?.is_ok() {
        warn!("No {} mailbox found, posting to INBOX", drafts);
        "INBOX"
    } else {
        return Err(Error::NoMailbox(drafts.to_owned()));
    };

    client
        .append(mailbox, flags, message)?
        .into_result("APPEND")?;
    client.logout()?;
    Ok(mailbox)
}

#[cfg(test)]
mod test {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::imap::client::test::{scripted, sent};
    use crate::imap::client::Error as ClientError;

    fn flags() -> Vec<String> {
        vec!["\\Flagged".to_owned(), "\\Draft".to_owned()]
    }

    #[test]
    fn upload_to_drafts() {
        let mut client = scripted(
            "M0 OK [READ-WRITE] done\r\n\
             + go ahead\r\n\
             M1 OK [APPENDUID 3 9] done\r\n\
             * BYE bye\r\n\
             M2 OK done\r\n",
        );
        assert_eq!(
            "Drafts",
            upload(&mut client, "Drafts", &flags(), b"Subject: x\r\n\r\n")
                .unwrap()
        );
        assert_eq!(
            "M0 SELECT Drafts\r\n\
             M1 APPEND Drafts (\\Flagged \\Draft) {14}\r\n\
             Subject: x\r\n\r\n\r\n\
             M2 LOGOUT\r\n",
            sent(client)
        );
    }

    #[test]
    fn fall_back_to_inbox() {
        let mut client = scripted(
            "M0 NO [NONEXISTENT] no such mailbox\r\n\
             M1 OK done\r\n\
             + go ahead\r\n\
             M2 OK done\r\n\
             M3 OK done\r\n",
        );
        assert_eq!(
            "INBOX",
            upload(&mut client, "Drafts", &flags(), b"x").unwrap()
        );
        let sent = sent(client);
        assert!(sent.starts_with("M0 SELECT Drafts\r\nM1 SELECT INBOX\r\n"));
        assert!(sent.contains("M2 APPEND INBOX (\\Flagged \\Draft) {1}\r\n"));
    }

    #[test]
    fn no_mailbox_at_all() {
        let mut client = scripted("M0 NO nope\r\nM1 NO nope\r\n");
        assert_matches!(
            Err(Error::NoMailbox(_)),
            upload(&mut client, "Drafts", &flags(), b"x")
        );
        assert!(!sent(client).contains("APPEND"));
    }

    #[test]
    fn append_rejected() {
        let mut client = scripted(
            "M0 OK done\r\n\
             M1 NO [OVERQUOTA] too big\r\n",
        );
        assert_matches!(
            Err(Error::Imap(ClientError::Rejected { what: "APPEND", .. })),
            upload(&mut client, "Drafts", &flags(), b"x")
        );
    }

    #[test]
    fn draft_from_files() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes.txt");
        let data = dir.path().join("data.bin");
        fs::write(&notes, b"line one\nline two\n").unwrap();
        fs::write(&data, &[0u8, 159, 146, 150, 1, 2, 3][..]).unwrap();

        let draft = build_draft("Hi\n", &[notes, data]).unwrap();
        let names: Vec<&str> =
            draft.attachments().iter().map(|a| &a.name as &str).collect();
        assert_eq!(vec!["notes.txt", "data.bin"], names);
        assert_eq!(
            "text/plain",
            draft.attachments()[0].media_type.to_string()
        );

        let message = String::from_utf8_lossy(&draft.to_bytes()).into_owned();
        assert!(message.contains("line one\r\nline two\r\n"));
        assert!(message.contains("AJ+SlgECAw=="));
    }

    #[test]
    fn unreadable_file() {
        let dir = TempDir::new().unwrap();
        assert_matches!(
            Err(Error::ReadFile { .. }),
            build_draft("Hi\n", &[dir.path().join("missing")])
        );
    }
}
