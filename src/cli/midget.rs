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

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use structopt::StructOpt;

use super::main::{init_logging, parse_args, CommonOptions};
use super::remote::{connect, log_in};
use crate::imap::locate::{self, Part};
use crate::imap::{Client, FetchData, Node};
use crate::mime::transfer::TransferEncoding;
use crate::sasl::{Kerberos, Session};
use crate::support::error::Error;
use crate::support::file_ops::{
    is_safe_file_name, link_if_absent, spit_new, LinkOutcome,
};
use crate::support::uri::Target;

/// Retrieve the mid: and cid: URIs from your IMAP mailbox.
///
/// Each URI (RFC 2392) names a message or a body part. The part is written
/// to a file named after its Message-ID or Content-ID, and a hard link under
/// the part's own file name is added when it has one. Existing files are
/// never overwritten.
///
/// Authentication and mailbox identities use your current Kerberos ticket.
#[derive(StructOpt)]
#[structopt(name = "midget", max_term_width = 80)]
struct Options {
    #[structopt(flatten)]
    common: CommonOptions,

    /// Write files into this directory.
    #[structopt(long, short, parse(from_os_str), default_value = ".")]
    directory: PathBuf,

    /// The mid:... and cid:... URIs to retrieve.
    #[structopt(required = true)]
    uris: Vec<String>,
}

pub fn main() {
    let options: Options = parse_args();
    init_logging(options.common.verbose);

    if let Err(e) = main_impl(options) {
        die!("Error: {}", e);
    }
}

fn main_impl(options: Options) -> Result<(), Error> {
    // Bad URIs are reported before anything touches the network.
    let targets = options
        .uris
        .iter()
        .map(|uri| Target::parse(uri))
        .collect::<Result<Vec<_>, _>>()?;

    let (config, host) = options.common.configure()?;
    let kerberos = Kerberos::load(config.gssapi.library.as_deref())?;
    let mut session = Session::new(kerberos, &config.gssapi.service, &host);
    let mut client = connect(&config.server, &host, options.common.trace)?;

    if let Some(name) = log_in(&mut client, &mut session)? {
        println!("Accessing IMAP as {}", name);
    }

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    retrieve(
        &mut client,
        &config.mailboxes.search,
        &targets,
        &options.directory,
        &mut stdout,
    )
}

/// Retrieve every target from `mailbox` into `directory`, then log out.
///
/// Details of every part found are written to `out`.
fn retrieve<R: BufRead, W: Write>(
    client: &mut Client<R, W>,
    mailbox: &str,
    targets: &[Target],
    directory: &Path,
    out: &mut impl Write,
) -> Result<(), Error> {
    client.select(mailbox)?.into_result("SELECT")?;

    for target in targets {
        let key = target.search_key();
        let uids = client.uid_search(key)?.into_result("SEARCH")?;
        if uids.is_empty() {
            warn!("No message matches {}", key);
        }

        for uid in uids {
            retrieve_from(client, uid, target, directory, out)?;
        }
    }

    client.logout()?;
    Ok(())
}

fn retrieve_from<R: BufRead, W: Write>(
    client: &mut Client<R, W>,
    uid: u32,
    target: &Target,
    directory: &Path,
    out: &mut impl Write,
) -> Result<(), Error> {
    let fetched = client
        .uid_fetch(uid, "(UID BODYSTRUCTURE)")?
        .into_result("FETCH")?;
    let data = select_response(&fetched, uid)?.ok_or(Error::NoContent)?;
    let tree = Node::parse(&data.text())?;
    let root = locate::root_path(&tree).ok_or(Error::NoContent)?;

    let paths = match target.content_id {
        Some(ref cid) => {
            let paths = locate::find_content_id(&tree, &root, cid);
            if paths.is_empty() {
                warn!("UID {} has no part with Content-ID {}", uid, cid);
            }
            paths
        }
        None => vec![locate::default_path(&root)],
    };

    for path in paths {
        let part = tree
            .at(&path)
            .and_then(Part::new)
            .filter(|part| !part.is_multipart())
            .ok_or(Error::NoContent)?;
        describe(&part, out)?;

        let spec = locate::body_spec(&path);
        writeln!(out, "Fetchable bodyspec {} for UID {}", spec, uid)?;
        save(client, uid, &path, &part, target, directory, out)?;
    }

    Ok(())
}

/// Pick the FETCH response for `uid` out of `fetched`.
///
/// Servers may send unsolicited FETCH responses for other messages (e.g. flag
/// changes) along with the one asked for, so a response without the UID is
/// never taken as the answer.
fn select_response(
    fetched: &[FetchData],
    uid: u32,
) -> Result<Option<&FetchData>, Error> {
    for data in fetched {
        if Some(uid) == data.uid()? {
            return Ok(Some(data));
        }
    }

    Ok(None)
}

fn describe(part: &Part<'_>, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "MIME-Type = {}", part.mime_type())?;
    match part.params() {
        Some(params) => writeln!(out, "[attr,value,...] = {}", params)?,
        None => writeln!(out, "[attr,value,...] =")?,
    }
    writeln!(out, "Filename: {}", part.name().unwrap_or("(none)"))?;
    writeln!(out, "Content-ID = {}", part.content_id().unwrap_or(""))?;
    writeln!(out, "Description = {}", part.description().unwrap_or(""))?;
    writeln!(out, "Transfer-Encoding = {}", part.encoding().unwrap_or(""))?;
    match part.size() {
        Some(size) => writeln!(out, "Size = {}", size),
        None => writeln!(out, "Size = ?"),
    }
}

fn save<R: BufRead, W: Write>(
    client: &mut Client<R, W>,
    uid: u32,
    path: &[usize],
    part: &Part<'_>,
    target: &Target,
    directory: &Path,
    out: &mut impl Write,
) -> Result<(), Error> {
    let file_name = target.file_name();
    if !is_safe_file_name(file_name) {
        return Err(Error::UnsafeName(file_name.to_owned()));
    }

    // Checked before fetching so a repeated run costs nothing; the write
    // itself still refuses to clobber anything created in the meantime.
    let destination = directory.join(file_name);
    if destination.symlink_metadata().is_ok() {
        return Err(Error::AlreadyExists(destination));
    }

    let section = locate::body_section(path);
    let fetched = client
        .uid_fetch(uid, &format!("(BODY.PEEK[{}])", section))?
        .into_result("FETCH")?;
    let body = select_response(&fetched, uid)?
        .ok_or(Error::NoContent)?
        .body(&section)?
        .ok_or(Error::NoContent)?;

    let encoding = TransferEncoding::from_field(part.encoding());
    debug!("Decoding {} bytes of {} content", body.len(), encoding);
    let content = encoding.decode(&body)?;

    spit_new(directory, &destination, &content).map_err(|e| {
        if io::ErrorKind::AlreadyExists == e.kind() {
            Error::AlreadyExists(destination.clone())
        } else {
            Error::Io(e)
        }
    })?;
    info!("Saved {} bytes", content.len());
    writeln!(out, "Written to: {}", destination.display())?;

    let name = match part.name() {
        Some(name) => name,
        None => return Ok(()),
    };

    if !is_safe_file_name(name) {
        warn!("Not linking unsafe file name {:?}", name);
        return Ok(());
    }

    let link = directory.join(name);
    if link == destination {
        return Ok(());
    }

    match link_if_absent(&destination, &link)? {
        LinkOutcome::Created => {
            writeln!(out, "Created a link from: {}", link.display())?;
        }
        LinkOutcome::Exists => {
            warn!("File {} already exists, not linking", link.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::imap::client::test::{scripted, sent};
    use crate::imap::client::Error as ClientError;

    const MIXED: &str = "* 3 FETCH (UID 17 BODYSTRUCTURE (\
        (\"text\" \"plain\" (\"charset\" \"us-ascii\") NIL NIL \"7bit\" 31 2 \
         NIL NIL NIL NIL)\
        (\"application\" \"pdf\" (\"name\" \"report.pdf\") \"<part2@example>\" \
         \"Quarterly\" \"base64\" 8 NIL (\"attachment\" \
         (\"filename\" \"report.pdf\")) NIL NIL) \
        \"mixed\" (\"boundary\" \"outer\") NIL NIL NIL))\r\n";

    const NESTED: &str = "* 1 FETCH (UID 5 BODYSTRUCTURE (\
        (\"text\" \"plain\" NIL NIL NIL \"7bit\" 2 1 NIL NIL NIL NIL)\
        ((\"text\" \"html\" (\"charset\" \"utf-8\") \"<x@y>\" NIL \
          \"quoted-printable\" 9 1 NIL NIL NIL NIL)\
         (\"image\" \"png\" NIL \"<other@y>\" NIL \"base64\" 4 NIL NIL NIL NIL) \
         \"related\" NIL NIL NIL NIL) \
        \"mixed\" NIL NIL NIL NIL))\r\n";

    fn run(
        script: &str,
        uri: &str,
        dir: &Path,
    ) -> (Result<(), Error>, String, String) {
        let mut client = scripted(script);
        let mut out = Vec::new();
        let target = Target::parse(uri).unwrap();
        let result = retrieve(&mut client, "INBOX", &[target], dir, &mut out);
        (result, String::from_utf8(out).unwrap(), sent(client))
    }

    #[test]
    fn message_id_fetches_default_part() {
        let dir = TempDir::new().unwrap();
        let script = [
            "* 3 EXISTS\r\n\
             M0 OK [READ-WRITE] done\r\n\
             * SEARCH 17\r\n\
             M1 OK done\r\n",
            MIXED,
            "M2 OK done\r\n\
             * 3 FETCH (UID 17 BODY[2] {8}\r\naGVsbG8=)\r\n\
             M3 OK done\r\n\
             * BYE bye\r\n\
             M4 OK done\r\n",
        ]
        .concat();

        let (result, out, sent) = run(&script, "mid:a@b", dir.path());
        result.unwrap();

        let destination = dir.path().join("a@b");
        let link = dir.path().join("report.pdf");
        assert_eq!(
            format!(
                "MIME-Type = application/pdf\n\
                 [attr,value,...] = (\"name\" \"report.pdf\")\n\
                 Filename: report.pdf\n\
                 Content-ID = <part2@example>\n\
                 Description = Quarterly\n\
                 Transfer-Encoding = base64\n\
                 Size = 8\n\
                 Fetchable bodyspec BODY[2] for UID 17\n\
                 Written to: {}\n\
                 Created a link from: {}\n",
                destination.display(),
                link.display()
            ),
            out
        );
        assert_eq!(
            "M0 SELECT INBOX\r\n\
             M1 UID SEARCH (HEADER Message-ID \"<a@b>\")\r\n\
             M2 UID FETCH 17 (UID BODYSTRUCTURE)\r\n\
             M3 UID FETCH 17 (BODY.PEEK[2])\r\n\
             M4 LOGOUT\r\n",
            sent
        );
        assert_eq!(b"hello".to_vec(), fs::read(&destination).unwrap());
        assert_eq!(b"hello".to_vec(), fs::read(&link).unwrap());
    }

    #[test]
    fn content_id_finds_nested_part() {
        let dir = TempDir::new().unwrap();
        let script = [
            "M0 OK done\r\n\
             * SEARCH 5\r\n\
             M1 OK done\r\n",
            NESTED,
            "M2 OK done\r\n\
             * 1 FETCH (UID 5 BODY[2.1] {9}\r\na=3Db=\r\nc)\r\n\
             M3 OK done\r\n\
             M4 OK done\r\n",
        ]
        .concat();

        let (result, out, sent) = run(&script, "cid:x@y", dir.path());
        result.unwrap();

        assert!(out.starts_with(
            "MIME-Type = text/html\n\
             [attr,value,...] = (\"charset\" \"utf-8\")\n\
             Filename: (none)\n\
             Content-ID = <x@y>\n\
             Description = \n\
             Transfer-Encoding = quoted-printable\n\
             Size = 9\n\
             Fetchable bodyspec BODY[2.1] for UID 5\n"
        ));
        assert!(!out.contains("Created a link"));
        assert!(sent.contains("M1 UID SEARCH (TEXT \"<x@y>\")\r\n"));
        assert!(sent.contains("M3 UID FETCH 5 (BODY.PEEK[2.1])\r\n"));
        assert_eq!(
            b"a=bc".to_vec(),
            fs::read(dir.path().join("x@y")).unwrap()
        );
    }

    #[test]
    fn existing_destination_is_fatal_before_fetching() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a@b"), b"precious").unwrap();
        let script = [
            "M0 OK done\r\n\
             * SEARCH 17\r\n\
             M1 OK done\r\n",
            MIXED,
            "M2 OK done\r\n",
        ]
        .concat();

        let (result, _, sent) = run(&script, "mid:a@b", dir.path());
        assert_matches!(Err(Error::AlreadyExists(_)), result);
        assert!(!sent.contains("BODY.PEEK"));
        assert_eq!(
            b"precious".to_vec(),
            fs::read(dir.path().join("a@b")).unwrap()
        );
    }

    #[test]
    fn existing_link_name_is_left_alone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report.pdf"), b"mine").unwrap();
        let script = [
            "M0 OK done\r\n\
             * SEARCH 17\r\n\
             M1 OK done\r\n",
            MIXED,
            "M2 OK done\r\n\
             * 3 FETCH (UID 17 BODY[2] \"aGVsbG8=\")\r\n\
             M3 OK done\r\n\
             M4 OK done\r\n",
        ]
        .concat();

        let (result, out, _) = run(&script, "mid:a@b", dir.path());
        result.unwrap();
        assert!(out.contains("Written to: "));
        assert!(!out.contains("Created a link"));
        assert_eq!(b"hello".to_vec(), fs::read(dir.path().join("a@b")).unwrap());
        assert_eq!(
            b"mine".to_vec(),
            fs::read(dir.path().join("report.pdf")).unwrap()
        );
    }

    #[test]
    fn unknown_content_id_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let script = [
            "M0 OK done\r\n\
             * SEARCH 5\r\n\
             M1 OK done\r\n",
            NESTED,
            "M2 OK done\r\n\
             M3 OK done\r\n",
        ]
        .concat();

        let (result, out, sent) = run(&script, "cid:nope@y", dir.path());
        result.unwrap();
        assert_eq!("", out);
        assert!(sent.ends_with("M3 LOGOUT\r\n"));
        assert_eq!(0, fs::read_dir(dir.path()).unwrap().count());
    }

    #[test]
    fn unsolicited_fetch_is_not_mistaken_for_the_message() {
        let dir = TempDir::new().unwrap();
        let script = "M0 OK done\r\n\
                      * SEARCH 17\r\n\
                      M1 OK done\r\n\
                      * 2 FETCH (FLAGS (\\Seen) BODYSTRUCTURE \
                      (\"text\" \"plain\" NIL NIL NIL \"7bit\" 2 1))\r\n\
                      M2 OK done\r\n";

        let (result, out, sent) = run(script, "mid:a@b", dir.path());
        assert_matches!(Err(Error::NoContent), result);
        assert_eq!("", out);
        assert!(!sent.contains("BODY.PEEK"));
        assert_eq!(0, fs::read_dir(dir.path()).unwrap().count());
    }

    #[test]
    fn body_from_other_message_is_ignored() {
        let dir = TempDir::new().unwrap();
        let script = [
            "M0 OK done\r\n\
             * SEARCH 17\r\n\
             M1 OK done\r\n",
            MIXED,
            "M2 OK done\r\n\
             * 4 FETCH (UID 18 BODY[2] {8}\r\naGVsbG8=)\r\n\
             M3 OK done\r\n",
        ]
        .concat();

        let (result, _, _) = run(&script, "mid:a@b", dir.path());
        assert_matches!(Err(Error::NoContent), result);
        assert!(!dir.path().join("a@b").exists());
    }

    #[test]
    fn unsafe_destination_is_refused() {
        let dir = TempDir::new().unwrap();
        let script = [
            "M0 OK done\r\n\
             * SEARCH 17\r\n\
             M1 OK done\r\n",
            MIXED,
            "M2 OK done\r\n",
        ]
        .concat();

        let (result, _, sent) = run(&script, "mid:..%2Fescape", dir.path());
        assert_matches!(Err(Error::UnsafeName(_)), result);
        assert!(!sent.contains("BODY.PEEK"));
    }

    #[test]
    fn failed_search_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (result, _, _) = run(
            "M0 OK done\r\nM1 BAD no\r\n",
            "cid:x@y",
            dir.path(),
        );
        assert_matches!(
            Err(Error::Imap(ClientError::Rejected { what: "SEARCH", .. })),
            result
        );
    }

    #[test]
    fn failed_select_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (result, _, sent) =
            run("M0 NO no such mailbox\r\n", "cid:x@y", dir.path());
        assert_matches!(
            Err(Error::Imap(ClientError::Rejected { what: "SELECT", .. })),
            result
        );
        assert_eq!("M0 SELECT INBOX\r\n", sent);
    }

    #[test]
    fn pick_matching_fetch_response() {
        let fetched = vec![
            FetchData {
                seqnum: 2,
                items: b"(FLAGS (\\Seen))".to_vec(),
            },
            FetchData {
                seqnum: 3,
                items: b"(UID 17 BODY[1] NIL)".to_vec(),
            },
        ];
        assert_eq!(3, select_response(&fetched, 17).unwrap().unwrap().seqnum);
        assert!(select_response(&fetched, 99).unwrap().is_none());
        assert!(select_response(&fetched[..1], 17).unwrap().is_none());
        assert!(select_response(&[], 1).unwrap().is_none());
    }
}
