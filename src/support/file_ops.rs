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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Determine whether `name` can safely be used as a file name within the
/// destination directory.
///
/// Names come from the remote server, so anything that could escape the
/// directory, create a hidden file or confuse the terminal is rejected.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() &&
        // Blocks ".", ".." and hidden files
        !name.starts_with('.') &&
        !name.contains('/') &&
        !name.contains('\\') &&
        !name.contains(|c: char| c.is_control())
}

/// Write `data` into a new file at `path`, atomically.
///
/// The file is staged within `tmp`, which must be on the same file system as
/// `path`. Fails with `AlreadyExists` if `path` exists, in which case nothing
/// at `path` is modified.
pub fn spit_new(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    data: &[u8],
) -> io::Result<()> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    tf.as_file_mut().sync_all()?;
    tf.persist_noclobber(path)?;
    Ok(())
}

/// The result of `link_if_absent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// Something already exists under the link name and was left alone.
    Exists,
}

/// Create a hard link `link` to `original` unless `link` already exists.
pub fn link_if_absent(
    original: impl AsRef<Path>,
    link: impl AsRef<Path>,
) -> io::Result<LinkOutcome> {
    match fs::hard_link(original, link) {
        Ok(()) => Ok(LinkOutcome::Created),
        Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
            Ok(LinkOutcome::Exists)
        }
        Err(e) => Err(e),
    }
}
