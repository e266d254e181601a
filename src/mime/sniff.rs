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

//! Guessing the media type of a local file.

use std::fmt;
use std::path::Path;

use file_type::FileType;
use log::debug;

const OCTET_STREAM: &str = "application/octet-stream";

/// A `major/minor` media type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaType {
    pub major: String,
    pub minor: String,
}

impl MediaType {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().splitn(2, '/');
        let major = parts.next()?.trim();
        let minor = parts.next()?.trim();
        if major.is_empty() || minor.is_empty() {
            return None;
        }

        Some(MediaType {
            major: major.to_ascii_lowercase(),
            minor: minor.to_ascii_lowercase(),
        })
    }

    pub fn is_text(&self) -> bool {
        "text" == self.major
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.major, self.minor)
    }
}

fn first_media_type(ft: &FileType) -> Option<MediaType> {
    ft.media_types()
        .iter()
        .filter_map(|mt| MediaType::parse(mt))
        .find(|mt| OCTET_STREAM != mt.to_string())
}

/// Determine the media type of the file at `path` with content `content`.
///
/// Content signatures win over the file name extension. Failing both,
/// UTF-8 without NUL bytes is taken to be plain text.
pub fn detect_type(path: &Path, content: &[u8]) -> MediaType {
    if let Some(mt) = first_media_type(FileType::from_bytes(content)) {
        debug!("{}: {} by content", path.display(), mt);
        return mt;
    }

    let by_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            FileType::from_extension(&ext.to_ascii_lowercase())
                .iter()
                .find_map(|ft| first_media_type(ft))
        });
    if let Some(mt) = by_extension {
        debug!("{}: {} by extension", path.display(), mt);
        return mt;
    }

    let mt = if !content.contains(&0) && std::str::from_utf8(content).is_ok()
    {
        "text/plain"
    } else {
        OCTET_STREAM
    };
    debug!("{}: {} by default", path.display(), mt);
    MediaType::parse(mt).unwrap_or(MediaType {
        major: "application".to_owned(),
        minor: "octet-stream".to_owned(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_media_type() {
        assert_eq!(
            Some(MediaType {
                major: "image".to_owned(),
                minor: "png".to_owned(),
            }),
            MediaType::parse("Image/PNG")
        );
        assert_eq!(None, MediaType::parse("image"));
        assert_eq!(None, MediaType::parse("/png"));
        assert_eq!("text/plain", MediaType::parse("text/plain").unwrap().to_string());
    }

    #[test]
    fn sniff_known_types() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";
        assert_eq!(
            "image/png",
            detect_type(Path::new("picture.png"), png).to_string()
        );

        let pdf = b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<<>>\nendobj\n%%EOF\n";
        assert_eq!(
            "application/pdf",
            detect_type(Path::new("document.PDF"), pdf).to_string()
        );
    }

    #[test]
    fn text_fallback() {
        let mt = detect_type(Path::new("README"), b"Hello world\n");
        assert!(mt.is_text());
        assert_eq!("text/plain", mt.to_string());

        let mt = detect_type(Path::new("blob"), b"\0\x01\x02\xff\xfe");
        assert_eq!(OCTET_STREAM, mt.to_string());
        assert!(!mt.is_text());
    }
}
