//! Read-only access to the backup archive.
//!
//! The archive is a tar stream, optionally gzip, bzip2, xz or zstd
//! compressed. The compression is detected from the first bytes of the file,
//! not its name.

use crate::utils::errors::{RestoreError, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};
use tar::{Archive, EntryType};
use tracing::{debug, warn};
use xz2::read::XzDecoder;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// Compression wrapped around the tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Sniff the compression of the file at `path`.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut header = [0u8; 6];
        let mut file = File::open(path)?;
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(Self::from_magic(&header[..filled]))
    }

    fn from_magic(header: &[u8]) -> Self {
        if header.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if header.starts_with(ZSTD_MAGIC) {
            Compression::Zstd
        } else if header.starts_with(BZIP2_MAGIC) {
            Compression::Bzip2
        } else if header.starts_with(XZ_MAGIC) {
            Compression::Xz
        } else {
            Compression::None
        }
    }
}

/// Open the archive at `path` as a tar stream.
pub fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let compression = Compression::detect(path)?;
    debug!("Opening {} ({:?})", path.display(), compression);

    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = match compression {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Bzip2 => Box::new(BzDecoder::new(file)),
        Compression::Xz => Box::new(XzDecoder::new(file)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(file)?),
    };
    Ok(Archive::new(reader))
}

/// Names of every non-directory member, as stored (leading `./` dropped).
pub fn list_members(path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(path)?;
    let mut members = Vec::new();

    for entry in archive.entries().map_err(archive_error)? {
        let entry = entry.map_err(archive_error)?;
        let kind = entry.header().entry_type();
        if kind == EntryType::Directory || is_header_entry(kind) {
            continue;
        }
        let name = entry.path().map_err(archive_error)?;
        members.push(normalize_member(&name));
    }

    Ok(members)
}

/// Unpack every member under `target`, overwriting existing files.
///
/// Members whose path would land outside `target` are skipped with a
/// warning. Returns the number of members written.
pub fn extract_all(path: &Path, target: &Path) -> Result<usize> {
    std::fs::create_dir_all(target)?;
    let mut archive = open_archive(path)?;
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut count = 0usize;
    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        if is_header_entry(entry.header().entry_type()) {
            continue;
        }
        let name = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if entry.unpack_in(target).map_err(archive_error)? {
            debug!("Extracted {}", name);
            count += 1;
        } else {
            warn!("Refusing to extract {} outside of {}", name, target.display());
        }
    }

    Ok(count)
}

/// pax and GNU extension records describe other entries; they are not
/// members of their own.
fn is_header_entry(kind: EntryType) -> bool {
    matches!(
        kind,
        EntryType::XGlobalHeader
            | EntryType::XHeader
            | EntryType::GNULongName
            | EntryType::GNULongLink
    )
}

fn normalize_member(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn archive_error(e: std::io::Error) -> RestoreError {
    RestoreError::Archive(e.to_string())
}
