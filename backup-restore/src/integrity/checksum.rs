//! Checksum list parsing and validation.
//!
//! A checksum list holds one `<sha256-hex> <relative-name>` entry per line.
//! The list is trusted all-or-nothing: a single malformed line rejects it.

use crate::fs::discovery::FileRole;
use crate::utils::errors::{RestoreError, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use tracing::{debug, error, info, warn};

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// One line of a checksum list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    /// Lowercase hex digest
    pub digest: String,

    /// File name relative to the backup directory
    pub name: String,
}

/// Result of checking every entry of a checksum list
#[derive(Debug, Clone, Default)]
pub struct ChecksumReport {
    /// Files whose digest matched
    pub verified: Vec<String>,

    /// Files whose digest did not match
    pub corrupt: BTreeSet<String>,

    /// Listed name of the archive file whose digest did not match. This
    /// is the file repair must target, which may differ from the outermost
    /// archive member (`x.tar` under `x.tar.sig`).
    pub corrupt_archive: Option<String>,

    /// Parity files that verified and may be used for repair
    pub usable_parity: Vec<String>,
}

impl ChecksumReport {
    pub fn is_corrupt(&self, name: &str) -> bool {
        self.corrupt.contains(name)
    }

    /// Corrupt archive with parity available to repair it
    pub fn archive_repairable(&self) -> bool {
        self.corrupt_archive.is_some() && !self.usable_parity.is_empty()
    }
}

/// Parse a checksum list.
///
/// Blank lines are skipped. Returns the 1-based number of the first
/// malformed line on failure.
pub fn parse_checksum_list(content: &str) -> std::result::Result<Vec<ChecksumEntry>, usize> {
    let mut entries = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }
        let entry = parse_line(line).ok_or(idx + 1)?;
        entries.push(entry);
    }

    Ok(entries)
}

fn parse_line(line: &str) -> Option<ChecksumEntry> {
    let (digest, rest) = line.split_once(char::is_whitespace)?;
    let name = rest.trim_start();
    // sha256sum marks binary-mode entries with a leading '*'
    let name = name.strip_prefix('*').unwrap_or(name);

    let digest_ok = digest.len() == DIGEST_HEX_LEN
        && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !digest_ok || name.is_empty() {
        return None;
    }

    let path = Path::new(name);
    let contained = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        return None;
    }

    Some(ChecksumEntry {
        digest: digest.to_string(),
        name: name.to_string(),
    })
}

/// SHA-256 of a file, lowercase hex
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify every file named in a checksum list.
///
/// # Arguments
/// * `base_path` - Directory the listed names are relative to
/// * `list_name` - Checksum list file name within `base_path`
/// * `force` - Downgrade mismatches on files with no role to warnings
///
/// # Returns
/// * `Ok(ChecksumReport)` - All essential files intact, or the archive is
///   corrupt but parity is available
/// * `Err(RestoreError)` - Malformed list, missing file, corrupt manifest,
///   unrepairable archive, or (without force) any other corrupt file
pub fn validate(base_path: &Path, list_name: &str, force: bool) -> Result<ChecksumReport> {
    let list_path = base_path.join(list_name);
    let content = std::fs::read_to_string(&list_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RestoreError::MissingFile(list_path.display().to_string())
        } else {
            RestoreError::Io(e)
        }
    })?;

    let entries = parse_checksum_list(&content).map_err(|line| {
        error!("Checksum list {} is malformed at line {}", list_name, line);
        RestoreError::MalformedChecksumList {
            list: list_name.to_string(),
            line,
        }
    })?;

    info!("Validating {} file(s) listed in {}", entries.len(), list_name);

    let mut report = ChecksumReport::default();
    let mut corrupt_manifest: Option<String> = None;
    let mut corrupt_other: Vec<String> = Vec::new();

    for entry in entries {
        let path = base_path.join(&entry.name);
        if !path.is_file() {
            error!("File {} is listed but missing from the backup", entry.name);
            return Err(RestoreError::MissingFile(entry.name));
        }

        let actual = hash_file(&path)?;
        let role = FileRole::classify(&entry.name);

        if actual == entry.digest {
            debug!("Checksum OK: {}", entry.name);
            if role == Some(FileRole::Parity) {
                report.usable_parity.push(entry.name.clone());
            }
            report.verified.push(entry.name);
            continue;
        }

        report.corrupt.insert(entry.name.clone());
        match role {
            Some(FileRole::Manifest) => {
                error!("Manifest {} has been corrupted", entry.name);
                corrupt_manifest.get_or_insert(entry.name);
            }
            Some(FileRole::Archive) => {
                warn!("Archive {} has been corrupted", entry.name);
                report.corrupt_archive.get_or_insert(entry.name);
            }
            Some(FileRole::Parity) => {
                warn!("Parity file {} has been corrupted and will not be used", entry.name);
            }
            _ if force => {
                warn!("File {} has been corrupted, continuing (forced)", entry.name);
            }
            _ => {
                error!("File {} has been corrupted", entry.name);
                corrupt_other.push(entry.name);
            }
        }
    }

    if let Some(manifest) = corrupt_manifest {
        return Err(RestoreError::CorruptManifest(manifest));
    }

    if let Some(archive) = &report.corrupt_archive {
        if report.usable_parity.is_empty() {
            error!("Archive {} is corrupt and there is no usable parity to repair it", archive);
            return Err(RestoreError::CorruptArchiveUnrepairable(archive.clone()));
        }
        warn!(
            "Archive {} is corrupt, repair will be attempted with {} parity file(s)",
            archive,
            report.usable_parity.len()
        );
    }

    if let Some(first) = corrupt_other.into_iter().next() {
        return Err(RestoreError::CorruptFile(first));
    }

    Ok(report)
}
