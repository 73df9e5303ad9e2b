//! Backup file set discovery.
//!
//! Given any one file of a backup, finds its siblings (same basename
//! prefix) and classifies each of them once, by role and envelope layers.

use crate::crypto::envelope::{self, EnvelopeLayer};
use crate::utils::errors::{RestoreError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Fixed name of the checksum list written by older producers.
pub const LEGACY_CHECKSUM_LIST: &str = "filelist.txt";

/// Suffix of the current checksum list format.
pub const CHECKSUM_LIST_SUFFIX: &str = ".lst";

/// Role a file plays within a backup set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    Manifest,
    Archive,
    Parity,
    ChecksumList,
}

impl FileRole {
    /// Classify a file name. Parity is checked before archive because
    /// parity files embed the archive name (`x.tar.gpg.par2`).
    pub fn classify(name: &str) -> Option<Self> {
        if name == LEGACY_CHECKSUM_LIST || name.ends_with(CHECKSUM_LIST_SUFFIX) {
            Some(FileRole::ChecksumList)
        } else if name.contains(".par2") {
            Some(FileRole::Parity)
        } else if name.contains(".json") {
            Some(FileRole::Manifest)
        } else if name.contains(".tar") {
            Some(FileRole::Archive)
        } else {
            None
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileRole::Manifest => "manifest",
            FileRole::Archive => "archive",
            FileRole::Parity => "parity file",
            FileRole::ChecksumList => "checksum list",
        };
        f.write_str(s)
    }
}

/// One file of a backup set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMember {
    /// File name within the base directory
    pub name: String,

    /// Role, if the name matches one
    pub role: Option<FileRole>,

    /// Envelope layers, outermost first
    pub layers: Vec<EnvelopeLayer>,
}

impl BackupMember {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            role: FileRole::classify(&name),
            layers: envelope::layers(&name),
            name,
        }
    }

    /// Name with every envelope layer removed
    pub fn plain_name(&self) -> &str {
        envelope::plain_name(&self.name)
    }

    pub fn is_enveloped(&self) -> bool {
        !self.layers.is_empty()
    }
}

/// Which checksum list representation is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumListSource {
    Current(String),
    Legacy(String),
}

impl ChecksumListSource {
    pub fn name(&self) -> &str {
        match self {
            ChecksumListSource::Current(name) | ChecksumListSource::Legacy(name) => name,
        }
    }
}

/// The files believed to make up one backup point
#[derive(Debug, Clone)]
pub struct BackupFileSet {
    /// Directory containing every member
    pub base_path: PathBuf,

    /// Every selected file, classified, sorted by name
    pub members: Vec<BackupMember>,

    pub manifest: Option<BackupMember>,
    pub archive: BackupMember,
    pub parity: Vec<BackupMember>,
    pub checksum_list: Option<ChecksumListSource>,
}

impl BackupFileSet {
    /// Build a file set from already-selected member names.
    pub fn from_members(base_path: PathBuf, names: Vec<String>) -> Result<Self> {
        let mut members: Vec<BackupMember> = names.into_iter().map(BackupMember::new).collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));

        let mut manifest: Option<BackupMember> = None;
        let mut archive: Option<BackupMember> = None;
        let mut parity: Vec<BackupMember> = Vec::new();
        let mut current_list: Option<String> = None;
        let mut legacy_list: Option<String> = None;

        for member in &members {
            match member.role {
                Some(FileRole::Manifest) => pick_single(&mut manifest, member, FileRole::Manifest)?,
                Some(FileRole::Archive) => pick_single(&mut archive, member, FileRole::Archive)?,
                Some(FileRole::Parity) => parity.push(member.clone()),
                Some(FileRole::ChecksumList) => {
                    if member.name == LEGACY_CHECKSUM_LIST {
                        legacy_list = Some(member.name.clone());
                    } else if let Some(existing) = &current_list {
                        return Err(RestoreError::AmbiguousFileSet {
                            role: FileRole::ChecksumList.to_string(),
                            first: existing.clone(),
                            second: member.name.clone(),
                        });
                    } else {
                        current_list = Some(member.name.clone());
                    }
                }
                None => debug!("Ignoring unrecognized file {}", member.name),
            }
        }

        let archive =
            archive.ok_or_else(|| RestoreError::NoArchive(base_path.display().to_string()))?;

        let checksum_list = match (current_list, legacy_list) {
            (Some(current), legacy) => {
                if legacy.is_some() {
                    debug!("Ignoring {} in favour of {}", LEGACY_CHECKSUM_LIST, current);
                }
                Some(ChecksumListSource::Current(current))
            }
            (None, Some(legacy)) => {
                warn!(
                    "Using legacy checksum list {}; newer backups ship a {} file",
                    legacy, CHECKSUM_LIST_SUFFIX
                );
                Some(ChecksumListSource::Legacy(legacy))
            }
            (None, None) => None,
        };

        Ok(Self {
            base_path,
            members,
            manifest,
            archive,
            parity,
            checksum_list,
        })
    }

    /// Absolute path of a member name
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    /// True when any member needs the OpenPGP capability
    pub fn needs_crypto(&self) -> bool {
        self.members.iter().any(BackupMember::is_enveloped)
    }
}

/// Keep one member per role. Names that reduce to the same plain name are
/// the same logical file (for example `x.tar.gpg` and an `x.tar` left over
/// from an earlier run); the one with the most layers wins.
fn pick_single(slot: &mut Option<BackupMember>, member: &BackupMember, role: FileRole) -> Result<()> {
    let Some(existing) = slot.as_ref() else {
        *slot = Some(member.clone());
        return Ok(());
    };

    if existing.plain_name() != member.plain_name() {
        return Err(RestoreError::AmbiguousFileSet {
            role: role.to_string(),
            first: existing.name.clone(),
            second: member.name.clone(),
        });
    }

    if member.layers.len() > existing.layers.len() {
        debug!("Preferring {} over {}", member.name, existing.name);
        *slot = Some(member.clone());
    }
    Ok(())
}

/// Basename shared by all files of the backup: the file name up to the
/// first `.`.
pub fn basename_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let base = name.split('.').next().unwrap_or(name);
    Some(base.to_string())
}

/// Discover the backup file set that `path` belongs to.
///
/// # Arguments
/// * `path` - Any one file of the backup
///
/// # Returns
/// * `Ok(BackupFileSet)` - Classified siblings
/// * `Err(RestoreError)` - If the file is missing, the directory cannot be
///   read, or the set has no archive
pub fn discover(path: &Path) -> Result<BackupFileSet> {
    if !path.exists() {
        return Err(RestoreError::MissingFile(path.display().to_string()));
    }

    let basename =
        basename_of(path).ok_or_else(|| RestoreError::MissingFile(path.display().to_string()))?;
    let base_path = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut names = Vec::new();
    for entry in WalkDir::new(&base_path).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            RestoreError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.starts_with(&basename) || name == LEGACY_CHECKSUM_LIST {
            names.push(name.to_string());
        }
    }

    debug!(
        "Found {} file(s) for backup {} in {}",
        names.len(),
        basename,
        base_path.display()
    );

    BackupFileSet::from_members(base_path, names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_roles() {
        assert_eq!(FileRole::classify("b.json.gpg.sig"), Some(FileRole::Manifest));
        assert_eq!(FileRole::classify("b.tar.gz.gpg"), Some(FileRole::Archive));
        assert_eq!(FileRole::classify("b.tar.gpg.par2"), Some(FileRole::Parity));
        assert_eq!(FileRole::classify("b.tar.gpg.vol000+01.par2"), Some(FileRole::Parity));
        assert_eq!(FileRole::classify("b.lst"), Some(FileRole::ChecksumList));
        assert_eq!(FileRole::classify("filelist.txt"), Some(FileRole::ChecksumList));
        assert_eq!(FileRole::classify("b.log"), None);
    }

    #[test]
    fn test_from_members_assigns_roles() -> Result<()> {
        let set = BackupFileSet::from_members(
            PathBuf::from("/backups"),
            names(&[
                "b.tar.gpg",
                "b.json.gpg",
                "b.tar.gpg.par2",
                "b.tar.gpg.vol0+1.par2",
                "b.lst",
            ]),
        )?;

        assert_eq!(set.archive.name, "b.tar.gpg");
        assert_eq!(set.manifest.as_ref().map(|m| m.name.as_str()), Some("b.json.gpg"));
        assert_eq!(set.parity.len(), 2);
        assert_eq!(set.checksum_list, Some(ChecksumListSource::Current("b.lst".to_string())));
        assert!(set.needs_crypto());
        assert_eq!(set.path_of("b.lst"), PathBuf::from("/backups/b.lst"));
        Ok(())
    }

    #[test]
    fn test_archive_is_mandatory() {
        let err = BackupFileSet::from_members(PathBuf::from("."), names(&["b.json", "b.lst"]))
            .unwrap_err();
        assert!(matches!(err, RestoreError::NoArchive(_)));
    }

    #[test]
    fn test_new_checksum_list_preferred_over_legacy() -> Result<()> {
        let set = BackupFileSet::from_members(
            PathBuf::from("."),
            names(&["b.tar", "filelist.txt", "b.lst"]),
        )?;
        assert_eq!(set.checksum_list, Some(ChecksumListSource::Current("b.lst".to_string())));

        let set = BackupFileSet::from_members(PathBuf::from("."), names(&["b.tar", "filelist.txt"]))?;
        assert_eq!(
            set.checksum_list,
            Some(ChecksumListSource::Legacy("filelist.txt".to_string()))
        );
        assert!(!set.needs_crypto());
        Ok(())
    }

    #[test]
    fn test_leftover_plaintext_is_same_logical_file() -> Result<()> {
        let set = BackupFileSet::from_members(
            PathBuf::from("."),
            names(&["b.tar", "b.tar.gpg", "b.json", "b.json.gpg.sig", "b.json.gpg"]),
        )?;
        assert_eq!(set.archive.name, "b.tar.gpg");
        assert_eq!(set.manifest.map(|m| m.name), Some("b.json.gpg.sig".to_string()));
        Ok(())
    }

    #[test]
    fn test_two_archives_are_ambiguous() {
        let err = BackupFileSet::from_members(PathBuf::from("."), names(&["b.tar", "b-old.tar"]))
            .unwrap_err();
        assert!(matches!(err, RestoreError::AmbiguousFileSet { .. }));
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename_of(Path::new("/x/daily-20240101.tar.gpg")).as_deref(), Some("daily-20240101"));
        assert_eq!(basename_of(Path::new("plain")).as_deref(), Some("plain"));
    }

    #[test]
    fn test_discover_selects_siblings() -> Result<()> {
        let dir = TempDir::new()?;
        for name in ["b1.tar", "b1.json", "b1.lst", "filelist.txt", "b2.tar", "notes.txt"] {
            fs::write(dir.path().join(name), b"x")?;
        }
        fs::create_dir(dir.path().join("b1.dir"))?;

        let set = discover(&dir.path().join("b1.json"))?;
        let found: Vec<&str> = set.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(found, vec!["b1.json", "b1.lst", "b1.tar", "filelist.txt"]);
        assert_eq!(set.base_path, dir.path());
        Ok(())
    }

    #[test]
    fn test_discover_missing_input() {
        let err = discover(Path::new("/nonexistent/b1.tar")).unwrap_err();
        assert!(matches!(err, RestoreError::MissingFile(_)));
    }
}
