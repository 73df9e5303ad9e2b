//! Parity-based repair of a corrupted archive.
//!
//! The repair itself is delegated to an external tool; this module only
//! decides when to call it and what to hand over.

use crate::utils::errors::{RestoreError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

/// Something that can rebuild a damaged file in place from parity data.
pub trait ParityRepair {
    fn repair(&self, target: &Path, parity: &[PathBuf]) -> Result<()>;
}

/// `par2` command line backend
#[derive(Debug, Clone)]
pub struct Par2Repair {
    program: String,
}

impl Par2Repair {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ParityRepair for Par2Repair {
    fn repair(&self, target: &Path, parity: &[PathBuf]) -> Result<()> {
        let index = index_file(parity).ok_or_else(|| RestoreError::RepairFailure {
            path: target.display().to_string(),
            reason: "no parity files".to_string(),
        })?;

        debug!("Running {} repair with {}", self.program, index.display());
        let output = Command::new(&self.program)
            .arg("repair")
            .arg("-q")
            .arg(index)
            .arg(target)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RestoreError::RepairFailure {
                path: target.display().to_string(),
                reason: format!("cannot run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(RestoreError::RepairFailure {
                path: target.display().to_string(),
                reason: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

/// The par2 index file: the one without a `.vol` recovery-volume marker,
/// falling back to the first file given.
pub fn index_file(parity: &[PathBuf]) -> Option<&Path> {
    parity
        .iter()
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.contains(".vol"))
        })
        .or_else(|| parity.first())
        .map(PathBuf::as_path)
}

/// Repair `archive` in place using the unwrapped parity files.
///
/// Any failure means the parity material was not enough to rebuild the
/// archive; the caller must abort. A successful repair is trusted without
/// re-hashing.
pub fn repair_archive(repairer: &dyn ParityRepair, archive: &Path, parity: &[PathBuf]) -> Result<()> {
    info!(
        "Repairing {} using {} parity file(s)",
        archive.display(),
        parity.len()
    );

    match repairer.repair(archive, parity) {
        Ok(()) => {
            info!("Repaired {}", archive.display());
            Ok(())
        }
        Err(e) => {
            error!("Unable to repair {}: {}", archive.display(), e);
            Err(match e {
                RestoreError::RepairFailure { .. } => e,
                other => RestoreError::RepairFailure {
                    path: archive.display().to_string(),
                    reason: other.to_string(),
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingRepair;

    impl ParityRepair for FailingRepair {
        fn repair(&self, _target: &Path, _parity: &[PathBuf]) -> Result<()> {
            Err(RestoreError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_index_file_skips_volumes() {
        let parity = vec![
            PathBuf::from("/b/b.tar.vol000+01.par2"),
            PathBuf::from("/b/b.tar.par2"),
        ];
        assert_eq!(index_file(&parity), Some(Path::new("/b/b.tar.par2")));
    }

    #[test]
    fn test_index_file_fallback() {
        let parity = vec![PathBuf::from("/b/b.tar.vol000+01.par2")];
        assert_eq!(index_file(&parity), Some(Path::new("/b/b.tar.vol000+01.par2")));
        assert_eq!(index_file(&[]), None);
    }

    #[test]
    fn test_failures_become_repair_failure() {
        let err = repair_archive(&FailingRepair, Path::new("b.tar"), &[PathBuf::from("b.tar.par2")])
            .unwrap_err();
        assert!(matches!(err, RestoreError::RepairFailure { .. }));
    }

    #[test]
    fn test_missing_par2_binary_is_repair_failure() {
        let repair = Par2Repair::new("definitely-not-a-real-par2-binary");
        let err = repair
            .repair(Path::new("b.tar"), &[PathBuf::from("b.tar.par2")])
            .unwrap_err();
        assert!(matches!(err, RestoreError::RepairFailure { .. }));
    }
}
