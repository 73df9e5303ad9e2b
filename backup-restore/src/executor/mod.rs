//! Restore job executor - Orchestrates the restore pipeline.
//!
//! Stages run strictly in order and never re-enter an earlier one:
//! - File set discovery
//! - Checksum validation
//! - Signature verification and decryption
//! - Manifest load and lineage check
//! - Parity repair of the archive
//! - Archive / manifest reconciliation
//! - Deletes, moves and extraction into the target

pub mod manifest;
pub mod reconcile;

use crate::archive;
use crate::crypto::{CryptoBackend, Unwrapper};
use crate::fs::apply::{apply_plan, ApplySummary};
use crate::fs::discovery::{self, BackupFileSet};
use crate::integrity::checksum::{self, ChecksumReport};
use crate::integrity::parity::{self, ParityRepair};
use crate::utils::errors::{RestoreError, Result};
use reconcile::RestorePlan;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What a run is asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreMode {
    /// Integrity checks, unwrap and lineage only
    Verify,
    /// Print the manifest's plan without touching the archive
    List,
    /// Full dry run including archive reconciliation
    Validate,
    /// Everything, writing into `target`
    Restore { target: PathBuf },
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreMode::Verify => f.write_str("verify"),
            RestoreMode::List => f.write_str("list"),
            RestoreMode::Validate => f.write_str("validate"),
            RestoreMode::Restore { target } => write!(f, "restore into {}", target.display()),
        }
    }
}

/// Restore job configuration
#[derive(Debug, Clone)]
pub struct RestoreJob {
    /// Any one file of the backup set
    pub backup_file: PathBuf,
    pub mode: RestoreMode,
    /// Downgrade non-essential failures to warnings
    pub force: bool,
    /// Parent backup the manifest must reference
    pub required_parent: Option<String>,
}

/// Restore execution result
#[derive(Debug)]
pub struct RestoreResult {
    pub mode: RestoreMode,
    pub plan: Option<RestorePlan>,
    /// Files whose checksum did not match
    pub corrupt: Vec<String>,
    /// Files left wrapped because unwrapping failed under force
    pub skipped: Vec<String>,
    pub repaired: bool,
    pub summary: Option<ApplySummary>,
    pub elapsed: Duration,
}

impl RestoreResult {
    fn new(mode: RestoreMode) -> Self {
        Self {
            mode,
            plan: None,
            corrupt: Vec::new(),
            skipped: Vec::new(),
            repaired: false,
            summary: None,
            elapsed: Duration::ZERO,
        }
    }
}

/// Main restore executor
pub struct RestoreExecutor<'a> {
    crypto: &'a dyn CryptoBackend,
    repairer: &'a dyn ParityRepair,
    passphrase: Option<String>,
}

impl<'a> RestoreExecutor<'a> {
    pub fn new(
        crypto: &'a dyn CryptoBackend,
        repairer: &'a dyn ParityRepair,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            crypto,
            repairer,
            passphrase,
        }
    }

    /// Execute a restore job
    ///
    /// # Arguments
    /// * `job` - Backup file, mode and flags
    ///
    /// # Returns
    /// * `Ok(RestoreResult)` - Every stage the mode requires succeeded
    /// * `Err(RestoreError)` - The first fatal failure; later stages did not run
    pub fn execute(&self, job: &RestoreJob) -> Result<RestoreResult> {
        let start_time = Instant::now();
        info!("Starting {} of {}", job.mode, job.backup_file.display());

        let mut result = RestoreResult::new(job.mode.clone());

        let set = discovery::discover(&job.backup_file)?;
        info!(
            "Backup set in {}: archive {}, manifest {}, {} parity file(s)",
            set.base_path.display(),
            set.archive.name,
            set.manifest.as_ref().map_or("<none>", |m| m.name.as_str()),
            set.parity.len()
        );

        if set.needs_crypto() {
            self.crypto.ensure_available()?;
        }

        let report = match &set.checksum_list {
            Some(list) => checksum::validate(&set.base_path, list.name(), job.force)?,
            None => {
                warn!("No checksum list in backup set, skipping integrity check");
                ChecksumReport::default()
            }
        };
        result.corrupt = report.corrupt.iter().cloned().collect();

        let unwrapper = Unwrapper::new(self.crypto, self.passphrase.as_deref());
        let parity_paths = self.unwrap_auxiliary(&unwrapper, &set, &report, job.force, &mut result)?;

        let Some(manifest_member) = &set.manifest else {
            if job.mode == RestoreMode::Verify && job.required_parent.is_none() {
                warn!("No manifest in backup set, nothing more to do");
                return Ok(finish(result, start_time));
            }
            error!("Backup set in {} has no manifest", set.base_path.display());
            return Err(RestoreError::NoManifest(set.base_path.display().to_string()));
        };

        let manifest_path = unwrapper.unwrap(&set.path_of(&manifest_member.name))?;
        let manifest = manifest::load_manifest(&manifest_path)?;
        info!(
            "Manifest {}: {} modified, {} deleted, {} moved",
            manifest_path.display(),
            manifest.modified.len(),
            manifest.deleted.len(),
            manifest.moved.len()
        );
        reconcile::check_lineage(&manifest, job.required_parent.as_deref())?;

        match &job.mode {
            RestoreMode::Verify => {
                info!("Backup verified, nothing more to do");
                return Ok(finish(result, start_time));
            }
            RestoreMode::List => {
                result.plan = Some(RestorePlan::from_manifest(&manifest, None));
                return Ok(finish(result, start_time));
            }
            RestoreMode::Validate | RestoreMode::Restore { .. } => {}
        }

        let archive_path = set.path_of(&set.archive.name);
        if let Some(corrupt_name) = &report.corrupt_archive {
            if let RestoreMode::Restore { .. } = job.mode {
                let usable: Vec<PathBuf> = report
                    .usable_parity
                    .iter()
                    .filter_map(|name| parity_paths.get(name).cloned())
                    .collect();
                // repair the file the checksum list flagged, not the outer envelope
                parity::repair_archive(self.repairer, &set.path_of(corrupt_name), &dedup(usable))?;
                result.repaired = true;
            } else {
                warn!(
                    "Archive {} is corrupt; a restore would attempt repair with {} parity file(s)",
                    corrupt_name,
                    report.usable_parity.len()
                );
                result.plan = Some(RestorePlan::from_manifest(&manifest, None));
                return Ok(finish(result, start_time));
            }
        }

        let plain_archive = unwrapper.unwrap(&archive_path)?;
        let members = archive::list_members(&plain_archive)?;
        let declared = reconcile::cross_check(&manifest, &members)?;
        info!(
            "Archive {} matches manifest ({} file(s))",
            plain_archive.display(),
            declared
        );

        let plan = RestorePlan::from_manifest(&manifest, Some(&plain_archive));

        if let RestoreMode::Restore { target } = &job.mode {
            result.summary = Some(apply_plan(&plan, target)?);
        } else {
            info!("Validation complete, no changes written");
        }
        result.plan = Some(plan);

        Ok(finish(result, start_time))
    }

    /// Unwrap parity and unclassified members.
    ///
    /// Returns the unwrapped path of each parity member by name. Corrupt
    /// files are left alone.
    fn unwrap_auxiliary(
        &self,
        unwrapper: &Unwrapper<'_>,
        set: &BackupFileSet,
        report: &ChecksumReport,
        force: bool,
        result: &mut RestoreResult,
    ) -> Result<HashMap<String, PathBuf>> {
        let mut parity_paths = HashMap::new();

        for member in &set.parity {
            if report.is_corrupt(&member.name) {
                debug!("Not unwrapping corrupt parity file {}", member.name);
                continue;
            }
            if let Some(path) = unwrap_tolerant(unwrapper, &set.path_of(&member.name), force, result)? {
                parity_paths.insert(member.name.clone(), path);
            }
        }

        let unclassified = set
            .members
            .iter()
            .filter(|m| m.role.is_none() && m.is_enveloped());
        for member in unclassified {
            if report.is_corrupt(&member.name) {
                continue;
            }
            unwrap_tolerant(unwrapper, &set.path_of(&member.name), force, result)?;
        }

        Ok(parity_paths)
    }
}

/// Unwrap a non-essential file. Under force, signature and decryption
/// failures skip the file instead of aborting.
fn unwrap_tolerant(
    unwrapper: &Unwrapper<'_>,
    path: &Path,
    force: bool,
    result: &mut RestoreResult,
) -> Result<Option<PathBuf>> {
    match unwrapper.unwrap(path) {
        Ok(plain) => Ok(Some(plain)),
        Err(e @ (RestoreError::UntrustedSignature(_) | RestoreError::DecryptionFailure { .. }))
            if force =>
        {
            warn!("Skipping {}: {} (forced)", path.display(), e);
            result.skipped.push(file_label(path));
            Ok(None)
        }
        Err(e) => {
            error!("Cannot unwrap {}: {}", path.display(), e);
            Err(e)
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn dedup(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths.dedup();
    paths
}

fn finish(mut result: RestoreResult, start_time: Instant) -> RestoreResult {
    result.elapsed = start_time.elapsed();
    info!(
        "Finished {} in {:.2}s ({} corrupt, {} skipped)",
        result.mode,
        result.elapsed.as_secs_f64(),
        result.corrupt.len(),
        result.skipped.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Verification;
    use std::fs;
    use tempfile::TempDir;

    struct NoCrypto;

    impl CryptoBackend for NoCrypto {
        fn ensure_available(&self) -> Result<()> {
            Err(RestoreError::MissingCapability("gpg".to_string()))
        }

        fn verify(&self, _signature: &Path, _payload: Option<&Path>) -> Result<Verification> {
            Err(RestoreError::MissingCapability("gpg".to_string()))
        }

        fn decrypt(&self, _input: &Path, _output: &Path, _passphrase: Option<&str>) -> Result<()> {
            Err(RestoreError::MissingCapability("gpg".to_string()))
        }
    }

    struct NoRepair;

    impl ParityRepair for NoRepair {
        fn repair(&self, target: &Path, _parity: &[PathBuf]) -> Result<()> {
            Err(RestoreError::RepairFailure {
                path: target.display().to_string(),
                reason: "not available".to_string(),
            })
        }
    }

    fn job(file: PathBuf, mode: RestoreMode) -> RestoreJob {
        RestoreJob {
            backup_file: file,
            mode,
            force: false,
            required_parent: None,
        }
    }

    #[test]
    fn test_restore_job_creation() {
        let job = job(
            PathBuf::from("/backups/daily.tar"),
            RestoreMode::Restore {
                target: PathBuf::from("/restore"),
            },
        );
        assert!(!job.force);
        assert_eq!(job.mode.to_string(), "restore into /restore");
        assert_eq!(RestoreMode::List.to_string(), "list");
    }

    #[test]
    fn test_verify_plain_set_without_manifest() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("b.tar"), b"not checked")?;

        let executor = RestoreExecutor::new(&NoCrypto, &NoRepair, None);
        let result = executor.execute(&job(dir.path().join("b.tar"), RestoreMode::Verify))?;
        assert!(result.plan.is_none());
        assert!(result.corrupt.is_empty());
        Ok(())
    }

    #[test]
    fn test_list_requires_manifest() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("b.tar"), b"")?;

        let executor = RestoreExecutor::new(&NoCrypto, &NoRepair, None);
        let err = executor
            .execute(&job(dir.path().join("b.tar"), RestoreMode::List))
            .unwrap_err();
        assert!(matches!(err, RestoreError::NoManifest(_)));
        Ok(())
    }

    #[test]
    fn test_enveloped_set_needs_crypto_tool() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("b.tar.gpg"), b"")?;
        fs::write(dir.path().join("b.json"), b"{}")?;

        let executor = RestoreExecutor::new(&NoCrypto, &NoRepair, None);
        let err = executor
            .execute(&job(dir.path().join("b.json"), RestoreMode::List))
            .unwrap_err();
        assert_eq!(err.exit_code(), 255);
        Ok(())
    }

    #[test]
    fn test_list_returns_plan() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("b.tar"), b"")?;
        fs::write(
            dir.path().join("b.json"),
            br#"{"lastbackup": "a", "deleted": ["/x"]}"#,
        )?;

        let executor = RestoreExecutor::new(&NoCrypto, &NoRepair, None);
        let result = executor.execute(&job(dir.path().join("b.tar"), RestoreMode::List))?;
        let plan = result.plan.expect("list mode yields a plan");
        assert_eq!(plan.parent.as_deref(), Some("a"));
        assert_eq!(plan.deletes, vec!["/x".to_string()]);
        assert!(plan.archive.is_none());
        Ok(())
    }
}
