//! Applies a restore plan to a target directory.
//!
//! Deletes and moves are best effort: each one yields an `FsOutcome` and a
//! failure is logged, never fatal. Extraction errors are fatal. Nothing is
//! rolled back.

use crate::archive;
use crate::executor::reconcile::RestorePlan;
use crate::utils::errors::Result;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of a single delete or move
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsOutcome {
    Applied,
    NotFound,
    PermissionDenied,
    /// The manifest path would resolve outside the target
    OutsideTarget,
    Failed(String),
}

impl FsOutcome {
    fn from_io(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => FsOutcome::NotFound,
            io::ErrorKind::PermissionDenied => FsOutcome::PermissionDenied,
            _ => FsOutcome::Failed(e.to_string()),
        }
    }
}

/// Counts of what `apply_plan` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub deleted: usize,
    pub moved: usize,
    pub extracted: usize,
    /// Deletes and moves that did not apply
    pub skipped: usize,
}

/// Resolve a `/`-rooted manifest path under `target`.
///
/// Returns `None` for paths that would leave the target or name the target
/// itself.
pub fn resolve_in_target(target: &Path, manifest_path: &str) -> Option<PathBuf> {
    let relative = Path::new(manifest_path.trim_start_matches('/'));
    let mut resolved = target.to_path_buf();
    let mut depth = 0usize;

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    (depth > 0).then_some(resolved)
}

/// Remove a file or directory tree from the target.
pub fn delete_path(target: &Path, manifest_path: &str) -> FsOutcome {
    let Some(path) = resolve_in_target(target, manifest_path) else {
        return FsOutcome::OutsideTarget;
    };

    let result = match fs::symlink_metadata(&path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
        Ok(_) => fs::remove_file(&path),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => FsOutcome::Applied,
        Err(e) => FsOutcome::from_io(&e),
    }
}

/// Rename `original` to `destination` inside the target, creating the
/// destination's parent directories.
pub fn move_path(target: &Path, original: &str, destination: &str) -> FsOutcome {
    let (Some(from), Some(to)) = (
        resolve_in_target(target, original),
        resolve_in_target(target, destination),
    ) else {
        return FsOutcome::OutsideTarget;
    };

    if let Err(e) = fs::symlink_metadata(&from) {
        return FsOutcome::from_io(&e);
    }

    if let Some(parent) = to.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return FsOutcome::from_io(&e);
        }
    }

    match fs::rename(&from, &to) {
        Ok(()) => FsOutcome::Applied,
        Err(e) => FsOutcome::from_io(&e),
    }
}

/// Apply `plan` to `target`: deletes, then moves, then extraction.
///
/// # Arguments
/// * `plan` - Reconciled plan; its archive must be the unwrapped archive
/// * `target` - Restore target directory, created if missing
///
/// # Returns
/// * `Ok(ApplySummary)` - What was applied and skipped
/// * `Err(RestoreError)` - Extraction failed
pub fn apply_plan(plan: &RestorePlan, target: &Path) -> Result<ApplySummary> {
    fs::create_dir_all(target)?;
    let mut summary = ApplySummary::default();

    for path in &plan.deletes {
        match delete_path(target, path) {
            FsOutcome::Applied => {
                debug!("Deleted {}", path);
                summary.deleted += 1;
            }
            outcome => {
                warn!("Could not delete {}: {:?}", path, outcome);
                summary.skipped += 1;
            }
        }
    }

    for op in &plan.moves {
        match move_path(target, &op.from, &op.to) {
            FsOutcome::Applied => {
                debug!("Moved {} -> {}", op.from, op.to);
                summary.moved += 1;
            }
            outcome => {
                warn!("Could not move {} -> {}: {:?}", op.from, op.to, outcome);
                summary.skipped += 1;
            }
        }
    }

    if let Some(archive_path) = &plan.archive {
        info!("Extracting {} into {}", archive_path.display(), target.display());
        summary.extracted = archive::extract_all(archive_path, target)?;
    }

    info!(
        "Applied restore: {} deleted, {} moved, {} extracted, {} skipped",
        summary.deleted, summary.moved, summary.extracted, summary.skipped
    );
    Ok(summary)
}
