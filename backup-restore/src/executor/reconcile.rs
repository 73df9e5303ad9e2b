//! Manifest reconciliation and restore planning.
//!
//! Before anything is extracted, the archive's members and the manifest's
//! `modified` set must match exactly. The check runs over the whole archive
//! so that every discrepancy is reported, not just the first.

use super::manifest::Manifest;
use crate::utils::errors::{RestoreError, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Check the manifest's parent reference.
///
/// With `required` set, `lastbackup` must be present and equal to it.
/// Without it, a missing `lastbackup` is only noted (older manifests lack
/// the field).
pub fn check_lineage(manifest: &Manifest, required: Option<&str>) -> Result<()> {
    match (required, manifest.lastbackup.as_deref()) {
        (Some(expected), Some(found)) if expected == found => {
            info!("Backup lineage confirmed, parent is {}", found);
            Ok(())
        }
        (Some(expected), found) => {
            error!(
                "Manifest parent {} does not match required {}",
                found.unwrap_or("<none>"),
                expected
            );
            Err(RestoreError::LineageMismatch {
                expected: expected.to_string(),
                found: found.map(str::to_string),
            })
        }
        (None, Some(found)) => {
            debug!("Manifest parent is {}", found);
            Ok(())
        }
        (None, None) => {
            info!("Manifest has no parent reference (older backup format)");
            Ok(())
        }
    }
}

/// One discrepancy between archive and manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileIssue {
    /// Archive member not declared in `modified`
    UnexpectedMember(String),
    /// `modified` entry with no archive member
    MissingDeclared(String),
}

impl fmt::Display for ReconcileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileIssue::UnexpectedMember(path) => {
                write!(f, "archive contains {} which is not in the manifest", path)
            }
            ReconcileIssue::MissingDeclared(path) => {
                write!(f, "archive is missing {} declared by the manifest", path)
            }
        }
    }
}

/// Tracks which declared files the archive has satisfied.
///
/// The manifest itself is never annotated; the satisfied flags live here.
pub struct Reconciler<'m> {
    satisfied: HashMap<&'m str, bool>,
    order: Vec<&'m str>,
    pending: usize,
    issues: Vec<ReconcileIssue>,
}

impl<'m> Reconciler<'m> {
    pub fn new(manifest: &'m Manifest) -> Self {
        let mut satisfied = HashMap::with_capacity(manifest.modified.len());
        let mut order = Vec::with_capacity(manifest.modified.len());
        for (path, _) in &manifest.modified {
            if satisfied.insert(path.as_str(), false).is_none() {
                order.push(path.as_str());
            }
        }
        Self {
            pending: order.len(),
            satisfied,
            order,
            issues: Vec::new(),
        }
    }

    /// Declared files not yet seen in the archive
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Record one archive member (as stored, without leading `/`).
    pub fn observe(&mut self, member: &str) {
        let key = format!("/{}", member.trim_start_matches("./").trim_start_matches('/'));
        match self.satisfied.get_mut(key.as_str()) {
            Some(found) if !*found => {
                *found = true;
                self.pending -= 1;
                debug!("Archive member {} matches manifest", key);
            }
            Some(_) => debug!("Archive member {} appears more than once", key),
            None => {
                let issue = ReconcileIssue::UnexpectedMember(key);
                error!("Reconciliation: {}", issue);
                self.issues.push(issue);
            }
        }
    }

    /// Finish the scan; fails if anything disagreed.
    pub fn finish(mut self) -> Result<usize> {
        for path in &self.order {
            if !self.satisfied.get(path).copied().unwrap_or(false) {
                let issue = ReconcileIssue::MissingDeclared(path.to_string());
                error!("Reconciliation: {}", issue);
                self.issues.push(issue);
            }
        }

        let unexpected = self
            .issues
            .iter()
            .filter(|i| matches!(i, ReconcileIssue::UnexpectedMember(_)))
            .count();
        let missing = self.issues.len() - unexpected;

        if unexpected > 0 || self.pending > 0 {
            return Err(RestoreError::ReconciliationMismatch { unexpected, missing });
        }
        Ok(self.order.len())
    }

    pub fn issues(&self) -> &[ReconcileIssue] {
        &self.issues
    }
}

/// Cross-check archive members against the manifest.
///
/// # Returns
/// * `Ok(usize)` - Number of declared files, all present
/// * `Err(ReconciliationMismatch)` - Extra and/or missing members
pub fn cross_check<I, S>(manifest: &Manifest, members: I) -> Result<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut reconciler = Reconciler::new(manifest);
    for member in members {
        reconciler.observe(member.as_ref());
    }
    reconciler.finish()
}

/// A rename inside the restore target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOp {
    pub from: String,
    pub to: String,
}

/// Ordered operations for one restore: deletes, then moves, then one
/// extraction of the archive.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    pub parent: Option<String>,
    pub modified: Vec<String>,
    pub deletes: Vec<String>,
    pub moves: Vec<MoveOp>,
    pub archive: Option<PathBuf>,
}

impl RestorePlan {
    /// Build the plan from the manifest. `archive` is `None` in list mode.
    pub fn from_manifest(manifest: &Manifest, archive: Option<&Path>) -> Self {
        Self {
            parent: manifest.lastbackup.clone(),
            modified: manifest.modified.iter().map(|(k, _)| k.clone()).collect(),
            deletes: manifest.deleted.clone(),
            moves: manifest
                .moved
                .iter()
                .map(|(to, entry)| MoveOp {
                    from: entry.original.clone(),
                    to: to.clone(),
                })
                .collect(),
            archive: archive.map(Path::to_path_buf),
        }
    }

    /// Human-readable listing for list mode
    pub fn listing(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RestorePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            writeln!(f, "Parent backup: {}", parent)?;
        }
        for path in &self.modified {
            writeln!(f, "Modified: {}", path)?;
        }
        for path in &self.deletes {
            writeln!(f, "Deleted: {}", path)?;
        }
        for op in &self.moves {
            writeln!(f, "Moved: {} -> {}", op.from, op.to)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> Manifest {
        Manifest::from_json(json).unwrap()
    }

    #[test]
    fn test_lineage() {
        let with_parent = manifest(r#"{"lastbackup": "b1"}"#);
        let without_parent = manifest("{}");

        assert!(check_lineage(&with_parent, Some("b1")).is_ok());
        assert!(check_lineage(&with_parent, None).is_ok());
        assert!(check_lineage(&without_parent, None).is_ok());

        let err = check_lineage(&with_parent, Some("b0")).unwrap_err();
        assert!(matches!(err, RestoreError::LineageMismatch { found: Some(_), .. }));
        let err = check_lineage(&without_parent, Some("b1")).unwrap_err();
        assert!(matches!(err, RestoreError::LineageMismatch { found: None, .. }));
    }

    #[test]
    fn test_cross_check_set_equal() {
        let m = manifest(r#"{"modified": {"/a/b.txt": {}, "/c.txt": {}}}"#);
        assert_eq!(cross_check(&m, ["c.txt", "a/b.txt"]).unwrap(), 2);
    }

    #[test]
    fn test_cross_check_missing_declared() {
        let m = manifest(r#"{"modified": {"/a/b.txt": {}, "/c.txt": {}}}"#);
        let err = cross_check(&m, ["c.txt"]).unwrap_err();
        assert!(matches!(
            err,
            RestoreError::ReconciliationMismatch { unexpected: 0, missing: 1 }
        ));
    }

    #[test]
    fn test_cross_check_reports_everything() {
        let m = manifest(r#"{"modified": {"/a": {}, "/b": {}}}"#);
        let mut reconciler = Reconciler::new(&m);
        assert_eq!(reconciler.pending(), 2);
        for member in ["a", "x", "y"] {
            reconciler.observe(member);
        }
        assert_eq!(reconciler.pending(), 1);
        assert_eq!(reconciler.issues().len(), 2);

        let err = reconciler.finish().unwrap_err();
        assert!(matches!(
            err,
            RestoreError::ReconciliationMismatch { unexpected: 2, missing: 1 }
        ));
    }

    #[test]
    fn test_duplicate_member_counts_once() {
        let m = manifest(r#"{"modified": {"/a": {}}}"#);
        assert_eq!(cross_check(&m, ["a", "./a"]).unwrap(), 1);
    }

    #[test]
    fn test_empty_manifest_and_archive() {
        let m = manifest("{}");
        assert_eq!(cross_check(&m, Vec::<String>::new()).unwrap(), 0);
    }

    #[test]
    fn test_plan_listing() {
        let m = manifest(
            r#"{
                "lastbackup": "b1",
                "modified": {"/a.txt": {}},
                "deleted": ["/gone.txt"],
                "moved": {"/new.txt": {"original": "/old.txt"}}
            }"#,
        );
        let plan = RestorePlan::from_manifest(&m, None);
        assert_eq!(
            plan.listing(),
            "Parent backup: b1\nModified: /a.txt\nDeleted: /gone.txt\nMoved: /old.txt -> /new.txt\n"
        );
        assert!(plan.archive.is_none());
    }
}
