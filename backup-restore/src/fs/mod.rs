//! Filesystem side of a restore: locating backup files and applying plans.

pub mod apply;
pub mod discovery;

pub use apply::{apply_plan, ApplySummary, FsOutcome};
pub use discovery::{discover, BackupFileSet, BackupMember, FileRole};
