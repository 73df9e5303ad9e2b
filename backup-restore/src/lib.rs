//! Backup Restore Library
//!
//! Restores one backup point from an archival backup set: integrity checks,
//! signature verification and decryption, parity repair, manifest
//! reconciliation and extraction.

pub mod archive;
pub mod config;
pub mod crypto;
pub mod executor;
pub mod fs;
pub mod integrity;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{RestoreExecutor, RestoreJob, RestoreMode, RestoreResult};
pub use utils::errors::{RestoreError, Result};
