//! Error taxonomy for the restore pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("File missing from backup: {0}")]
    MissingFile(String),

    #[error("No archive found in backup set at {0}")]
    NoArchive(String),

    #[error("No manifest found in backup set at {0}")]
    NoManifest(String),

    #[error("Ambiguous backup set: more than one {role} ({first}, {second})")]
    AmbiguousFileSet {
        role: String,
        first: String,
        second: String,
    },

    #[error("Checksum list {list} is malformed at line {line}")]
    MalformedChecksumList { list: String, line: usize },

    #[error("Manifest {0} is corrupt")]
    CorruptManifest(String),

    #[error("Archive {0} is corrupt and no usable parity is available")]
    CorruptArchiveUnrepairable(String),

    #[error("File {0} is corrupt")]
    CorruptFile(String),

    #[error("Signature on {0} is not fully trusted")]
    UntrustedSignature(String),

    #[error("Failed to decrypt {path}: {reason}")]
    DecryptionFailure { path: String, reason: String },

    #[error("Unable to repair {path}: {reason}")]
    RepairFailure { path: String, reason: String },

    #[error("Backup lineage mismatch: expected parent {expected}, manifest has {}", .found.as_deref().unwrap_or("none"))]
    LineageMismatch {
        expected: String,
        found: Option<String>,
    },

    #[error("Archive and manifest disagree: {unexpected} unexpected member(s), {missing} missing declared file(s)")]
    ReconciliationMismatch { unexpected: usize, missing: usize },

    #[error("Invalid manifest {path}: {reason}")]
    InvalidManifest { path: String, reason: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Required tool unavailable: {0}")]
    MissingCapability(String),
}

impl RestoreError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            RestoreError::MissingCapability(_) => 255,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;
