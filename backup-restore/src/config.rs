//! Configuration management for the restore tool.
//!
//! Loads configuration from a TOML file. The decryption passphrase can be
//! overridden through `BACKUP_RESTORE_PASSPHRASE`.

use crate::utils::errors::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides `security.passphrase`.
pub const PASSPHRASE_ENV: &str = "BACKUP_RESTORE_PASSPHRASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Passphrase for encrypted backup files
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// OpenPGP binary used for verification and decryption
    #[serde(default = "default_gpg")]
    pub gpg: String,

    /// Alternative keyring directory (passed as --homedir)
    #[serde(default)]
    pub gpg_home: Option<PathBuf>,

    /// Parity repair binary
    #[serde(default = "default_par2")]
    pub par2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default values
fn default_gpg() -> String {
    "gpg".to_string()
}

fn default_par2() -> String {
    "par2".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            gpg: default_gpg(),
            gpg_home: None,
            par2: default_par2(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RestoreError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::parse(&content)
            .map_err(|e| RestoreError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
            if !passphrase.is_empty() {
                self.security.passphrase = Some(passphrase);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.tools.gpg, "gpg");
        assert_eq!(config.tools.par2, "par2");
        assert_eq!(config.log.level, "info");
        assert!(config.security.passphrase.is_none());
        assert!(config.log.file.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [security]
            passphrase = "hunter2"

            [tools]
            gpg = "/usr/local/bin/gpg2"
            gpg_home = "/etc/backup/gnupg"
            par2 = "par2cmdline"

            [log]
            level = "debug"
            file = "/var/log/restore.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.security.passphrase.as_deref(), Some("hunter2"));
        assert_eq!(config.tools.gpg, "/usr/local/bin/gpg2");
        assert_eq!(config.tools.gpg_home, Some(PathBuf::from("/etc/backup/gnupg")));
        assert_eq!(config.tools.par2, "par2cmdline");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.file, Some(PathBuf::from("/var/log/restore.log")));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(Config::parse("[security\npassphrase = 1").is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file(Path::new("/nonexistent/restore.toml")).unwrap_err();
        assert!(matches!(err, RestoreError::Config(_)));
    }
}
