//! Layer-by-layer unwrapping of signed and encrypted backup files.

use super::envelope::{self, EnvelopeLayer};
use super::gpg::CryptoBackend;
use crate::utils::errors::{RestoreError, Result};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Peels envelope layers off backup files.
///
/// The passphrase is handed in by the caller; nothing here reads global
/// configuration.
pub struct Unwrapper<'a> {
    backend: &'a dyn CryptoBackend,
    passphrase: Option<&'a str>,
}

impl<'a> Unwrapper<'a> {
    pub fn new(backend: &'a dyn CryptoBackend, passphrase: Option<&'a str>) -> Self {
        Self {
            backend,
            passphrase,
        }
    }

    /// Check the outermost signature layer of `path`.
    ///
    /// Names without a signature suffix pass vacuously. A signature passes
    /// only when it is good and the signing key is fully trusted.
    pub fn verify_signature(&self, path: &Path) -> Result<bool> {
        let name = file_name(path)?;
        let Some((layer, stripped)) = envelope::strip_layer(name) else {
            return Ok(true);
        };
        if !layer.is_signature() {
            return Ok(true);
        }

        let payload = path.with_file_name(stripped);
        let payload = payload.is_file().then_some(payload.as_path());
        let verification = self.backend.verify(path, payload)?;

        if verification.is_fully_trusted() {
            debug!(
                "Signature on {} verified (key {})",
                path.display(),
                verification.key_id.as_deref().unwrap_or("unknown")
            );
            Ok(true)
        } else {
            warn!(
                "Signature on {} rejected: valid={}, trust={:?}, key={}",
                path.display(),
                verification.valid,
                verification.trust,
                verification.key_id.as_deref().unwrap_or("unknown")
            );
            Ok(false)
        }
    }

    /// Peel every layer off `path` and return the plain file.
    ///
    /// Decrypted output is written next to the original, which is left in
    /// place. A plain name is returned unchanged.
    pub fn unwrap(&self, path: &Path) -> Result<PathBuf> {
        let original = file_name(path)?.to_string();
        let mut current = path.to_path_buf();
        let mut produced: HashSet<PathBuf> = HashSet::new();

        loop {
            let name = file_name(&current)?;
            let Some((layer, stripped)) = envelope::strip_layer(name) else {
                break;
            };
            let target = current.with_file_name(stripped);

            match layer {
                EnvelopeLayer::Encrypted => {
                    remove_existing(&target)?;
                    info!("Decrypting {}", current.display());
                    self.backend
                        .decrypt(&current, &target, self.passphrase)
                        .map_err(|e| match e {
                            RestoreError::DecryptionFailure { .. }
                            | RestoreError::MissingCapability(_) => e,
                            other => RestoreError::DecryptionFailure {
                                path: current.display().to_string(),
                                reason: other.to_string(),
                            },
                        })?;
                    if !target.is_file() {
                        return Err(RestoreError::DecryptionFailure {
                            path: current.display().to_string(),
                            reason: "no output produced".to_string(),
                        });
                    }
                }
                EnvelopeLayer::DetachedSignature | EnvelopeLayer::ArmoredSignature => {
                    if !self.verify_signature(&current)? {
                        return Err(RestoreError::UntrustedSignature(
                            current.display().to_string(),
                        ));
                    }
                    // A co-located file we did not write ourselves is the
                    // real payload of a detached signature; leave it alone.
                    if target.is_file() && !produced.contains(&target) {
                        debug!("Using co-located payload {}", target.display());
                    } else {
                        remove_existing(&target)?;
                        fs::copy(&current, &target)?;
                    }
                }
            }

            debug!(
                "Stripped {} layer: {} -> {}",
                layer.suffix(),
                current.display(),
                target.display()
            );
            produced.insert(target.clone());
            current = target;
        }

        let expected = path.with_file_name(envelope::plain_name(&original));
        if current != expected {
            fs::copy(&current, &expected)?;
            current = expected;
        }

        Ok(current)
    }
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RestoreError::MissingFile(path.display().to_string()))
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
