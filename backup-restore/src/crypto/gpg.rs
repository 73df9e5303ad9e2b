//! OpenPGP capability backed by the `gpg` binary.
//!
//! Signature trust comes from gpg's machine-readable status lines
//! (`--status-fd`), never from its human-readable output.

use crate::utils::errors::{RestoreError, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Owner trust reported for the key that made a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrustLevel {
    Undefined,
    Never,
    Marginal,
    Fully,
    Ultimate,
}

/// Outcome of checking one signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    /// Signature is cryptographically good
    pub valid: bool,

    /// Trust level of the signing key, when reported
    pub trust: Option<TrustLevel>,

    /// Long key id or fingerprint of the signer
    pub key_id: Option<String>,
}

impl Verification {
    /// Only a good signature from a fully (or ultimately) trusted key counts.
    pub fn is_fully_trusted(&self) -> bool {
        self.valid && matches!(self.trust, Some(t) if t >= TrustLevel::Fully)
    }
}

/// Signature verification and decryption, as the pipeline needs them.
pub trait CryptoBackend {
    /// Fail with `MissingCapability` when the tool cannot be run at all.
    fn ensure_available(&self) -> Result<()>;

    /// Check `signature`. `payload` is the co-located signed data for a
    /// detached signature, `None` when the signature carries its own data.
    fn verify(&self, signature: &Path, payload: Option<&Path>) -> Result<Verification>;

    /// Decrypt `input` into `output`, trusting whatever key was used.
    fn decrypt(&self, input: &Path, output: &Path, passphrase: Option<&str>) -> Result<()>;
}

/// `gpg` command line backend
#[derive(Debug, Clone)]
pub struct GpgBackend {
    program: String,
    home: Option<PathBuf>,
}

impl GpgBackend {
    pub fn new(program: impl Into<String>, home: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            home,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--batch").arg("--no-tty");
        if let Some(home) = &self.home {
            cmd.arg("--homedir").arg(home);
        }
        cmd
    }

    fn spawn_error(&self, e: io::Error) -> RestoreError {
        if e.kind() == io::ErrorKind::NotFound {
            RestoreError::MissingCapability(self.program.clone())
        } else {
            RestoreError::Io(e)
        }
    }
}

impl CryptoBackend for GpgBackend {
    fn ensure_available(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(RestoreError::MissingCapability(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(())
    }

    fn verify(&self, signature: &Path, payload: Option<&Path>) -> Result<Verification> {
        let mut cmd = self.command();
        cmd.arg("--status-fd").arg("1").arg("--verify").arg(signature);
        if let Some(payload) = payload {
            cmd.arg(payload);
        }

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        let verification = parse_status(&String::from_utf8_lossy(&output.stdout));
        debug!(
            "gpg verify {}: exit {}, {:?}",
            signature.display(),
            output.status,
            verification
        );

        // A non-zero exit always means the signature did not check out,
        // whatever the status lines claimed.
        if !output.status.success() {
            return Ok(Verification {
                valid: false,
                ..verification
            });
        }
        Ok(verification)
    }

    fn decrypt(&self, input: &Path, output: &Path, passphrase: Option<&str>) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("--yes").arg("--quiet").arg("--trust-model").arg("always");
        if passphrase.is_some() {
            cmd.arg("--pinentry-mode")
                .arg("loopback")
                .arg("--passphrase-fd")
                .arg("0");
        }
        cmd.arg("--output").arg(output).arg("--decrypt").arg(input);

        let result = run_with_stdin(cmd, passphrase).map_err(|e| self.spawn_error(e))?;

        if !result.status.success() {
            return Err(RestoreError::DecryptionFailure {
                path: input.display().to_string(),
                reason: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn run_with_stdin(mut cmd: Command, input: Option<&str>) -> io::Result<Output> {
    match input {
        Some(text) => {
            let mut child = cmd
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                writeln!(stdin, "{}", text)?;
            }
            child.wait_with_output()
        }
        None => cmd.stdin(Stdio::null()).output(),
    }
}

/// Interpret `[GNUPG:]` status lines from a verify run.
pub fn parse_status(status: &str) -> Verification {
    let mut good = false;
    let mut valid_sig = false;
    let mut bad = false;
    let mut verification = Verification::default();

    for line in status.lines() {
        let Some(rest) = line.strip_prefix("[GNUPG:] ") else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let keyword = fields.next().unwrap_or_default();
        match keyword {
            "GOODSIG" => {
                good = true;
                verification.key_id = fields.next().map(str::to_string);
            }
            "VALIDSIG" => {
                valid_sig = true;
                if let Some(fingerprint) = fields.next() {
                    verification.key_id = Some(fingerprint.to_string());
                }
            }
            "BADSIG" | "ERRSIG" | "EXPSIG" | "EXPKEYSIG" | "REVKEYSIG" | "NO_PUBKEY" => {
                bad = true;
            }
            "TRUST_UNDEFINED" => verification.trust = Some(TrustLevel::Undefined),
            "TRUST_NEVER" => verification.trust = Some(TrustLevel::Never),
            "TRUST_MARGINAL" => verification.trust = Some(TrustLevel::Marginal),
            "TRUST_FULLY" => verification.trust = Some(TrustLevel::Fully),
            "TRUST_ULTIMATE" => verification.trust = Some(TrustLevel::Ultimate),
            _ => {}
        }
    }

    verification.valid = good && valid_sig && !bad;
    verification
}
