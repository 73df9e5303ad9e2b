//! Signature verification and decryption of enveloped backup files.

pub mod envelope;
pub mod gpg;
pub mod unwrap;

pub use envelope::EnvelopeLayer;
pub use gpg::{CryptoBackend, GpgBackend, TrustLevel, Verification};
pub use unwrap::Unwrapper;
