//! Corruption detection and repair.

pub mod checksum;
pub mod parity;

pub use checksum::{validate, ChecksumEntry, ChecksumReport};
pub use parity::{Par2Repair, ParityRepair};
