//! cling-sync core primitives and shared types.
//!
//! Everything the higher-level crates agree on lives here: the AEAD and
//! key-derivation wrappers, the little-endian binary codec with its
//! sticky error slot, repository paths, file metadata, revision entries
//! with their canonical ordering, block identity, and the recovery-code
//! encoding used in the repository config file.

#![deny(unsafe_code)]

/// Version of the cling core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod block;
pub mod crypto;
pub mod entry;
pub mod marshal;
pub mod metadata;
pub mod path;
pub mod recovery;
