//! Repository storage abstraction.
//!
//! The core talks to storage through the [`Storage`] trait: a
//! bootstrapped config blob, content-addressed immutable blocks,
//! small control files (refs), and an exclusive repository lock. The
//! file-based implementation in [`filesystem`] is the only backend the
//! core ships; everything above it stays backend-agnostic.

#![deny(unsafe_code)]

use cling_core::block::{BlockHeader, BlockId};
use thiserror::Error;

pub mod config_file;
pub mod filesystem;
pub mod lock;

pub use config_file::ConfigFile;
pub use filesystem::FileStorage;
pub use lock::{CancelFlag, StorageLock};

/// Errors from storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure with the operation that hit it.
    #[error("io ({context}): {source}")]
    Io {
        /// What the backend was doing.
        context: String,
        /// The original error.
        #[source]
        source: std::io::Error,
    },
    /// No block with this id exists.
    #[error("block {0} not found")]
    BlockNotFound(BlockId),
    /// No such control file.
    #[error("control file {section}/{name} not found")]
    ControlFileNotFound {
        /// Control file section.
        section: String,
        /// Control file name.
        name: String,
    },
    /// The storage location does not hold a repository.
    #[error("storage not found")]
    StorageNotFound,
    /// The storage location already holds a repository.
    #[error("storage already exists")]
    StorageAlreadyExists,
    /// A section or control file name is not a single path component.
    #[error("invalid name {0:?}: must be a single path component")]
    InvalidName(String),
    /// The config file is malformed.
    #[error("config file: {0}")]
    Config(String),
    /// The lock wait was cancelled.
    #[error("lock wait cancelled")]
    LockCancelled,
    /// An on-disk structure failed validation.
    #[error("corrupt storage: {0}")]
    Corrupt(String),
    /// Block parse failure bubbled up from the codec.
    #[error(transparent)]
    Marshal(#[from] cling_core::marshal::MarshalError),
}

impl StorageError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}

/// Validate a section or control file name: one path component, no
/// separators, not `.` or `..`.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// Contract between the core and a storage back-end.
pub trait Storage: Send + Sync {
    /// Create the storage layout and persist the bootstrap config.
    /// Fails with [`StorageError::StorageAlreadyExists`] when a
    /// repository is already present.
    fn init(&self, config: &ConfigFile) -> Result<(), StorageError>;

    /// Load the bootstrap config. Fails with
    /// [`StorageError::StorageNotFound`] when no repository exists.
    fn open(&self) -> Result<ConfigFile, StorageError>;

    /// Atomically replace the bootstrap config of an existing
    /// repository (e.g. on a passphrase change).
    fn update_config(&self, config: &ConfigFile) -> Result<(), StorageError>;

    /// True when a block with this id is stored.
    fn has_block(&self, id: &BlockId) -> Result<bool, StorageError>;

    /// Persist `data` (header followed by sealed payload) under `id`,
    /// atomically. Returns `true` when the block already existed, in
    /// which case nothing is written.
    fn write_block(&self, id: &BlockId, data: &[u8]) -> Result<bool, StorageError>;

    /// Load a block: its parsed header and the sealed payload.
    fn read_block(&self, id: &BlockId) -> Result<(BlockHeader, Vec<u8>), StorageError>;

    /// Load and parse only a block's header.
    fn read_block_header(&self, id: &BlockId) -> Result<BlockHeader, StorageError>;

    /// True when the control file exists.
    fn has_control_file(&self, section: &str, name: &str) -> Result<bool, StorageError>;

    /// Read a control file.
    fn read_control_file(&self, section: &str, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Write a control file atomically.
    fn write_control_file(
        &self,
        section: &str,
        name: &str,
        data: &[u8],
    ) -> Result<(), StorageError>;

    /// Delete a control file. Deleting a missing file fails with
    /// [`StorageError::ControlFileNotFound`].
    fn delete_control_file(&self, section: &str, name: &str) -> Result<(), StorageError>;

    /// Acquire the named exclusive lock, blocking until it is free or
    /// `cancel` is raised.
    fn lock(&self, name: &str, cancel: &CancelFlag) -> Result<StorageLock, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_name("head").is_ok());
        assert!(validate_name("with-dash_and.dot").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(validate_name(bad).is_err(), "{bad:?}");
        }
    }
}
