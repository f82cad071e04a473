//! Repository facade.
//!
//! Owns the opened key envelope, the block store bound to those keys,
//! and the HEAD ref. Revisions are written append-only: a commit
//! becomes visible only when HEAD atomically advances onto it, so
//! readers never see a half-written revision.

#![deny(unsafe_code)]

use block_store::{BlockStore, BlockStoreError};
use cling_core::crypto::CryptoError;
use cling_core::entry::RevisionEntry;
use cling_core::marshal::{MarshalError, MarshalReader};
use std::sync::Arc;
use storage::{CancelFlag, ConfigFile, Storage, StorageError, StorageLock};
use thiserror::Error;
use tracing::{debug, info};

mod keys;
pub mod revision;

pub use revision::{now_timestamp, Revision, RevisionId, REVISION_MAGIC};

/// Name of the exclusive lock guarding HEAD movement.
pub const REPOSITORY_LOCK_NAME: &str = "repository";
/// Control file section holding refs.
pub const REFS_SECTION: &str = "refs";
/// Name of the head ref.
pub const HEAD_REF: &str = "head";

/// Errors from the repository facade.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Backend failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Block store failure.
    #[error(transparent)]
    Blocks(#[from] BlockStoreError),
    /// Crypto failure; tamper surfaces as "authentication failed".
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// A record failed to parse.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// The head moved since the revision's parent was captured. The
    /// caller may rebuild its snapshot and retry.
    #[error("head changed: expected {expected}, found {actual}")]
    HeadChanged {
        /// The parent the revision claims.
        expected: RevisionId,
        /// The head the repository has.
        actual: RevisionId,
    },
    /// A revision without blocks cannot be written.
    #[error("empty revision")]
    EmptyRevision,
    /// The root revision has no record to read.
    #[error("root revision")]
    RootRevision,
    /// The referenced block does not hold a revision record.
    #[error("not a commit")]
    NotACommit,
    /// The repository was written by an incompatible storage format.
    #[error("unsupported storage version {0}")]
    UnsupportedStorageVersion(String),
    /// The repository metadata is malformed.
    #[error("corrupt repository: {0}")]
    Corrupt(String),
}

/// An opened repository.
pub struct Repository<S: Storage> {
    storage: Arc<S>,
    blocks: BlockStore<S>,
    keys: keys::MasterKeys,
}

impl<S: Storage> std::fmt::Debug for Repository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl<S: Storage> Repository<S> {
    /// Initialise a new repository on `storage`: seal fresh keys
    /// under `passphrase`, write the config, and point HEAD at the
    /// root.
    pub fn init(storage: Arc<S>, passphrase: &[u8]) -> Result<Self, RepositoryError> {
        let mut config = ConfigFile::new();
        let keys = keys::seal_new_keys(&mut config, passphrase)?;
        storage.init(&config)?;
        let repo = Self::assemble(storage, keys);
        repo.write_head(&RevisionId::ROOT)?;
        info!("initialised repository");
        Ok(repo)
    }

    /// Open an existing repository with `passphrase`. Tampered key
    /// material fails with "authentication failed".
    pub fn open(storage: Arc<S>, passphrase: &[u8]) -> Result<Self, RepositoryError> {
        let config = storage.open()?;
        let keys = keys::open_keys(&config, passphrase)?;
        Ok(Self::assemble(storage, keys))
    }

    fn assemble(storage: Arc<S>, keys: keys::MasterKeys) -> Self {
        let blocks = BlockStore::new(Arc::clone(&storage), &keys.kek, keys.block_id_hmac.clone());
        Self { storage, blocks, keys }
    }

    /// The block store bound to this repository's keys.
    pub fn block_store(&self) -> &BlockStore<S> {
        &self.blocks
    }

    /// Acquire the repository's exclusive writer lock.
    pub fn lock(&self, cancel: &CancelFlag) -> Result<StorageLock, RepositoryError> {
        Ok(self.storage.lock(REPOSITORY_LOCK_NAME, cancel)?)
    }

    /// The current head revision ([`RevisionId::ROOT`] when empty).
    pub fn head(&self) -> Result<RevisionId, RepositoryError> {
        let raw = self.storage.read_control_file(REFS_SECTION, HEAD_REF)?;
        let text = std::str::from_utf8(&raw)
            .map_err(|_| RepositoryError::Corrupt("head ref is not ASCII hex".to_string()))?;
        Ok(RevisionId::from_hex(text.trim_end())
            .map_err(|_| RepositoryError::Corrupt("head ref is not a revision id".to_string()))?)
    }

    fn write_head(&self, id: &RevisionId) -> Result<(), RepositoryError> {
        Ok(self.storage.write_control_file(REFS_SECTION, HEAD_REF, id.to_hex().as_bytes())?)
    }

    /// Append `revision` and advance HEAD onto it.
    ///
    /// Requires `revision.parent` to equal the current head (else
    /// [`RepositoryError::HeadChanged`]), a non-empty block list, and
    /// every referenced block to exist. The caller holds the
    /// repository lock across its head check and this call.
    pub fn write_revision(&self, revision: &Revision) -> Result<RevisionId, RepositoryError> {
        let head = self.head()?;
        if revision.parent != head {
            return Err(RepositoryError::HeadChanged { expected: revision.parent, actual: head });
        }
        if revision.blocks.is_empty() {
            return Err(RepositoryError::EmptyRevision);
        }
        for block in &revision.blocks {
            if !self.blocks.has_block(block)? {
                return Err(StorageError::BlockNotFound(*block).into());
            }
        }
        let plaintext = revision.marshal()?;
        let (_, header) = self.blocks.write_block(&plaintext)?;
        let id = RevisionId(header.block_id);
        self.write_head(&id)?;
        debug!(revision = %id, parent = %revision.parent, blocks = revision.blocks.len(), "wrote revision");
        Ok(id)
    }

    /// Read the revision record for `id`. The root id fails with
    /// [`RepositoryError::RootRevision`]; a block that is not a
    /// revision fails with [`RepositoryError::NotACommit`].
    pub fn read_revision(&self, id: &RevisionId) -> Result<Revision, RepositoryError> {
        if id.is_root() {
            return Err(RepositoryError::RootRevision);
        }
        let (plaintext, _) = self.blocks.read_block(&id.0)?;
        match Revision::unmarshal(&plaintext) {
            Ok(revision) => Ok(revision),
            Err(MarshalError::BadMagic) => Err(RepositoryError::NotACommit),
            Err(e) => Err(e.into()),
        }
    }

    /// Iterate the revision chain from `from` back to the root,
    /// newest first.
    pub fn revisions(&self, from: RevisionId) -> RevisionChain<'_, S> {
        RevisionChain { repo: self, cursor: from }
    }

    /// Stream the entries of `revision` in canonical order.
    pub fn revision_reader<'a>(&'a self, revision: &Revision) -> RevisionReader<'a, S> {
        RevisionReader {
            blocks: &self.blocks,
            block_ids: revision.blocks.clone(),
            next_block: 0,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Reseal the key envelope under a new passphrase with a fresh
    /// salt. Blocks are untouched; only the config changes.
    pub fn change_passphrase(&self, new_passphrase: &[u8]) -> Result<(), RepositoryError> {
        let mut config = self.storage.open()?;
        keys::seal_into_config(
            &mut config,
            new_passphrase,
            self.keys.encryption_version,
            &self.keys.kek,
            &self.keys.block_id_hmac,
        )?;
        self.storage.update_config(&config)?;
        info!("resealed key envelope under a new passphrase");
        Ok(())
    }
}

/// Iterator over a revision chain, newest first. Ends at the root;
/// fuses after the first error.
pub struct RevisionChain<'a, S: Storage> {
    repo: &'a Repository<S>,
    cursor: RevisionId,
}

impl<S: Storage> Iterator for RevisionChain<'_, S> {
    type Item = Result<(RevisionId, Revision), RepositoryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_root() {
            return None;
        }
        match self.repo.read_revision(&self.cursor) {
            Ok(revision) => {
                let id = self.cursor;
                self.cursor = revision.parent;
                Some(Ok((id, revision)))
            }
            Err(e) => {
                self.cursor = RevisionId::ROOT;
                Some(Err(e))
            }
        }
    }
}

/// Streaming reader over one revision's entry stream.
pub struct RevisionReader<'a, S: Storage> {
    blocks: &'a BlockStore<S>,
    block_ids: Vec<cling_core::block::BlockId>,
    next_block: usize,
    buf: Vec<u8>,
    pos: usize,
}

impl<S: Storage> RevisionReader<'_, S> {
    /// The next entry, or `None` at the end of the stream.
    pub fn next_entry(&mut self) -> Result<Option<RevisionEntry>, RepositoryError> {
        loop {
            if self.pos < self.buf.len() {
                let mut r = MarshalReader::new(&self.buf[self.pos..]);
                let entry = RevisionEntry::unmarshal(&mut r)?;
                self.pos += self.buf.len() - self.pos - r.remaining();
                return Ok(Some(entry));
            }
            if self.next_block >= self.block_ids.len() {
                return Ok(None);
            }
            let (plaintext, _) = self.blocks.read_block(&self.block_ids[self.next_block])?;
            self.next_block += 1;
            self.buf = plaintext;
            self.pos = 0;
        }
    }
}
