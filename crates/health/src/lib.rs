//! Repository health check.
//!
//! Walks the revision chain from HEAD to the root and verifies, per
//! revision: that every data block decrypts, that the entry stream is
//! strictly sorted in canonical order, and (optionally) that every
//! file's content blocks hash and size back to its metadata. Any
//! mismatch is fatal; the monitor only ever observes progress.

#![deny(unsafe_code)]

use block_store::BlockStoreError;
use cling_core::block::BlockId;
use cling_core::entry::RevisionEntry;
use cling_core::path::RepoPath;
use repository::{Repository, RepositoryError, Revision, RevisionId};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use storage::Storage;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the health check. Everything except progress is fatal.
#[derive(Debug, Error)]
pub enum HealthError {
    /// Repository failure (missing block, failed decryption, parse).
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Block store failure while reading content blocks.
    #[error(transparent)]
    Blocks(#[from] BlockStoreError),
    /// Two consecutive entries violated the canonical order.
    #[error("revision {revision}: entry {path:?} is not after {previous:?}")]
    OrderViolation {
        /// Revision whose stream is broken.
        revision: RevisionId,
        /// The earlier entry's path.
        previous: String,
        /// The offending entry's path.
        path: String,
    },
    /// A file's content blocks do not hash to its recorded hash.
    #[error("revision {revision}: file hash mismatch for {path}")]
    FileHashMismatch {
        /// Revision whose entry is broken.
        revision: RevisionId,
        /// The offending path.
        path: RepoPath,
    },
    /// A file's content blocks do not add up to its recorded size.
    #[error("file size mismatch for {path}: metadata says {expected}, blocks hold {actual}")]
    FileSizeMismatch {
        /// The offending path.
        path: RepoPath,
        /// Size recorded in the metadata.
        expected: u64,
        /// Bytes the content blocks actually hold.
        actual: u64,
    },
    /// A directory entry carries a non-zero content hash.
    #[error("directory {0} has a non-zero content hash")]
    DirectoryHashNotZero(RepoPath),
    /// A symlink entry references content blocks.
    #[error("symlink {0} references content blocks")]
    SymlinkWithBlocks(RepoPath),
}

/// What the check verifies beyond chain and stream integrity.
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    /// Decrypt every file's content blocks and verify hash and size.
    pub verify_file_data: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self { verify_file_data: true }
    }
}

/// Progress callbacks. All default to no-ops; implement what you
/// need.
pub trait HealthMonitor {
    /// A revision walk begins.
    fn on_revision_start(&mut self, _id: &RevisionId, _revision: &Revision) {}

    /// A revision data block decrypted. `duplicate` is set when the
    /// block already appeared earlier in the walk.
    fn on_block_ok(&mut self, _id: &BlockId, _plaintext_len: usize, _duplicate: bool) {}

    /// An entry passed its checks.
    fn on_entry(&mut self, _entry: &RevisionEntry) {}
}

/// The silent monitor.
impl HealthMonitor for () {}

/// Counters accumulated over a successful check.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Revisions walked.
    pub revisions: u64,
    /// Revision data blocks decrypted.
    pub blocks: u64,
    /// Blocks that appeared in more than one revision.
    pub duplicate_blocks: u64,
    /// Entries streamed.
    pub entries: u64,
    /// Files whose content was hash-verified.
    pub files_verified: u64,
}

/// Walk the chain from HEAD to the root, verifying as configured.
pub fn check<S: Storage, M: HealthMonitor>(
    repo: &Repository<S>,
    options: &CheckOptions,
    monitor: &mut M,
) -> Result<HealthReport, HealthError> {
    let mut report = HealthReport::default();
    let mut seen_blocks: HashSet<BlockId> = HashSet::new();
    let head = repo.head()?;

    for item in repo.revisions(head) {
        let (cursor, revision) = item?;
        monitor.on_revision_start(&cursor, &revision);
        report.revisions += 1;

        for block_id in &revision.blocks {
            let (plaintext, _) = repo.block_store().read_block(block_id)?;
            let duplicate = !seen_blocks.insert(*block_id);
            if duplicate {
                report.duplicate_blocks += 1;
            }
            report.blocks += 1;
            monitor.on_block_ok(block_id, plaintext.len(), duplicate);
        }

        let mut reader = repo.revision_reader(&revision);
        let mut previous: Option<RevisionEntry> = None;
        while let Some(entry) = reader.next_entry()? {
            if let Some(prev) = &previous {
                if RevisionEntry::compare(prev, &entry) != std::cmp::Ordering::Less {
                    return Err(HealthError::OrderViolation {
                        revision: cursor,
                        previous: prev.path.as_str().to_string(),
                        path: entry.path.as_str().to_string(),
                    });
                }
            }
            if options.verify_file_data {
                verify_entry(repo, &cursor, &entry, &mut report)?;
            }
            report.entries += 1;
            monitor.on_entry(&entry);
            previous = Some(entry);
        }
        debug!(revision = %cursor, "revision verified");
    }

    info!(
        revisions = report.revisions,
        blocks = report.blocks,
        entries = report.entries,
        files = report.files_verified,
        "health check passed"
    );
    Ok(report)
}

fn verify_entry<S: Storage>(
    repo: &Repository<S>,
    revision: &RevisionId,
    entry: &RevisionEntry,
    report: &mut HealthReport,
) -> Result<(), HealthError> {
    let Some(metadata) = &entry.metadata else {
        return Ok(());
    };
    if metadata.mode.is_dir() {
        if metadata.file_hash != [0u8; 32] {
            return Err(HealthError::DirectoryHashNotZero(entry.path.clone()));
        }
        return Ok(());
    }
    if metadata.mode.is_symlink() {
        // A symlink's content is its target string; it owns no blocks.
        if !metadata.block_ids.is_empty() {
            return Err(HealthError::SymlinkWithBlocks(entry.path.clone()));
        }
        return Ok(());
    }

    let mut hasher = Sha256::new();
    let mut total: u64 = 0;
    for block_id in &metadata.block_ids {
        let (plaintext, _) = repo.block_store().read_block(block_id)?;
        hasher.update(&plaintext);
        total += plaintext.len() as u64;
    }
    if total != metadata.size {
        return Err(HealthError::FileSizeMismatch {
            path: entry.path.clone(),
            expected: metadata.size,
            actual: total,
        });
    }
    let digest: [u8; 32] = hasher.finalize().into();
    if digest != metadata.file_hash {
        return Err(HealthError::FileHashMismatch { revision: *revision, path: entry.path.clone() });
    }
    report.files_verified += 1;
    Ok(())
}
