//! The commit engine: a two-finger merge of staging against the head
//! snapshot, producing add/update/delete entries and a new revision.

use crate::snapshot::RevisionSnapshot;
use crate::staging::Staging;
use crate::CommitError;
use cling_core::block::MAX_BLOCK_PLAINTEXT_SIZE;
use cling_core::entry::{canonical_key, RevisionEntry};
use cling_core::marshal::{MarshalError, MarshalWriter};
use cling_core::metadata::FileMetadata;
use cling_core::path::RepoPath;
use repository::{now_timestamp, Repository, RepositoryError, Revision, RevisionId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use storage::{CancelFlag, Storage};
use temp_sort::{TempCache, TempReader, TempWriter};
use tracing::info;

/// How many snapshot chunks `ensure_dir_exists` lookups keep
/// materialised.
const ANCESTOR_CACHE_CHUNKS: usize = 8;

/// Author and message for a revision to be.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// Author string recorded in the revision.
    pub author: String,
    /// Commit message.
    pub message: String,
}

fn entry_key(entry: &RevisionEntry) -> Vec<u8> {
    entry.sort_key()
}

/// A commit in preparation: staging plus the snapshot it diffs
/// against, with optional synthetic directory entries queued in.
pub struct CommitBuilder<'a, S: Storage> {
    repo: &'a Repository<S>,
    staging: Staging,
    snapshot: &'a RevisionSnapshot,
    snapshot_cache: TempCache<'a, RevisionEntry, fn(&RevisionEntry) -> Vec<u8>>,
    extra_dirs: BTreeMap<Vec<u8>, RevisionEntry>,
    tmp_dir: PathBuf,
}

impl<'a, S: Storage> CommitBuilder<'a, S> {
    /// Prepare a commit of `staging` against `snapshot`, using
    /// `tmp_dir` for the diff spill files.
    pub fn new(
        repo: &'a Repository<S>,
        staging: Staging,
        snapshot: &'a RevisionSnapshot,
        tmp_dir: &Path,
    ) -> Result<Self, CommitError> {
        let snapshot_cache = TempCache::new(
            snapshot.temp(),
            entry_key as fn(&RevisionEntry) -> Vec<u8>,
            ANCESTOR_CACHE_CHUNKS,
        )?;
        Ok(Self {
            repo,
            staging,
            snapshot,
            snapshot_cache,
            extra_dirs: BTreeMap::new(),
            tmp_dir: tmp_dir.to_path_buf(),
        })
    }

    /// Queue synthetic directory entries so that `dir_path` and all
    /// its ancestors exist after the commit. Fails when an ancestor
    /// exists as a non-directory.
    pub fn ensure_dir_exists(&mut self, dir_path: &RepoPath) -> Result<(), CommitError> {
        let mut current = Some(dir_path.clone());
        while let Some(path) = current {
            let dir_key = canonical_key(&path, true);
            if self.extra_dirs.contains_key(&dir_key) {
                // Already queued, and therefore so are its ancestors.
                break;
            }
            if self.snapshot_cache.get(&dir_key)?.is_some() {
                break;
            }
            if self.snapshot_cache.get(&canonical_key(&path, false))?.is_some() {
                return Err(CommitError::NotADirectory(path));
            }
            let (sec, nsec) = now_timestamp();
            let entry = RevisionEntry::add(path.clone(), FileMetadata::synthetic_dir(sec, nsec));
            self.extra_dirs.insert(dir_key, entry);
            current = path.parent();
        }
        Ok(())
    }

    /// Run the diff and commit it.
    ///
    /// Takes the repository lock, re-checks that HEAD still equals
    /// the staging base, streams the diff into block-sized chunks,
    /// writes those as blocks, and advances HEAD onto the new
    /// revision. Fails with `EmptyCommit` when staging and snapshot
    /// agree.
    pub fn commit(self, info: &CommitInfo, cancel: &CancelFlag) -> Result<RevisionId, CommitError> {
        if self.staging.base_revision != self.snapshot.revision_id() {
            return Err(CommitError::SnapshotMismatch {
                staging: self.staging.base_revision,
                snapshot: self.snapshot.revision_id(),
            });
        }

        // The lock spans the head check and the head advance inside
        // write_revision. Readers are unaffected: nothing becomes
        // visible until HEAD moves.
        let _lock = self.repo.lock(cancel)?;
        let head = self.repo.head()?;
        if head != self.staging.base_revision {
            return Err(RepositoryError::HeadChanged {
                expected: self.staging.base_revision,
                actual: head,
            }
            .into());
        }

        let mut diff = TempWriter::with_max_chunk_size(&self.tmp_dir, MAX_BLOCK_PLAINTEXT_SIZE)?;
        let mut staged = MergedStaging::new(self.staging.temp.reader(), self.extra_dirs)?;
        let mut snap_reader = self.snapshot.reader();
        let mut snap_head = snap_reader.next_entry()?;

        let mut added = 0u64;
        let mut updated = 0u64;
        let mut deleted = 0u64;
        loop {
            let staged_key = staged.head().map(RevisionEntry::sort_key);
            let snap_key = snap_head.as_ref().map(RevisionEntry::sort_key);
            match (staged_key, snap_key) {
                (None, None) => break,
                (Some(_), None) => {
                    let entry = staged.advance()?.expect("head was present");
                    diff.add(entry)?;
                    added += 1;
                }
                (None, Some(_)) => {
                    let snap = snap_head.take().expect("head was present");
                    let was_dir = snap.is_dir();
                    diff.add(RevisionEntry::delete(snap.path, was_dir))?;
                    deleted += 1;
                    snap_head = snap_reader.next_entry()?;
                }
                (Some(staged_key), Some(snap_key)) => match staged_key.cmp(&snap_key) {
                    std::cmp::Ordering::Less => {
                        let entry = staged.advance()?.expect("head was present");
                        diff.add(entry)?;
                        added += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        let snap = snap_head.take().expect("head was present");
                        let was_dir = snap.is_dir();
                        diff.add(RevisionEntry::delete(snap.path, was_dir))?;
                        deleted += 1;
                        snap_head = snap_reader.next_entry()?;
                    }
                    std::cmp::Ordering::Equal => {
                        let snap = snap_head.take().expect("head was present");
                        let entry = staged.advance()?.expect("head was present");
                        if !metadata_equal(&entry, &snap)? {
                            let metadata = entry.metadata.expect("staged entries carry metadata");
                            diff.add(RevisionEntry::update(entry.path, metadata))?;
                            updated += 1;
                        }
                        snap_head = snap_reader.next_entry()?;
                    }
                },
            }
        }

        if added + updated + deleted == 0 {
            return Err(CommitError::EmptyCommit);
        }

        let diff_temp = diff.finalize()?;
        let mut blocks = Vec::with_capacity(diff_temp.chunk_count());
        for index in 0..diff_temp.chunk_count() {
            let chunk = diff_temp.read_chunk_raw(index)?;
            let (_, header) = self.repo.block_store().write_block(&chunk)?;
            blocks.push(header.block_id);
        }

        let (sec, nsec) = now_timestamp();
        let revision = Revision {
            timestamp_sec: sec,
            timestamp_nsec: nsec,
            author: info.author.clone(),
            message: info.message.clone(),
            parent: self.staging.base_revision,
            blocks,
        };
        let id = self.repo.write_revision(&revision)?;
        let _ = diff_temp.remove();
        info!(revision = %id, added, updated, deleted, "committed");
        Ok(id)
    }
}

/// Full-marshalled-bytes equality of two entries' metadata.
fn metadata_equal(a: &RevisionEntry, b: &RevisionEntry) -> Result<bool, CommitError> {
    fn bytes(entry: &RevisionEntry) -> Result<Vec<u8>, MarshalError> {
        match &entry.metadata {
            Some(metadata) => {
                let mut w = MarshalWriter::new();
                metadata.marshal(&mut w);
                w.finish()
            }
            None => Ok(Vec::new()),
        }
    }
    Ok(bytes(a)? == bytes(b)?)
}

/// The staging stream merged with queued synthetic directory adds.
/// Both sides are sorted; on a key collision the staged entry wins
/// and the synthetic one is dropped.
struct MergedStaging<'a> {
    reader: TempReader<'a, RevisionEntry>,
    reader_head: Option<RevisionEntry>,
    extras: std::collections::btree_map::IntoIter<Vec<u8>, RevisionEntry>,
    extra_head: Option<(Vec<u8>, RevisionEntry)>,
}

impl<'a> MergedStaging<'a> {
    fn new(
        mut reader: TempReader<'a, RevisionEntry>,
        extras: BTreeMap<Vec<u8>, RevisionEntry>,
    ) -> Result<Self, CommitError> {
        let reader_head = reader.next_entry()?;
        let mut extras = extras.into_iter();
        let extra_head = extras.next();
        Ok(Self { reader, reader_head, extras, extra_head })
    }

    fn head(&self) -> Option<&RevisionEntry> {
        match (&self.reader_head, &self.extra_head) {
            (None, None) => None,
            (Some(entry), None) => Some(entry),
            (None, Some((_, entry))) => Some(entry),
            (Some(staged), Some((extra_key, extra))) => {
                if staged.sort_key() <= *extra_key {
                    Some(staged)
                } else {
                    Some(extra)
                }
            }
        }
    }

    fn advance(&mut self) -> Result<Option<RevisionEntry>, CommitError> {
        let staged_key = self.reader_head.as_ref().map(RevisionEntry::sort_key);
        let extra_key = self.extra_head.as_ref().map(|(key, _)| key.clone());
        let take_staged = match (&staged_key, &extra_key) {
            (None, None) => return Ok(None),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(staged), Some(extra)) => {
                if staged == extra {
                    // The scanner staged this path itself; drop the
                    // queued synthetic duplicate.
                    self.extra_head = self.extras.next();
                }
                staged <= extra
            }
        };
        if take_staged {
            let entry = self.reader_head.take();
            self.reader_head = self.reader.next_entry()?;
            Ok(entry)
        } else {
            let entry = self.extra_head.take().map(|(_, entry)| entry);
            self.extra_head = self.extras.next();
            Ok(entry)
        }
    }
}
