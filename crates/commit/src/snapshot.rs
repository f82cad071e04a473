//! Materialising the effective snapshot of a revision.

use crate::CommitError;
use cling_core::entry::{EntryKind, RevisionEntry};
use repository::{Repository, RevisionId};
use std::path::Path;
use storage::Storage;
use temp_sort::{Temp, TempReader, TempWriter};
use tracing::debug;

/// The effective snapshot at a revision: every live path in
/// canonical order, each with the metadata of the revision that last
/// touched it.
pub struct RevisionSnapshot {
    revision_id: RevisionId,
    temp: Temp<RevisionEntry>,
}

impl RevisionSnapshot {
    /// Build the snapshot for `revision_id` by merging its chain of
    /// diffs, newest first. The root revision yields an empty
    /// snapshot.
    pub fn build<S: Storage>(
        repo: &Repository<S>,
        revision_id: &RevisionId,
        tmp_dir: &Path,
    ) -> Result<Self, CommitError> {
        // Walk the parent chain, newest first.
        let mut revisions = Vec::new();
        for item in repo.revisions(*revision_id) {
            let (_, revision) = item?;
            revisions.push(revision);
        }

        let mut readers = Vec::with_capacity(revisions.len());
        for revision in &revisions {
            readers.push(repo.revision_reader(revision));
        }
        let mut heads = Vec::with_capacity(readers.len());
        for reader in &mut readers {
            heads.push(reader.next_entry()?);
        }

        let mut writer = TempWriter::new(tmp_dir)?;
        // K-way merge in canonical order. Readers are ordered newest
        // first, so on a key collision the lowest index wins and the
        // older entries for that path are skipped.
        loop {
            let mut min: Option<(usize, Vec<u8>)> = None;
            for (index, head) in heads.iter().enumerate() {
                let Some(entry) = head else { continue };
                let key = entry.sort_key();
                match &min {
                    None => min = Some((index, key)),
                    Some((_, min_key)) => {
                        if key < *min_key {
                            min = Some((index, key));
                        }
                    }
                }
            }
            let Some((winner, min_key)) = min else { break };

            let entry = heads[winner].take().expect("winner has a peeked entry");
            heads[winner] = readers[winner].next_entry()?;
            for index in winner + 1..heads.len() {
                let outdated =
                    heads[index].as_ref().is_some_and(|other| other.sort_key() == min_key);
                if outdated {
                    heads[index] = readers[index].next_entry()?;
                }
            }

            // A delete as the newest touch means the path is gone.
            if entry.kind != EntryKind::Delete {
                writer.add(entry)?;
            }
        }

        let temp = writer.finalize()?;
        debug!(revision = %revision_id, live_paths = temp.len(), "built effective snapshot");
        Ok(Self { revision_id: *revision_id, temp })
    }

    /// The revision this snapshot describes.
    pub fn revision_id(&self) -> RevisionId {
        self.revision_id
    }

    /// The sorted live-path sequence.
    pub fn temp(&self) -> &Temp<RevisionEntry> {
        &self.temp
    }

    /// Stream the live paths in canonical order.
    pub fn reader(&self) -> TempReader<'_, RevisionEntry> {
        self.temp.reader()
    }

    /// Delete the snapshot's temp files.
    pub fn remove(self) -> Result<(), CommitError> {
        self.temp.remove()?;
        Ok(())
    }
}
