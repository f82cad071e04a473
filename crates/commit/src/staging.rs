//! Staging streams: what the working directory looks like now.

use crate::CommitError;
use cling_core::entry::RevisionEntry;
use cling_core::metadata::FileMetadata;
use cling_core::path::RepoPath;
use repository::RevisionId;
use std::path::Path;
use temp_sort::{Temp, TempWriter};

/// Collects scanner output into a sorted staging stream.
///
/// The scanner feeds `(path, metadata)` pairs in any order; the
/// resulting [`Staging`] yields them as add records in canonical
/// order. Staging the same path twice aborts the sort.
pub struct StagingBuilder {
    base_revision: RevisionId,
    writer: TempWriter<RevisionEntry>,
}

impl StagingBuilder {
    /// Start a staging stream against `base_revision`, spilling into
    /// `tmp_dir`.
    pub fn new(base_revision: RevisionId, tmp_dir: &Path) -> Result<Self, CommitError> {
        Ok(Self { base_revision, writer: TempWriter::new(tmp_dir)? })
    }

    /// Stage one path with its scanned metadata.
    pub fn add(&mut self, path: RepoPath, metadata: FileMetadata) -> Result<(), CommitError> {
        self.writer.add(RevisionEntry::add(path, metadata))?;
        Ok(())
    }

    /// Sort and seal the stream.
    pub fn finish(self) -> Result<Staging, CommitError> {
        Ok(Staging { base_revision: self.base_revision, temp: self.writer.finalize()? })
    }
}

/// A sorted staging stream and the revision it was captured against.
pub struct Staging {
    pub(crate) base_revision: RevisionId,
    pub(crate) temp: Temp<RevisionEntry>,
}

impl Staging {
    /// The revision the working directory was scanned against.
    pub fn base_revision(&self) -> RevisionId {
        self.base_revision
    }

    /// Number of staged entries.
    pub fn len(&self) -> u64 {
        self.temp.len()
    }

    /// True when nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.temp.is_empty()
    }

    /// Delete the staging temp files.
    pub fn remove(self) -> Result<(), CommitError> {
        self.temp.remove()?;
        Ok(())
    }
}
