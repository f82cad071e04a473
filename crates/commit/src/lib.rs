//! Committing: staging streams, effective snapshots, and the diff
//! engine that turns one against the other into a new revision.

#![deny(unsafe_code)]

use block_store::BlockStoreError;
use cling_core::marshal::MarshalError;
use cling_core::path::RepoPath;
use repository::{RepositoryError, RevisionId};
use storage::StorageError;
use temp_sort::TempSortError;
use thiserror::Error;

mod engine;
mod snapshot;
mod staging;

pub use engine::{CommitBuilder, CommitInfo};
pub use snapshot::RevisionSnapshot;
pub use staging::{Staging, StagingBuilder};

/// Errors from snapshot building and committing.
#[derive(Debug, Error)]
pub enum CommitError {
    /// Repository failure (including `HeadChanged`).
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Block store failure while writing diff blocks.
    #[error(transparent)]
    Blocks(#[from] BlockStoreError),
    /// Backend failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Temp-sort failure; a duplicate entry means a broken producer.
    #[error(transparent)]
    TempSort(#[from] TempSortError),
    /// A record failed to serialise.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// The staging stream was captured against a different snapshot.
    #[error("staging base {staging} does not match snapshot revision {snapshot}")]
    SnapshotMismatch {
        /// The staging stream's declared parent.
        staging: RevisionId,
        /// The snapshot's revision.
        snapshot: RevisionId,
    },
    /// The diff produced no entries; there is nothing to commit.
    #[error("empty commit")]
    EmptyCommit,
    /// An ancestor requested as a directory exists as something else.
    #[error("{0} already exists and is not a directory")]
    NotADirectory(RepoPath),
}
