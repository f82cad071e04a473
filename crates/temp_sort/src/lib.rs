//! Chunked, encrypted-at-rest, on-disk sorted sequences.
//!
//! A [`TempWriter`] accumulates entries in memory, rotating full
//! chunks to disk as sorted, individually sealed files; finalizing
//! performs an n-way merge into a fully sorted [`Temp`] that can be
//! streamed back or consulted point-wise through a [`TempCache`].
//!
//! Temp files may live on a shared filesystem and carry full paths
//! and file hashes, so every chunk is sealed under a random
//! per-instance key that only ever exists in process memory. The
//! ordering is strict: two equal entries abort the sort, since a
//! duplicate key always indicates a bug in the producer.

#![deny(unsafe_code)]

use cling_core::crypto::CryptoError;
use cling_core::marshal::{MarshalError, MarshalReader, MarshalWriter};
use thiserror::Error;

mod cache;
mod entries;
mod temp;
mod writer;

pub use cache::TempCache;
pub use temp::{Temp, TempReader};
pub use writer::{TempWriter, DEFAULT_MAX_CHUNK_SIZE};

/// Errors from the temp-sort machinery.
#[derive(Debug, Error)]
pub enum TempSortError {
    /// Underlying I/O failure with the operation that hit it.
    #[error("io ({context}): {source}")]
    Io {
        /// What the writer or reader was doing.
        context: String,
        /// The original error.
        #[source]
        source: std::io::Error,
    },
    /// Two entries compared equal; the producer is broken.
    #[error("duplicate entry")]
    DuplicateEntry,
    /// A chunk failed to seal or open.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// A chunk's plaintext failed to parse.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// A chunk index past the end of the sequence.
    #[error("chunk {0} out of range")]
    ChunkOutOfRange(usize),
}

impl TempSortError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}

/// An entry type that can live in a [`Temp`] sequence.
///
/// The contract is small: a strict comparator (equality is forbidden
/// in a sequence), a marshaller with an exact size estimate, and an
/// unmarshaller.
pub trait TempEntry: Sized {
    /// Strict total order for the sequence.
    fn compare(a: &Self, b: &Self) -> std::cmp::Ordering;

    /// Exact size of the marshalled form in bytes.
    fn marshalled_size(&self) -> usize;

    /// Serialise into `w`.
    fn marshal(&self, w: &mut MarshalWriter);

    /// Parse one entry from `r`.
    fn unmarshal(r: &mut MarshalReader<'_>) -> Result<Self, MarshalError>;
}
