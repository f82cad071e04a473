//! The two-pass write pipeline: rotate sorted chunks, then merge.

use crate::temp::{chunk_path, SORTED_EXT};
use crate::{Temp, TempEntry, TempSortError};
use cling_core::crypto::{Cipher, RawKey};
use cling_core::marshal::{MarshalReader, MarshalWriter};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default ceiling for a chunk's marshalled size.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

const RAW_EXT: &str = "raw";

/// Accumulates entries and writes them out as a sorted [`Temp`].
///
/// Entries arrive in any order. Full chunks are sorted, sealed under
/// an ephemeral per-writer key, and spilled to `<n>.raw` files;
/// [`TempWriter::finalize`] merges the raw chunks into `<n>.sorted`
/// files and deletes the raw ones.
pub struct TempWriter<T: TempEntry> {
    dir: PathBuf,
    cipher: Cipher,
    max_chunk_size: usize,
    chunk: Vec<T>,
    chunk_bytes: usize,
    raw_chunks: usize,
    total_entries: u64,
}

impl<T: TempEntry> TempWriter<T> {
    /// A writer spilling into `dir` with the default chunk size.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, TempSortError> {
        Self::with_max_chunk_size(dir, DEFAULT_MAX_CHUNK_SIZE)
    }

    /// A writer spilling into `dir`, rotating chunks before their
    /// marshalled size would exceed `max_chunk_size`.
    pub fn with_max_chunk_size(
        dir: impl Into<PathBuf>,
        max_chunk_size: usize,
    ) -> Result<Self, TempSortError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| TempSortError::io(format!("create {}", dir.display()), e))?;
        let key = RawKey::new_random()?;
        Ok(Self {
            dir,
            cipher: Cipher::new(&key),
            max_chunk_size,
            chunk: Vec::new(),
            chunk_bytes: 0,
            raw_chunks: 0,
            total_entries: 0,
        })
    }

    /// Add an entry. Rotates the in-memory chunk to disk when the
    /// entry would push it past the chunk size limit.
    pub fn add(&mut self, entry: T) -> Result<(), TempSortError> {
        let size = entry.marshalled_size();
        if !self.chunk.is_empty() && self.chunk_bytes + size > self.max_chunk_size {
            self.rotate_chunk()?;
        }
        self.chunk.push(entry);
        self.chunk_bytes += size;
        self.total_entries += 1;
        Ok(())
    }

    /// Entries added so far.
    pub fn len(&self) -> u64 {
        self.total_entries
    }

    /// True when nothing was added.
    pub fn is_empty(&self) -> bool {
        self.total_entries == 0
    }

    fn rotate_chunk(&mut self) -> Result<(), TempSortError> {
        self.chunk.sort_by(|a, b| T::compare(a, b));
        for pair in self.chunk.windows(2) {
            if T::compare(&pair[0], &pair[1]) == Ordering::Equal {
                return Err(TempSortError::DuplicateEntry);
            }
        }
        let mut w = MarshalWriter::with_capacity(self.chunk_bytes);
        for entry in &self.chunk {
            entry.marshal(&mut w);
        }
        let plaintext = w.finish()?;
        write_sealed_chunk(&self.dir, RAW_EXT, self.raw_chunks, &self.cipher, &plaintext)?;
        self.raw_chunks += 1;
        self.chunk.clear();
        self.chunk_bytes = 0;
        Ok(())
    }

    /// Rotate the tail chunk and merge everything into a sorted
    /// [`Temp`]. The raw chunks are deleted once the merge succeeds.
    pub fn finalize(mut self) -> Result<Temp<T>, TempSortError> {
        if !self.chunk.is_empty() {
            self.rotate_chunk()?;
        }
        let mut cursors = Vec::with_capacity(self.raw_chunks);
        for index in 0..self.raw_chunks {
            cursors.push(Cursor::open(&self.dir, index, &self.cipher)?);
        }

        let mut out = SortedChunkWriter {
            dir: self.dir.clone(),
            cipher: self.cipher.clone(),
            max_chunk_size: self.max_chunk_size,
            buf: MarshalWriter::new(),
            chunks_written: 0,
        };
        let mut last: Option<T> = None;
        // n-way merge with a linear scan for the minimum; the chunk
        // count stays small enough that a heap buys nothing.
        loop {
            let mut min_index: Option<usize> = None;
            for (i, cursor) in cursors.iter().enumerate() {
                let Some(head) = cursor.head.as_ref() else { continue };
                match min_index {
                    None => min_index = Some(i),
                    Some(m) => {
                        if T::compare(head, cursors[m].head.as_ref().expect("min has a head"))
                            == Ordering::Less
                        {
                            min_index = Some(i);
                        }
                    }
                }
            }
            let Some(min_index) = min_index else { break };
            let entry = cursors[min_index].advance()?.expect("cursor with a head yields it");
            if let Some(prev) = &last {
                if T::compare(prev, &entry) == Ordering::Equal {
                    return Err(TempSortError::DuplicateEntry);
                }
            }
            out.push(&entry)?;
            last = Some(entry);
        }
        let chunk_count = out.finish()?;

        for index in 0..self.raw_chunks {
            let path = chunk_path(&self.dir, index, RAW_EXT);
            std::fs::remove_file(&path)
                .map_err(|e| TempSortError::io(format!("remove {}", path.display()), e))?;
        }
        debug!(
            entries = self.total_entries,
            raw_chunks = self.raw_chunks,
            sorted_chunks = chunk_count,
            "finalized temp sequence"
        );
        Ok(Temp::new(self.dir, self.cipher, chunk_count, self.total_entries))
    }
}

/// One raw chunk being merged: the decrypted entries and a peeked
/// head.
struct Cursor<T: TempEntry> {
    entries: std::vec::IntoIter<T>,
    head: Option<T>,
}

impl<T: TempEntry> Cursor<T> {
    fn open(dir: &Path, index: usize, cipher: &Cipher) -> Result<Self, TempSortError> {
        let path = chunk_path(dir, index, RAW_EXT);
        let sealed = std::fs::read(&path)
            .map_err(|e| TempSortError::io(format!("read chunk {}", path.display()), e))?;
        let plaintext = cipher.decrypt(&sealed, &(index as u64).to_le_bytes())?;
        let mut entries = Vec::new();
        let mut r = MarshalReader::new(&plaintext);
        while r.remaining() > 0 {
            entries.push(T::unmarshal(&mut r)?);
        }
        let mut cursor = Self { entries: entries.into_iter(), head: None };
        cursor.head = cursor.entries.next();
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<Option<T>, TempSortError> {
        let head = self.head.take();
        self.head = self.entries.next();
        Ok(head)
    }
}

/// Second-pass writer producing the `<n>.sorted` chunk files.
struct SortedChunkWriter {
    dir: PathBuf,
    cipher: Cipher,
    max_chunk_size: usize,
    buf: MarshalWriter,
    chunks_written: usize,
}

impl SortedChunkWriter {
    fn push<T: TempEntry>(&mut self, entry: &T) -> Result<(), TempSortError> {
        if !self.buf.is_empty() && self.buf.len() + entry.marshalled_size() > self.max_chunk_size {
            self.rotate()?;
        }
        entry.marshal(&mut self.buf);
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), TempSortError> {
        let buf = std::mem::take(&mut self.buf);
        let plaintext = buf.finish()?;
        write_sealed_chunk(&self.dir, SORTED_EXT, self.chunks_written, &self.cipher, &plaintext)?;
        self.chunks_written += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<usize, TempSortError> {
        if !self.buf.is_empty() {
            self.rotate()?;
        }
        Ok(self.chunks_written)
    }
}

fn write_sealed_chunk(
    dir: &Path,
    ext: &str,
    index: usize,
    cipher: &Cipher,
    plaintext: &[u8],
) -> Result<(), TempSortError> {
    let sealed = cipher.encrypt(plaintext, &(index as u64).to_le_bytes())?;
    let path = chunk_path(dir, index, ext);
    std::fs::write(&path, sealed)
        .map_err(|e| TempSortError::io(format!("write chunk {}", path.display()), e))?;
    Ok(())
}
