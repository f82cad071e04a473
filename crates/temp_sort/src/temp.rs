//! The finalized sorted sequence and its streaming reader.

use crate::{TempEntry, TempSortError};
use cling_core::crypto::Cipher;
use cling_core::marshal::MarshalReader;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

pub(crate) const SORTED_EXT: &str = "sorted";

pub(crate) fn chunk_path(dir: &Path, index: usize, ext: &str) -> PathBuf {
    dir.join(format!("{index}.{ext}"))
}

/// A finalized, fully sorted on-disk sequence.
///
/// The sealing key lives only inside this value; dropping it makes
/// the chunk files permanently unreadable, so callers that want the
/// disk space back should call [`Temp::remove`].
pub struct Temp<T: TempEntry> {
    dir: PathBuf,
    cipher: Cipher,
    chunk_count: usize,
    len: u64,
    _entries: PhantomData<fn() -> T>,
}

impl<T: TempEntry> Temp<T> {
    pub(crate) fn new(dir: PathBuf, cipher: Cipher, chunk_count: usize, len: u64) -> Self {
        Self { dir, cipher, chunk_count, len, _entries: PhantomData }
    }

    /// Number of entries in the sequence.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when the sequence holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of sorted chunk files.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// The directory holding the chunk files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decrypt chunk `index` and return its raw marshalled bytes,
    /// without parsing entries. Used when a chunk is re-encoded
    /// wholesale (e.g. as a block payload).
    pub fn read_chunk_raw(&self, index: usize) -> Result<Vec<u8>, TempSortError> {
        if index >= self.chunk_count {
            return Err(TempSortError::ChunkOutOfRange(index));
        }
        let path = chunk_path(&self.dir, index, SORTED_EXT);
        let sealed = std::fs::read(&path)
            .map_err(|e| TempSortError::io(format!("read chunk {}", path.display()), e))?;
        Ok(self.cipher.decrypt(&sealed, &(index as u64).to_le_bytes())?)
    }

    /// Stream every entry in order.
    pub fn reader(&self) -> TempReader<'_, T> {
        TempReader { temp: self, chunk_index: 0, buf: Vec::new(), pos: 0, filter: None }
    }

    /// Stream the entries satisfying `filter`, in order.
    pub fn reader_filtered<'a>(
        &'a self,
        filter: Box<dyn Fn(&T) -> bool + 'a>,
    ) -> TempReader<'a, T> {
        TempReader { temp: self, chunk_index: 0, buf: Vec::new(), pos: 0, filter: Some(filter) }
    }

    /// Delete the chunk files. The directory itself belongs to the
    /// caller and is left in place.
    pub fn remove(self) -> Result<(), TempSortError> {
        for index in 0..self.chunk_count {
            let path = chunk_path(&self.dir, index, SORTED_EXT);
            std::fs::remove_file(&path)
                .map_err(|e| TempSortError::io(format!("remove {}", path.display()), e))?;
        }
        Ok(())
    }
}

/// Streaming reader over a [`Temp`], yielding entries in order until
/// exhausted.
pub struct TempReader<'a, T: TempEntry> {
    temp: &'a Temp<T>,
    chunk_index: usize,
    buf: Vec<u8>,
    pos: usize,
    filter: Option<Box<dyn Fn(&T) -> bool + 'a>>,
}

impl<T: TempEntry> TempReader<'_, T> {
    /// The next entry, or `None` at the end of the sequence.
    pub fn next_entry(&mut self) -> Result<Option<T>, TempSortError> {
        loop {
            if self.pos < self.buf.len() {
                let mut r = MarshalReader::new(&self.buf[self.pos..]);
                let entry = T::unmarshal(&mut r)?;
                let consumed = self.buf.len() - self.pos - r.remaining();
                self.pos += consumed;
                match &self.filter {
                    Some(filter) if !filter(&entry) => continue,
                    _ => return Ok(Some(entry)),
                }
            } else if self.chunk_index < self.temp.chunk_count() {
                self.buf = self.temp.read_chunk_raw(self.chunk_index)?;
                self.pos = 0;
                self.chunk_index += 1;
            } else {
                return Ok(None);
            }
        }
    }
}
