//! File content blocking.
//!
//! Splits a byte stream into content blocks of at most
//! [`MAX_BLOCK_PLAINTEXT_SIZE`], storing each through the block store
//! and accumulating the whole-file SHA-256 and size as it goes. Empty
//! input produces no blocks at all. Identical content re-blocks to
//! the same ids, so repeated backups of an unchanged file write
//! nothing.

use crate::{BlockStore, BlockStoreError};
use cling_core::block::{BlockId, MAX_BLOCK_PLAINTEXT_SIZE};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use storage::Storage;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// What a blocked byte stream boils down to: the fixed metadata
/// fields describing a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Total content size in bytes.
    pub size: u64,
    /// SHA-256 of the whole content.
    pub file_hash: [u8; 32],
    /// The content blocks, in file order.
    pub block_ids: Vec<BlockId>,
}

/// Streaming content writer. Implements [`std::io::Write`]; call
/// [`ContentWriter::finish`] to flush the tail block and obtain the
/// [`FileContent`].
pub struct ContentWriter<'a, S: Storage> {
    store: &'a BlockStore<S>,
    block_size: usize,
    buf: Vec<u8>,
    hasher: Sha256,
    size: u64,
    block_ids: Vec<BlockId>,
}

impl<'a, S: Storage> ContentWriter<'a, S> {
    /// A writer producing maximum-size blocks.
    pub fn new(store: &'a BlockStore<S>) -> Self {
        Self::with_block_size(store, MAX_BLOCK_PLAINTEXT_SIZE)
    }

    /// A writer producing blocks of at most `block_size` plaintext
    /// bytes.
    pub fn with_block_size(store: &'a BlockStore<S>, block_size: usize) -> Self {
        let block_size = block_size.clamp(1, MAX_BLOCK_PLAINTEXT_SIZE);
        Self {
            store,
            block_size,
            buf: Vec::with_capacity(block_size.min(COPY_BUF_SIZE)),
            hasher: Sha256::new(),
            size: 0,
            block_ids: Vec::new(),
        }
    }

    fn flush_block(&mut self) -> Result<(), BlockStoreError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let (_, header) = self.store.write_block(&self.buf)?;
        self.block_ids.push(header.block_id);
        self.buf.clear();
        Ok(())
    }

    /// Flush the tail block and return the content description.
    pub fn finish(mut self) -> Result<FileContent, BlockStoreError> {
        self.flush_block()?;
        Ok(FileContent {
            size: self.size,
            file_hash: self.hasher.finalize().into(),
            block_ids: self.block_ids,
        })
    }
}

impl<S: Storage> Write for ContentWriter<'_, S> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let room = self.block_size - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buf.len() == self.block_size {
                self.flush_block().map_err(std::io::Error::other)?;
            }
        }
        self.hasher.update(data);
        self.size += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // Blocks are cut by size, not by flush; nothing to do.
        Ok(())
    }
}

/// Block an entire reader and return its content description.
pub fn write_content<S: Storage, R: Read>(
    store: &BlockStore<S>,
    mut reader: R,
) -> Result<FileContent, BlockStoreError> {
    let mut writer = ContentWriter::new(store);
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(BlockStoreError::Io)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).map_err(BlockStoreError::Io)?;
    }
    writer.finish()
}

/// Stream the blocks of a file into `out`, returning the byte count
/// and SHA-256 actually read; callers compare those against the
/// file's metadata.
pub fn read_content<S: Storage, W: Write>(
    store: &BlockStore<S>,
    block_ids: &[BlockId],
    mut out: W,
) -> Result<(u64, [u8; 32]), BlockStoreError> {
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    for block_id in block_ids {
        let (plaintext, _) = store.read_block(block_id)?;
        hasher.update(&plaintext);
        size += plaintext.len() as u64;
        out.write_all(&plaintext).map_err(BlockStoreError::Io)?;
    }
    Ok((size, hasher.finalize().into()))
}
