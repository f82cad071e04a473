//! The revision record and its serialised form.
//!
//! A revision is serialised inside a block whose plaintext begins
//! with the magic string `cling-rev`; the id of that block is the
//! revision's id. The all-zero id denotes the root: the empty state
//! before the first commit.

use cling_core::block::BlockId;
use cling_core::marshal::{MarshalError, MarshalReader, MarshalWriter};
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic prefix of every revision block.
pub const REVISION_MAGIC: &str = "cling-rev";

/// Identity of a revision: the id of the block holding its record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RevisionId(pub BlockId);

impl RevisionId {
    /// The root id: 32 zero bytes, parent of the first revision.
    pub const ROOT: Self = Self(BlockId([0u8; 32]));

    /// True for the root id.
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    /// Hex-encoded lowercase string (the ref format).
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Parse the 64-character ref format.
    pub fn from_hex(s: &str) -> Result<Self, MarshalError> {
        Ok(Self(BlockId::from_hex(s)?))
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A snapshot description: linked to its parent, carrying the blocks
/// whose concatenated plaintexts form the sorted entry stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Commit time, seconds since the epoch.
    pub timestamp_sec: i64,
    /// Commit time, nanosecond part.
    pub timestamp_nsec: i32,
    /// Author string.
    pub author: String,
    /// Commit message.
    pub message: String,
    /// Parent revision; [`RevisionId::ROOT`] for the first revision.
    pub parent: RevisionId,
    /// Data blocks of the entry stream, in order.
    pub blocks: Vec<BlockId>,
}

impl Revision {
    /// Serialise, led by the magic prefix.
    pub fn marshal(&self) -> Result<Vec<u8>, MarshalError> {
        let mut w = MarshalWriter::new();
        w.put_string(REVISION_MAGIC);
        w.put_i64(self.timestamp_sec);
        w.put_i32(self.timestamp_nsec);
        w.put_string(&self.author);
        w.put_string(&self.message);
        w.put_raw(&self.parent.0 .0);
        w.put_u32(self.blocks.len() as u32);
        for block in &self.blocks {
            w.put_raw(&block.0);
        }
        w.finish()
    }

    /// Parse a revision block's plaintext. A missing magic prefix
    /// fails with [`MarshalError::BadMagic`].
    pub fn unmarshal(buf: &[u8]) -> Result<Self, MarshalError> {
        let mut r = MarshalReader::new(buf);
        let magic = r.string();
        r.status()?;
        if magic != REVISION_MAGIC {
            return Err(MarshalError::BadMagic);
        }
        let timestamp_sec = r.i64();
        let timestamp_nsec = r.i32();
        let author = r.string();
        let message = r.string();
        let parent = RevisionId(BlockId(r.array()));
        let block_count = r.u32() as usize;
        let mut blocks = Vec::with_capacity(block_count.min(4096));
        for _ in 0..block_count {
            blocks.push(BlockId(r.array()));
            r.status()?;
        }
        r.finish()?;
        Ok(Self { timestamp_sec, timestamp_nsec, author, message, parent, blocks })
    }
}

/// The current wall-clock time as a revision timestamp.
pub fn now_timestamp() -> (i64, i32) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_secs() as i64, elapsed.subsec_nanos() as i32),
        Err(_) => (0, 0),
    }
}
