//! Block identity and the fixed on-disk block header.
//!
//! A block file is exactly [`BLOCK_HEADER_SIZE`] header bytes followed
//! by the sealed payload. The block id is the object's address (its
//! filename in the file backend), never a header field; readers set it
//! from the address after parsing.

use crate::crypto::{ENCRYPTED_KEY_SIZE, TOTAL_CIPHER_OVERHEAD};
use crate::marshal::{MarshalError, MarshalReader, MarshalWriter};

/// Serialised block header size in bytes.
pub const BLOCK_HEADER_SIZE: usize = 96;
/// Maximum total block size (header + sealed payload) in bytes.
pub const MAX_BLOCK_SIZE: usize = 8 * 1024 * 1024;
/// Maximum plaintext a single block can carry.
pub const MAX_BLOCK_PLAINTEXT_SIZE: usize =
    MAX_BLOCK_SIZE - BLOCK_HEADER_SIZE - TOTAL_CIPHER_OVERHEAD;
/// Storage format version written into every block header.
pub const BLOCK_STORAGE_VERSION: u16 = 1;
/// Header flag bit: payload was DEFLATE-compressed before sealing.
pub const BLOCK_FLAG_DEFLATE: u64 = 1;

const HEADER_PADDING: usize = 10;

/// 32-byte keyed content address: HMAC-SHA-256 of the block plaintext
/// under the repository's block-id key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    /// Hex-encoded lowercase string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character lowercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, MarshalError> {
        let raw = hex::decode(s).map_err(|_| MarshalError::Corrupt("block id is not hex"))?;
        let bytes: [u8; 32] =
            raw.try_into().map_err(|_| MarshalError::Corrupt("block id is not 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Parsed block header.
///
/// `block_id` is filled in from the object address on read and ignored
/// on write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Content address of this block (from the object address).
    pub block_id: BlockId,
    /// Storage format version.
    pub storage_version: u16,
    /// Flag bits; see [`BLOCK_FLAG_DEFLATE`].
    pub flags: u64,
    /// The block's DEK sealed under the repository KEK with the block
    /// id as associated data.
    pub encrypted_dek: [u8; ENCRYPTED_KEY_SIZE],
    /// Size of the sealed payload that follows the header.
    pub encrypted_size: u32,
}

impl BlockHeader {
    /// True when the payload was DEFLATE-compressed before sealing.
    pub fn is_deflate(&self) -> bool {
        self.flags & BLOCK_FLAG_DEFLATE != 0
    }

    /// Serialise into the fixed 96-byte layout.
    pub fn marshal(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut w = MarshalWriter::with_capacity(BLOCK_HEADER_SIZE);
        w.put_u16(self.storage_version);
        w.put_u64(self.flags);
        w.put_raw(&self.encrypted_dek);
        w.put_u32(self.encrypted_size);
        w.put_raw(&[0u8; HEADER_PADDING]);
        let buf = w.finish().expect("fixed-width header marshal cannot fail");
        let mut out = [0u8; BLOCK_HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Parse the fixed 96-byte layout. `block_id` is set from the
    /// caller-supplied address.
    pub fn unmarshal(buf: &[u8], block_id: BlockId) -> Result<Self, MarshalError> {
        let mut r = MarshalReader::new(buf);
        let storage_version = r.u16();
        let flags = r.u64();
        let encrypted_dek: [u8; ENCRYPTED_KEY_SIZE] = r.array();
        let encrypted_size = r.u32();
        let _padding: [u8; HEADER_PADDING] = r.array();
        r.status()?;
        if storage_version != BLOCK_STORAGE_VERSION {
            return Err(MarshalError::UnsupportedVersion {
                found: storage_version,
                expected: BLOCK_STORAGE_VERSION,
            });
        }
        Ok(Self { block_id, storage_version, flags, encrypted_dek, encrypted_size })
    }
}
