//! Content-addressed, encrypted block store.
//!
//! Overview
//! - Identity: a block's id is HMAC-SHA-256 of its plaintext under
//!   the repository's block-id key. The keyed address means two
//!   repositories never share ids for the same content, so block
//!   existence cannot be probed across repositories.
//! - Envelope encryption: every block gets a fresh random DEK; the
//!   DEK is sealed under the repository KEK with the block id as
//!   associated data, binding the key to the content. The payload is
//!   sealed under the DEK. Fresh DEK and fresh nonces per block mean
//!   nonce reuse cannot occur.
//! - Compression: payloads that look compressible (Shannon entropy of
//!   the first KiB below 7 bits/byte) are DEFLATE-compressed before
//!   sealing, and kept only when that actually saves 5%.
//! - Blocks are immutable once written; a repeated write of the same
//!   content is a no-op reporting `existed = true`.

#![deny(unsafe_code)]

pub mod content;

use cling_core::block::{
    BlockHeader, BlockId, BLOCK_FLAG_DEFLATE, BLOCK_STORAGE_VERSION, MAX_BLOCK_PLAINTEXT_SIZE,
};
use cling_core::crypto::{hmac_sha256, Cipher, CryptoError, RawKey, ENCRYPTED_KEY_SIZE};
use std::io::{Read, Write};
use std::sync::Arc;
use storage::{Storage, StorageError};
use thiserror::Error;
use tracing::debug;

/// Payloads shorter than this are never probed for compression.
pub const ENTROPY_PROBE_SIZE: usize = 1024;
/// Entropy (bits per byte) at or above which compression is skipped.
pub const ENTROPY_THRESHOLD: f64 = 7.0;
/// A compressed payload must shrink below this fraction to be kept.
pub const COMPRESSION_MAX_RATIO: f64 = 0.95;
const DEFLATE_LEVEL: u32 = 6;

/// Errors from the block store.
#[derive(Debug, Error)]
pub enum BlockStoreError {
    /// The plaintext does not fit a single block.
    #[error("plaintext of {0} bytes exceeds the maximum block plaintext size")]
    TooLarge(usize),
    /// Backend failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Sealing or opening failed; tamper surfaces as
    /// "authentication failed".
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// I/O failure while compressing or streaming content.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// The block's structure is wrong after decryption.
    #[error("corrupt block {id}: {reason}")]
    Corrupt {
        /// The offending block.
        id: BlockId,
        /// What failed.
        reason: String,
    },
}

/// Block store bound to one repository's keys and storage backend.
#[derive(Clone)]
pub struct BlockStore<S: Storage> {
    storage: Arc<S>,
    kek_cipher: Cipher,
    block_id_key: RawKey,
}

impl<S: Storage> BlockStore<S> {
    /// Build a store over `storage` with the repository's KEK and
    /// block-id HMAC key.
    pub fn new(storage: Arc<S>, kek: &RawKey, block_id_key: RawKey) -> Self {
        Self { storage, kek_cipher: Cipher::new(kek), block_id_key }
    }

    /// The keyed content address of `plaintext`.
    pub fn block_id(&self, plaintext: &[u8]) -> BlockId {
        BlockId(hmac_sha256(plaintext, &self.block_id_key))
    }

    /// True when a block with this id is stored.
    pub fn has_block(&self, id: &BlockId) -> Result<bool, BlockStoreError> {
        Ok(self.storage.has_block(id)?)
    }

    /// Load and parse only a block's header.
    pub fn read_block_header(&self, id: &BlockId) -> Result<BlockHeader, BlockStoreError> {
        Ok(self.storage.read_block_header(id)?)
    }

    /// Store `plaintext` as a block. Returns `(existed, header)`;
    /// when the content is already stored nothing is written and the
    /// stored header is returned.
    pub fn write_block(&self, plaintext: &[u8]) -> Result<(bool, BlockHeader), BlockStoreError> {
        if plaintext.len() > MAX_BLOCK_PLAINTEXT_SIZE {
            return Err(BlockStoreError::TooLarge(plaintext.len()));
        }
        let id = self.block_id(plaintext);
        match self.storage.read_block_header(&id) {
            Ok(header) => return Ok((true, header)),
            Err(StorageError::BlockNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let (payload, deflated) = maybe_deflate(plaintext)?;
        let mut flags = 0u64;
        if deflated {
            flags |= BLOCK_FLAG_DEFLATE;
        }

        let dek = RawKey::new_random()?;
        let sealed_dek = self.kek_cipher.encrypt(dek.as_bytes(), &id.0)?;
        let encrypted_dek: [u8; ENCRYPTED_KEY_SIZE] = sealed_dek
            .try_into()
            .expect("a sealed 32-byte key is exactly ENCRYPTED_KEY_SIZE bytes");
        let sealed_payload = Cipher::new(&dek).encrypt(payload.as_ref(), b"")?;

        let header = BlockHeader {
            block_id: id,
            storage_version: BLOCK_STORAGE_VERSION,
            flags,
            encrypted_dek,
            encrypted_size: sealed_payload.len() as u32,
        };
        let mut data = Vec::with_capacity(header.marshal().len() + sealed_payload.len());
        data.extend_from_slice(&header.marshal());
        data.extend_from_slice(&sealed_payload);

        let existed = self.storage.write_block(&id, &data)?;
        if existed {
            // Lost a write race; the stored header is the truth.
            return Ok((true, self.storage.read_block_header(&id)?));
        }
        debug!(block = %id, bytes = plaintext.len(), deflated, "wrote block");
        Ok((false, header))
    }

    /// Load a block and return its plaintext and header. A missing
    /// block surfaces `BlockNotFound`; any tamper surfaces
    /// "authentication failed".
    pub fn read_block(&self, id: &BlockId) -> Result<(Vec<u8>, BlockHeader), BlockStoreError> {
        let (header, sealed_payload) = self.storage.read_block(id)?;
        let dek_bytes = self.kek_cipher.decrypt(&header.encrypted_dek, &id.0)?;
        let dek_bytes: [u8; 32] = dek_bytes.try_into().map_err(|_| BlockStoreError::Corrupt {
            id: *id,
            reason: "sealed DEK does not hold a 32-byte key".to_string(),
        })?;
        let dek = RawKey::from_bytes(dek_bytes);
        let payload = Cipher::new(&dek).decrypt(&sealed_payload, b"")?;
        let plaintext = if header.is_deflate() { inflate(&payload, id)? } else { payload };
        Ok((plaintext, header))
    }
}

/// Probe `plaintext` and DEFLATE it when that is worthwhile.
/// Returns the payload to seal and whether it is compressed.
fn maybe_deflate(plaintext: &[u8]) -> Result<(std::borrow::Cow<'_, [u8]>, bool), BlockStoreError> {
    if plaintext.len() < ENTROPY_PROBE_SIZE {
        return Ok((plaintext.into(), false));
    }
    if shannon_entropy(&plaintext[..ENTROPY_PROBE_SIZE]) >= ENTROPY_THRESHOLD {
        return Ok((plaintext.into(), false));
    }
    let mut encoder = flate2::write::DeflateEncoder::new(
        Vec::with_capacity(plaintext.len() / 2),
        flate2::Compression::new(DEFLATE_LEVEL),
    );
    encoder.write_all(plaintext)?;
    let compressed = encoder.finish()?;
    if (compressed.len() as f64) < (plaintext.len() as f64) * COMPRESSION_MAX_RATIO {
        Ok((compressed.into(), true))
    } else {
        Ok((plaintext.into(), false))
    }
}

fn inflate(payload: &[u8], id: &BlockId) -> Result<Vec<u8>, BlockStoreError> {
    let mut out = Vec::new();
    let mut decoder =
        flate2::read::DeflateDecoder::new(payload).take(MAX_BLOCK_PLAINTEXT_SIZE as u64 + 1);
    decoder.read_to_end(&mut out)?;
    if out.len() > MAX_BLOCK_PLAINTEXT_SIZE {
        return Err(BlockStoreError::Corrupt {
            id: *id,
            reason: "inflated payload exceeds the block plaintext ceiling".to_string(),
        });
    }
    Ok(out)
}

/// Shannon entropy of `data` in bits per byte.
fn shannon_entropy(data: &[u8]) -> f64 {
    let mut counts = [0u32; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &counts {
        if count > 0 {
            let p = f64::from(count) / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}
