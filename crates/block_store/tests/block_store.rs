use block_store::{BlockStore, BlockStoreError, ENTROPY_PROBE_SIZE};
use cling_core::block::{BlockId, MAX_BLOCK_PLAINTEXT_SIZE};
use cling_core::crypto::{CryptoError, RawKey};
use std::path::PathBuf;
use std::sync::Arc;
use storage::{ConfigFile, FileStorage, Storage, StorageError};

fn store_at(root: &std::path::Path, kek: u8, hmac: u8) -> BlockStore<FileStorage> {
    let fs = FileStorage::new(root);
    if !root.join("repository.txt").exists() {
        let mut config = ConfigFile::new();
        config.set("storage", "version", "1");
        fs.init(&config).unwrap();
    }
    BlockStore::new(Arc::new(fs), &RawKey::from_bytes([kek; 32]), RawKey::from_bytes([hmac; 32]))
}

fn block_file(root: &std::path::Path, id: &BlockId) -> PathBuf {
    let hex = id.to_hex();
    root.join("objects").join(&hex[0..2]).join(&hex[2..4]).join(&hex[4..])
}

/// High-entropy deterministic filler (xorshift64).
fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

#[test]
fn write_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);

    let (existed, header) = store.write_block(b"plaintext").unwrap();
    assert!(!existed);

    let (plaintext, read_header) = store.read_block(&header.block_id).unwrap();
    assert_eq!(plaintext, b"plaintext");
    assert_eq!(read_header, header);
}

#[test]
fn second_write_reports_existed_with_same_header() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);

    let (first_existed, first) = store.write_block(b"plaintext").unwrap();
    assert!(!first_existed);
    let (second_existed, second) = store.write_block(b"plaintext").unwrap();
    assert!(second_existed);
    assert_eq!(first, second);
}

#[test]
fn oversized_plaintext_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);
    let data = vec![0u8; MAX_BLOCK_PLAINTEXT_SIZE + 1];
    assert!(matches!(
        store.write_block(&data),
        Err(BlockStoreError::TooLarge(n)) if n == MAX_BLOCK_PLAINTEXT_SIZE + 1
    ));
}

#[test]
fn compressible_content_is_deflated() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);

    let data = b"the same line over and over\n".repeat(4096);
    let (_, header) = store.write_block(&data).unwrap();
    assert!(header.is_deflate());
    assert!((header.encrypted_size as usize) < data.len());

    let (plaintext, _) = store.read_block(&header.block_id).unwrap();
    assert_eq!(plaintext, data);
}

#[test]
fn high_entropy_content_stays_uncompressed() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);

    let data = noise(64 * 1024);
    let (_, header) = store.write_block(&data).unwrap();
    assert!(!header.is_deflate());

    let (plaintext, _) = store.read_block(&header.block_id).unwrap();
    assert_eq!(plaintext, data);
}

#[test]
fn short_content_is_never_probed() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);
    let data = vec![0u8; ENTROPY_PROBE_SIZE - 1];
    let (_, header) = store.write_block(&data).unwrap();
    assert!(!header.is_deflate());
}

#[test]
fn block_ids_are_keyed_per_repository() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let store_a = store_at(dir_a.path(), 1, 2);
    let store_b = store_at(dir_b.path(), 1, 3);

    // Same content, different block-id keys: different addresses.
    assert_ne!(store_a.block_id(b"content"), store_b.block_id(b"content"));

    // Same keys: the address is deterministic.
    let dir_c = tempfile::tempdir().unwrap();
    let store_c = store_at(dir_c.path(), 9, 2);
    assert_eq!(store_a.block_id(b"content"), store_c.block_id(b"content"));
}

#[test]
fn missing_block_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);
    let id = store.block_id(b"never written");
    assert!(matches!(
        store.read_block(&id),
        Err(BlockStoreError::Storage(StorageError::BlockNotFound(_)))
    ));
    assert!(!store.has_block(&id).unwrap());
}

#[test]
fn payload_tamper_fails_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);
    let (_, header) = store.write_block(&noise(8 * 1024)).unwrap();

    let path = block_file(dir.path(), &header.block_id);
    let mut data = std::fs::read(&path).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0x01;
    std::fs::write(&path, data).unwrap();

    assert!(matches!(
        store.read_block(&header.block_id),
        Err(BlockStoreError::Crypto(CryptoError::AuthenticationFailed))
    ));
}

#[test]
fn sealed_dek_tamper_fails_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);
    let (_, header) = store.write_block(b"some block content").unwrap();

    // The sealed DEK sits at header bytes 10..82.
    let path = block_file(dir.path(), &header.block_id);
    let mut data = std::fs::read(&path).unwrap();
    data[40] ^= 0x01;
    std::fs::write(&path, data).unwrap();

    assert!(matches!(
        store.read_block(&header.block_id),
        Err(BlockStoreError::Crypto(CryptoError::AuthenticationFailed))
    ));
}

#[test]
fn wrong_kek_fails_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);
    let (_, header) = store.write_block(b"some block content").unwrap();

    let wrong = store_at(dir.path(), 7, 2);
    assert!(matches!(
        wrong.read_block(&header.block_id),
        Err(BlockStoreError::Crypto(CryptoError::AuthenticationFailed))
    ));
}

#[test]
fn header_only_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path(), 1, 2);
    let (_, header) = store.write_block(b"some block content").unwrap();
    assert_eq!(store.read_block_header(&header.block_id).unwrap(), header);
}
