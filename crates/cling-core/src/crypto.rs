//! AEAD cipher wrapping, key derivation, HMAC, and random material.
//!
//! The repository seals everything with XChaCha20-Poly1305: a random
//! 24-byte nonce is generated per seal and prepended to the
//! ciphertext, so a sealed value is always `nonce || ciphertext ||
//! tag`. User keys are derived from passphrases with Argon2id; block
//! identity is HMAC-SHA-256 under a repository-private key so two
//! repositories never share addresses for the same content.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key size in bytes.
pub const KEY_SIZE: usize = 32;
/// XChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;
/// Poly1305 authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;
/// Bytes added to a plaintext by sealing it (prepended nonce + tag).
pub const TOTAL_CIPHER_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
/// Key-derivation salt size in bytes.
pub const SALT_SIZE: usize = 32;
/// Size of a sealed 32-byte key (`nonce || ciphertext || tag`).
pub const ENCRYPTED_KEY_SIZE: usize = KEY_SIZE + TOTAL_CIPHER_OVERHEAD;
/// Minimum accepted passphrase length in bytes.
pub const MIN_PASSPHRASE_LEN: usize = 12;
/// Maximum accepted passphrase length in bytes.
pub const MAX_PASSPHRASE_LEN: usize = 256;

/// Errors from the crypto primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD tag verification failed; the data or its associated data
    /// was tampered with, or the key is wrong. Never recovered.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// Sealing failed inside the AEAD implementation.
    #[error("encryption failed")]
    EncryptionFailed,
    /// The passphrase is outside the accepted length range.
    #[error("passphrase must be {MIN_PASSPHRASE_LEN}..={MAX_PASSPHRASE_LEN} bytes, got {0}")]
    PassphraseLength(usize),
    /// Argon2id rejected its parameters or failed to derive.
    #[error("key derivation: {0}")]
    KeyDerivation(String),
    /// The system random source failed.
    #[error("random source: {0}")]
    RandomSource(String),
    /// The repository uses an encryption version this build does not
    /// understand.
    #[error("unsupported encryption version {0}")]
    UnsupportedVersion(u16),
}

/// Encryption format version. KDF parameters are fixed per version;
/// changing any of them requires a new variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionVersion {
    /// XChaCha20-Poly1305 + Argon2id(t=5, m=65535 KiB, lanes=1).
    V1,
}

impl EncryptionVersion {
    /// Decode from the on-disk `u16`.
    pub fn from_u16(v: u16) -> Result<Self, CryptoError> {
        match v {
            1 => Ok(Self::V1),
            other => Err(CryptoError::UnsupportedVersion(other)),
        }
    }

    /// The on-disk `u16` for this version.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::V1 => 1,
        }
    }

    fn kdf_params(self) -> Result<argon2::Params, CryptoError> {
        match self {
            Self::V1 => argon2::Params::new(65_535, 5, 1, Some(KEY_SIZE))
                .map_err(|e| CryptoError::KeyDerivation(e.to_string())),
        }
    }
}

/// A 32-byte symmetric key. Zeroed on drop; never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RawKey([u8; KEY_SIZE]);

impl RawKey {
    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh key from the system random source.
    pub fn new_random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_SIZE];
        random_bytes(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for RawKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawKey(..)")
    }
}

/// An XChaCha20-Poly1305 cipher bound to one key. Cheap to clone per
/// thread; immutable and safe to share.
#[derive(Clone)]
pub struct Cipher {
    aead: XChaCha20Poly1305,
}

impl Cipher {
    /// Build a cipher for `key`.
    pub fn new(key: &RawKey) -> Self {
        Self { aead: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())) }
    }

    /// Sealed size of a plaintext of `plaintext_len` bytes.
    pub fn encrypted_len(plaintext_len: usize) -> usize {
        plaintext_len + TOTAL_CIPHER_OVERHEAD
    }

    /// Seal `plaintext` with associated data `ad`, returning
    /// `nonce || ciphertext || tag` with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        random_bytes(&mut nonce)?;
        let sealed = self
            .aead
            .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: ad })
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open `data` (`nonce || ciphertext || tag`) with associated data
    /// `ad`. Any tampering surfaces as `AuthenticationFailed`.
    pub fn decrypt(&self, data: &[u8], ad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < TOTAL_CIPHER_OVERHEAD {
            return Err(CryptoError::AuthenticationFailed);
        }
        let (nonce, sealed) = data.split_at(NONCE_SIZE);
        self.aead
            .decrypt(XNonce::from_slice(nonce), Payload { msg: sealed, aad: ad })
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// Check the passphrase length policy.
pub fn validate_passphrase(passphrase: &[u8]) -> Result<(), CryptoError> {
    if passphrase.len() < MIN_PASSPHRASE_LEN || passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(CryptoError::PassphraseLength(passphrase.len()));
    }
    Ok(())
}

/// Derive the user key from a passphrase and salt with Argon2id.
pub fn derive_user_key(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
    version: EncryptionVersion,
) -> Result<RawKey, CryptoError> {
    validate_passphrase(passphrase)?;
    let params = version.kdf_params()?;
    let argon = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut out = [0u8; KEY_SIZE];
    argon
        .hash_password_into(passphrase, salt, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(RawKey::from_bytes(out))
}

/// HMAC-SHA-256 of `data` under `key`.
pub fn hmac_sha256(data: &[u8], key: &RawKey) -> [u8; 32] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Fill `buf` from the system random source.
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng.try_fill_bytes(buf).map_err(|e| CryptoError::RandomSource(e.to_string()))
}

/// Draw a fresh KDF salt.
pub fn random_salt() -> Result<[u8; SALT_SIZE], CryptoError> {
    let mut salt = [0u8; SALT_SIZE];
    random_bytes(&mut salt)?;
    Ok(salt)
}
