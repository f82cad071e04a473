//! The repository key envelope.
//!
//! A passphrase-derived user key seals two repository-lifetime keys:
//! the KEK (which in turn seals every block's DEK) and the block-id
//! HMAC key (which keys the content addresses). Both sealed keys and
//! the KDF salt live in the config file as recovery codes; the salt
//! doubles as associated data of the seals, so tampering with any of
//! the three surfaces as "authentication failed".

use crate::RepositoryError;
use cling_core::crypto::{
    derive_user_key, random_salt, Cipher, CryptoError, EncryptionVersion, RawKey,
    ENCRYPTED_KEY_SIZE, KEY_SIZE, SALT_SIZE,
};
use cling_core::recovery::{format_recovery_code, parse_recovery_code};
use storage::ConfigFile;

pub(crate) const SECTION_STORAGE: &str = "storage";
pub(crate) const SECTION_ENCRYPTION: &str = "encryption";
pub(crate) const KEY_STORAGE_VERSION: &str = "version";
pub(crate) const KEY_ENCRYPTION_VERSION: &str = "version";
pub(crate) const KEY_USER_KEY_SALT: &str = "user-key-salt";
pub(crate) const KEY_ENCRYPTED_KEK: &str = "encrypted-kek";
pub(crate) const KEY_ENCRYPTED_BLOCK_ID_HMAC: &str = "encrypted-block-id-hmac";

pub(crate) const STORAGE_VERSION: &str = "1";

/// The opened repository keys.
pub(crate) struct MasterKeys {
    pub encryption_version: EncryptionVersion,
    pub kek: RawKey,
    pub block_id_hmac: RawKey,
}

/// Seal fresh repository keys under `passphrase` and record them in
/// `config`. Returns the opened keys.
pub(crate) fn seal_new_keys(
    config: &mut ConfigFile,
    passphrase: &[u8],
) -> Result<MasterKeys, RepositoryError> {
    let version = EncryptionVersion::V1;
    let kek = RawKey::new_random()?;
    let block_id_hmac = RawKey::new_random()?;
    seal_into_config(config, passphrase, version, &kek, &block_id_hmac)?;
    Ok(MasterKeys { encryption_version: version, kek, block_id_hmac })
}

/// Seal existing repository keys under a (possibly new) passphrase,
/// with a fresh salt, updating `config` in place.
pub(crate) fn seal_into_config(
    config: &mut ConfigFile,
    passphrase: &[u8],
    version: EncryptionVersion,
    kek: &RawKey,
    block_id_hmac: &RawKey,
) -> Result<(), RepositoryError> {
    let salt = random_salt()?;
    let user_key = derive_user_key(passphrase, &salt, version)?;
    let user_cipher = Cipher::new(&user_key);
    let sealed_kek = user_cipher.encrypt(kek.as_bytes(), &salt)?;
    let sealed_hmac = user_cipher.encrypt(block_id_hmac.as_bytes(), &salt)?;

    config.set(SECTION_STORAGE, KEY_STORAGE_VERSION, STORAGE_VERSION);
    config.set(SECTION_ENCRYPTION, KEY_ENCRYPTION_VERSION, &version.as_u16().to_string());
    config.set(SECTION_ENCRYPTION, KEY_USER_KEY_SALT, &format_recovery_code(&salt));
    config.set(SECTION_ENCRYPTION, KEY_ENCRYPTED_KEK, &format_recovery_code(&sealed_kek));
    config.set(
        SECTION_ENCRYPTION,
        KEY_ENCRYPTED_BLOCK_ID_HMAC,
        &format_recovery_code(&sealed_hmac),
    );
    Ok(())
}

/// Open the key envelope from `config` with `passphrase`.
pub(crate) fn open_keys(
    config: &ConfigFile,
    passphrase: &[u8],
) -> Result<MasterKeys, RepositoryError> {
    let storage_version = config.require(SECTION_STORAGE, KEY_STORAGE_VERSION)?;
    if storage_version != STORAGE_VERSION {
        return Err(RepositoryError::UnsupportedStorageVersion(storage_version.to_string()));
    }
    let version_text = config.require(SECTION_ENCRYPTION, KEY_ENCRYPTION_VERSION)?;
    let version_num: u16 = version_text
        .parse()
        .map_err(|_| RepositoryError::Corrupt("encryption version is not a number".to_string()))?;
    let version = EncryptionVersion::from_u16(version_num)?;

    let salt = decode_fixed::<SALT_SIZE>(config, KEY_USER_KEY_SALT)?;
    let sealed_kek = decode_fixed::<ENCRYPTED_KEY_SIZE>(config, KEY_ENCRYPTED_KEK)?;
    let sealed_hmac = decode_fixed::<ENCRYPTED_KEY_SIZE>(config, KEY_ENCRYPTED_BLOCK_ID_HMAC)?;

    let user_key = derive_user_key(passphrase, &salt, version)?;
    let user_cipher = Cipher::new(&user_key);
    let kek = open_sealed_key(&user_cipher, &sealed_kek, &salt)?;
    let block_id_hmac = open_sealed_key(&user_cipher, &sealed_hmac, &salt)?;
    Ok(MasterKeys { encryption_version: version, kek, block_id_hmac })
}

fn open_sealed_key(
    cipher: &Cipher,
    sealed: &[u8],
    salt: &[u8; SALT_SIZE],
) -> Result<RawKey, RepositoryError> {
    let raw = cipher.decrypt(sealed, salt)?;
    let bytes: [u8; KEY_SIZE] =
        raw.try_into().map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(RawKey::from_bytes(bytes))
}

fn decode_fixed<const N: usize>(
    config: &ConfigFile,
    key: &str,
) -> Result<[u8; N], RepositoryError> {
    let code = config.require(SECTION_ENCRYPTION, key)?;
    let raw = parse_recovery_code(code)
        .map_err(|e| RepositoryError::Corrupt(format!("{SECTION_ENCRYPTION}.{key}: {e}")))?;
    raw.try_into().map_err(|_| {
        RepositoryError::Corrupt(format!("{SECTION_ENCRYPTION}.{key}: unexpected length"))
    })
}
