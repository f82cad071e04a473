//! Recovery-code encoding for key material in the config file.
//!
//! Base32 without padding, split into `-`-delimited 4-character groups
//! so the codes survive being read aloud or written down. Any byte
//! slice round-trips losslessly.

use data_encoding::BASE32_NOPAD;
use thiserror::Error;

/// Errors from recovery-code parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryCodeError {
    /// The code contains characters outside the base32 alphabet or is
    /// truncated.
    #[error("invalid recovery code: {0}")]
    Invalid(String),
}

/// Encode `data` as a grouped recovery code.
pub fn format_recovery_code(data: &[u8]) -> String {
    let encoded = BASE32_NOPAD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 4);
    for (i, c) in encoded.chars().enumerate() {
        if i > 0 && i % 4 == 0 {
            out.push('-');
        }
        out.push(c);
    }
    out
}

/// Decode a recovery code back to bytes. Group separators are
/// ignored and lowercase input is accepted.
pub fn parse_recovery_code(code: &str) -> Result<Vec<u8>, RecoveryCodeError> {
    let compact: String =
        code.chars().filter(|c| *c != '-').map(|c| c.to_ascii_uppercase()).collect();
    BASE32_NOPAD
        .decode(compact.as_bytes())
        .map_err(|e| RecoveryCodeError::Invalid(e.to_string()))
}
