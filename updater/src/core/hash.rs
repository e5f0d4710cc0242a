//! Hex digests for artifact integrity checks.

use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::core::types::HashType;

/// Lowercase hex digest of `content`.
pub fn hex_digest(kind: HashType, content: &[u8]) -> String {
    match kind {
        HashType::Sha256 => hex::encode(Sha256::digest(content)),
        HashType::Sha384 => hex::encode(Sha384::digest(content)),
        HashType::Sha512 => hex::encode(Sha512::digest(content)),
    }
}
