use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Result, SealError};

pub const KEY_SIZE: usize = 32;
pub const BASE_NONCE_SIZE: usize = 12;
/// Shortest salt Argon2 accepts.
pub const MIN_SALT_LEN: usize = 8;

/// Key and base nonce stretched from a passphrase. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_SIZE],
    base_nonce: [u8; BASE_NONCE_SIZE],
}

impl DerivedKey {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn base_nonce(&self) -> &[u8; BASE_NONCE_SIZE] {
        &self.base_nonce
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey").finish_non_exhaustive()
    }
}

/// Derives the stream key and base nonce with Argon2id.
///
/// One Argon2 output of `KEY_SIZE + BASE_NONCE_SIZE` bytes is split into the
/// two halves, so both sides of a stream agree on them from the passphrase alone.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    iterations: u32,
    memory_kib: u32,
) -> Result<DerivedKey> {
    if salt.len() < MIN_SALT_LEN {
        return Err(SealError::config(format!(
            "salt must be at least {MIN_SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }

    let params = Params::new(memory_kib, iterations, 1, Some(KEY_SIZE + BASE_NONCE_SIZE))
        .map_err(|error| SealError::KeyDerivation(error.to_string()))?;
    let mut output = [0u8; KEY_SIZE + BASE_NONCE_SIZE];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|error| SealError::KeyDerivation(error.to_string()))?;

    let mut derived = DerivedKey {
        key: [0u8; KEY_SIZE],
        base_nonce: [0u8; BASE_NONCE_SIZE],
    };
    derived.key.copy_from_slice(&output[..KEY_SIZE]);
    derived.base_nonce.copy_from_slice(&output[KEY_SIZE..]);
    output.zeroize();
    Ok(derived)
}
