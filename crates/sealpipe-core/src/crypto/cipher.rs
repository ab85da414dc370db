use std::fmt;
use std::time::Instant;

use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};

use crate::telemetry::{self, profile, tags};
use crate::{Result, SealError};

use super::kdf::{BASE_NONCE_SIZE, DerivedKey};

const PROFILE_TAG_STACK_CIPHER: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_CIPHER];

/// ChaCha20-Poly1305 context shared read-only by every cipher worker.
///
/// Each chunk is sealed under `base_nonce XOR sequence`, so a frame only
/// opens at the position it was written to.
#[derive(Clone)]
pub struct CipherContext {
    cipher: ChaCha20Poly1305,
    base_nonce: [u8; BASE_NONCE_SIZE],
}

impl CipherContext {
    pub fn new(key: &DerivedKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.key())),
            base_nonce: *key.base_nonce(),
        }
    }

    /// Nonce used for the chunk with `sequence`.
    pub fn nonce_for(&self, sequence: u64) -> [u8; BASE_NONCE_SIZE] {
        let mut nonce = self.base_nonce;
        for (byte, counter) in nonce[4..].iter_mut().zip(sequence.to_le_bytes()) {
            *byte ^= counter;
        }
        nonce
    }

    /// Encrypts `buffer` in place and appends the authentication tag.
    pub fn seal_in_place(&self, sequence: u64, buffer: &mut Vec<u8>) -> Result<()> {
        let start = Instant::now();
        let nonce = self.nonce_for(sequence);
        self.cipher
            .encrypt_in_place(Nonce::from_slice(&nonce), b"", buffer)
            .map_err(|_| SealError::protocol(format!("failed to seal chunk {sequence}")))?;

        telemetry::increment_counter(tags::METRIC_CIPHER_SEAL_COUNT, 1, &[("op", "seal")]);
        profile::event(
            tags::PROFILE_TRANSFORM,
            &PROFILE_TAG_STACK_CIPHER,
            "seal",
            "ok",
            profile::elapsed_us(start),
            "chunk sealed",
        );
        Ok(())
    }

    /// Verifies and decrypts `buffer` in place, stripping the tag.
    ///
    /// Tampered, truncated or misplaced frames fail with `CorruptData`.
    pub fn open_in_place(&self, sequence: u64, buffer: &mut Vec<u8>) -> Result<()> {
        let start = Instant::now();
        let nonce = self.nonce_for(sequence);
        if self
            .cipher
            .decrypt_in_place(Nonce::from_slice(&nonce), b"", buffer)
            .is_err()
        {
            telemetry::increment_counter(
                tags::METRIC_CIPHER_OPEN_FAIL_COUNT,
                1,
                &[("op", "open"), ("result", "error")],
            );
            return Err(SealError::corrupt(format!(
                "frame {sequence} failed authentication"
            )));
        }

        telemetry::increment_counter(tags::METRIC_CIPHER_OPEN_COUNT, 1, &[("op", "open")]);
        profile::event(
            tags::PROFILE_TRANSFORM,
            &PROFILE_TAG_STACK_CIPHER,
            "open",
            "ok",
            profile::elapsed_us(start),
            "chunk opened",
        );
        Ok(())
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_key;

    fn context() -> CipherContext {
        let key = derive_key(b"passphrase", b"cipher-salt", 1, 64).expect("derive");
        CipherContext::new(&key)
    }

    #[test]
    fn nonce_differs_per_sequence() {
        let ctx = context();
        assert_ne!(ctx.nonce_for(1), ctx.nonce_for(2));
        assert_eq!(ctx.nonce_for(0), ctx.base_nonce);
    }

    #[test]
    fn frame_opens_only_at_its_own_sequence() {
        let ctx = context();
        let mut sealed = b"inner frame bytes".to_vec();
        ctx.seal_in_place(3, &mut sealed).expect("seal");
        assert_eq!(sealed.len(), b"inner frame bytes".len() + 16);

        let mut misplaced = sealed.clone();
        assert!(ctx.open_in_place(4, &mut misplaced).is_err());

        ctx.open_in_place(3, &mut sealed).expect("open");
        assert_eq!(sealed, b"inner frame bytes");
    }
}
