//! Key derivation and per-chunk authenticated encryption.

mod cipher;
mod kdf;

pub use cipher::CipherContext;
pub use kdf::{BASE_NONCE_SIZE, DerivedKey, KEY_SIZE, MIN_SALT_LEN, derive_key};
