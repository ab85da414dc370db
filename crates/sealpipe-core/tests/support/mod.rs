#![allow(dead_code)]

use sealpipe_core::{CipherConfig, CompressionLevel, PipelineConfig};

pub const PASSPHRASE: &str = "correct horse battery staple";

/// Deterministic, poorly compressible test payload.
pub fn pseudo_random_bytes(len: usize) -> Vec<u8> {
    let mut state = 0x1234_5678_9ABC_DEF0u64;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        out.push((state >> 56) as u8);
    }
    out
}

/// Highly compressible payload with some structure.
pub fn text_like_bytes(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog; "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Small KDF cost and a fast compression level keep the tests quick.
pub fn fast_config(chunk_size: usize, workers: usize) -> PipelineConfig {
    fast_config_with_passphrase(PASSPHRASE, chunk_size, workers)
}

pub fn fast_config_with_passphrase(
    passphrase: &str,
    chunk_size: usize,
    workers: usize,
) -> PipelineConfig {
    PipelineConfig::new(passphrase)
        .with_cipher(
            CipherConfig::new(passphrase)
                .with_salt(b"sealpipe-test-salt".to_vec())
                .with_cost(1, 64),
        )
        .with_compression_level(CompressionLevel::FAST)
        .with_chunk_size(chunk_size)
        .with_degree_of_parallelism(workers)
}
