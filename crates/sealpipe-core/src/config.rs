use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::buffer::AllocationStrategy;
use crate::compression::CompressionLevel;
use crate::crypto::MIN_SALT_LEN;
use crate::format::{
    DEFAULT_MAX_FRAME_LEN, DEFAULT_REORDER_PENDING_LIMIT, MAX_CHUNK_SIZE, MIN_FRAME_LEN,
    max_encoded_frame_len,
};
use crate::{Result, SealError};

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_BOUNDED_CAPACITY: usize = 8;
pub const DEFAULT_KDF_ITERATIONS: u32 = 2;
pub const DEFAULT_KDF_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_SALT: &[u8] = b"sealpipe.stream.salt";

/// How chunk buffers are sourced during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Reuse buffers through a capped pool.
    #[default]
    Pooled,
    /// Allocate every buffer fresh and drop it after use.
    Fresh,
}

/// Passphrase-based key material settings.
///
/// The passphrase is never serialized and is redacted from `Debug`.
/// Serde defaults must stay per field since the type implements `Drop`.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CipherConfig {
    #[serde(default, skip_serializing)]
    pub passphrase: String,
    #[serde(default = "default_salt")]
    pub salt: Vec<u8>,
    /// Argon2id time cost.
    #[serde(default = "default_kdf_iterations")]
    pub iterations: u32,
    /// Argon2id memory cost in KiB.
    #[serde(default = "default_kdf_memory_kib")]
    pub memory_kib: u32,
}

fn default_salt() -> Vec<u8> {
    DEFAULT_SALT.to_vec()
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

fn default_kdf_memory_kib() -> u32 {
    DEFAULT_KDF_MEMORY_KIB
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            passphrase: String::new(),
            salt: default_salt(),
            iterations: default_kdf_iterations(),
            memory_kib: default_kdf_memory_kib(),
        }
    }
}

impl CipherConfig {
    pub fn new(passphrase: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.passphrase = passphrase.into();
        config
    }

    pub fn with_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn with_cost(mut self, iterations: u32, memory_kib: u32) -> Self {
        self.iterations = iterations;
        self.memory_kib = memory_kib;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.passphrase.is_empty() {
            return Err(SealError::config("passphrase must not be empty"));
        }
        if self.salt.len() < MIN_SALT_LEN {
            return Err(SealError::config(format!(
                "salt must be at least {MIN_SALT_LEN} bytes, got {}",
                self.salt.len()
            )));
        }
        if self.iterations == 0 {
            return Err(SealError::config("kdf iterations must be at least 1"));
        }
        if self.memory_kib < 8 {
            return Err(SealError::config("kdf memory must be at least 8 KiB"));
        }
        Ok(())
    }
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("passphrase", &"<redacted>")
            .field("salt_len", &self.salt.len())
            .field("iterations", &self.iterations)
            .field("memory_kib", &self.memory_kib)
            .finish()
    }
}

/// Tuning knobs for a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Workers per transform stage.
    pub degree_of_parallelism: usize,
    /// Plaintext bytes per chunk on encode.
    pub chunk_size: usize,
    /// Capacity of every inter-stage queue.
    pub bounded_capacity: usize,
    pub compression_level: CompressionLevel,
    pub allocation: AllocationMode,
    /// Pool ceiling; `None` sizes the pool to `bounded_capacity + degree_of_parallelism`.
    pub pool_max_buffers: Option<usize>,
    /// Largest frame the decoder accepts.
    pub max_frame_len: usize,
    /// Out-of-order chunks the orderer may park before failing the run.
    pub reorder_pending_limit: usize,
    pub cipher: CipherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            degree_of_parallelism: num_cpus::get().max(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
            bounded_capacity: DEFAULT_BOUNDED_CAPACITY,
            compression_level: CompressionLevel::default(),
            allocation: AllocationMode::default(),
            pool_max_buffers: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            reorder_pending_limit: DEFAULT_REORDER_PENDING_LIMIT,
            cipher: CipherConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            cipher: CipherConfig::new(passphrase),
            ..Self::default()
        }
    }

    pub fn with_degree_of_parallelism(mut self, workers: usize) -> Self {
        self.degree_of_parallelism = workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_bounded_capacity(mut self, capacity: usize) -> Self {
        self.bounded_capacity = capacity;
        self
    }

    pub fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_allocation(mut self, allocation: AllocationMode) -> Self {
        self.allocation = allocation;
        self
    }

    pub fn with_pool_max_buffers(mut self, max_buffers: usize) -> Self {
        self.pool_max_buffers = Some(max_buffers);
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_reorder_pending_limit(mut self, limit: usize) -> Self {
        self.reorder_pending_limit = limit;
        self
    }

    pub fn with_cipher(mut self, cipher: CipherConfig) -> Self {
        self.cipher = cipher;
        self
    }

    /// Queue slots plus workers per stage (`K + P`), the ceiling on buffers held at once.
    pub fn buffer_budget(&self) -> usize {
        self.bounded_capacity
            .saturating_add(self.degree_of_parallelism)
    }

    /// Chunks admitted but not yet written, at most.
    ///
    /// A chunk holds up to two buffers while it is transformed, so the
    /// window is half the buffer budget.
    pub fn in_flight_window(&self) -> usize {
        (self.buffer_budget() / 2).max(1)
    }

    /// Smallest pool that cannot deadlock: two buffers per admitted chunk.
    pub fn min_pool_buffers(&self) -> usize {
        self.in_flight_window().saturating_mul(2)
    }

    /// Capacity reserved for each pooled buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.chunk_size.saturating_add(self.chunk_size / 2)
    }

    pub fn allocation_strategy(&self) -> AllocationStrategy {
        match self.allocation {
            AllocationMode::Pooled => AllocationStrategy::Pooled {
                max_buffers: self
                    .pool_max_buffers
                    .unwrap_or_else(|| self.buffer_budget()),
            },
            AllocationMode::Fresh => AllocationStrategy::Fresh,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.degree_of_parallelism == 0 {
            return Err(SealError::config("degree_of_parallelism must be at least 1"));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(SealError::config(format!(
                "chunk_size {} outside 1..={MAX_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if self.bounded_capacity == 0 {
            return Err(SealError::config("bounded_capacity must be at least 1"));
        }
        if self.max_frame_len < MIN_FRAME_LEN || self.max_frame_len > i32::MAX as usize {
            return Err(SealError::config(format!(
                "max_frame_len {} outside {MIN_FRAME_LEN}..={}",
                self.max_frame_len,
                i32::MAX
            )));
        }
        let frame_bound = max_encoded_frame_len(self.chunk_size);
        if frame_bound > self.max_frame_len {
            return Err(SealError::config(format!(
                "chunk_size {} can produce {frame_bound}-byte frames, above max_frame_len {}",
                self.chunk_size, self.max_frame_len
            )));
        }
        if self.reorder_pending_limit < self.in_flight_window() {
            return Err(SealError::config(format!(
                "reorder_pending_limit {} is below the in-flight window of {} chunks",
                self.reorder_pending_limit,
                self.in_flight_window()
            )));
        }
        if let AllocationStrategy::Pooled { max_buffers } = self.allocation_strategy() {
            let required = self.min_pool_buffers();
            if max_buffers == 0 || max_buffers < required {
                return Err(SealError::config(format!(
                    "pool of {max_buffers} buffers can deadlock; the in-flight window needs {required}"
                )));
            }
        }
        self.cipher.validate()
    }
}
