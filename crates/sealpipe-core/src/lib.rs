pub mod buffer;
pub mod cancel;
pub mod compression;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod telemetry;
pub mod types;

pub use buffer::{AllocationStrategy, BufferPool, PoolMetricsSnapshot, PooledBuffer};
pub use cancel::CancellationToken;
pub use compression::CompressionLevel;
pub use config::{AllocationMode, CipherConfig, PipelineConfig};
pub use crate::core::{
    RunControl, StageHandle, StageRunner, StageRuntimeSnapshot, WorkerRuntimeSnapshot,
};
pub use crypto::{CipherContext, DerivedKey, derive_key};
pub use error::SealError;
pub use pipeline::{
    ChunkProgress, FnProgressSink, NoopProgress, Pipeline, PipelineOutcome, PipelineState,
    ProgressSink, RunDirection, RunStats, compress_and_encrypt, decrypt_and_decompress,
};
pub use telemetry::worker::{DefaultStageTelemetry, StageTelemetry};
pub use types::{
    CompressedChunk, Decoded, DecryptedChunk, EncryptedChunk, PlainChunk, RawChunk, Result,
    Sequenced,
};
