use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::PoolMetricsSnapshot;
use crate::core::StageRuntimeSnapshot;

/// Direction of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDirection {
    /// Chunk, compress, encrypt, write frames.
    Encode,
    /// Read frames, decrypt, decompress, write plaintext.
    Decode,
}

/// Emitted by the orderer after each chunk reaches the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub direction: RunDirection,
    pub sequence: u64,
    /// Bytes this chunk added to the destination.
    pub bytes_written: u64,
    pub chunks_written: u64,
    pub total_bytes_written: u64,
}

/// Receives progress events from the orderer thread.
pub trait ProgressSink {
    fn on_chunk_written(&mut self, progress: ChunkProgress);
}

/// Progress sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_chunk_written(&mut self, _progress: ChunkProgress) {}
}

/// Adapts a closure into a [`ProgressSink`].
pub struct FnProgressSink<F>(pub F);

impl<F> ProgressSink for FnProgressSink<F>
where
    F: FnMut(ChunkProgress),
{
    fn on_chunk_written(&mut self, progress: ChunkProgress) {
        (self.0)(progress);
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub direction: RunDirection,
    pub elapsed: Duration,
    /// Bytes consumed from the source.
    pub input_bytes: u64,
    /// Bytes written to the destination.
    pub output_bytes: u64,
    pub chunks: u64,
    /// Highest number of chunks admitted but not yet written.
    pub peak_in_flight_chunks: usize,
    pub pool: PoolMetricsSnapshot,
    pub stages: Vec<StageRuntimeSnapshot>,
}

/// Destination handed back after a successful run, with its statistics.
#[derive(Debug)]
pub struct PipelineOutcome<W> {
    pub destination: W,
    pub stats: RunStats,
}

impl<W> PipelineOutcome<W> {
    pub fn into_destination(self) -> W {
        self.destination
    }
}
