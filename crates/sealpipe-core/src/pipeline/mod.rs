//! Orchestration of the encode and decode runs.
//!
//! Every run uses the same shape: the calling thread is the producer, each
//! transform stage runs `degree_of_parallelism` scoped workers, and one scoped
//! thread owns the orderer and the destination. All threads are joined before
//! a run returns, so every pooled buffer is back in the pool by then.

mod orderer;
mod producer;
mod stages;
mod state;
mod types;
mod window;

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;

use crate::buffer::{BufferPool, PoolMetricsSnapshot};
use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::core::{RunControl, StageHandle, StageRunner};
use crate::crypto::{CipherContext, derive_key};
use crate::format::{STREAM_HEADER_SIZE, StreamHeader};
use crate::telemetry::worker::{DefaultStageTelemetry, StageTelemetry};
use crate::telemetry::{self, profile, tags};
use crate::types::{
    CompressedChunk, Decoded, DecryptedChunk, EncryptedChunk, PlainChunk, RawChunk,
};
use crate::{Result, SealError};

pub use orderer::{ChunkSink, FrameSink, Orderer, PlainSink};
pub use stages::{compress_chunk, decompress_chunk, decrypt_chunk, encrypt_chunk};
pub use state::PipelineState;
pub use types::{
    ChunkProgress, FnProgressSink, NoopProgress, PipelineOutcome, ProgressSink, RunDirection,
    RunStats,
};

use orderer::OrdererTask;
use producer::{FramesRead, Produced, ProducerContext};
use state::StateCell;
use window::InFlightWindow;

/// Bounded, ordered, parallel compress+encrypt pipeline.
///
/// Key material and the buffer pool are built once in [`Pipeline::new`] and
/// shared by every run. Runs on one instance are serialized.
///
/// # Example
/// ```
/// use std::io::Cursor;
///
/// use sealpipe_core::{CipherConfig, Pipeline, PipelineConfig};
///
/// let config = PipelineConfig::new("correct horse")
///     .with_cipher(CipherConfig::new("correct horse").with_cost(1, 64))
///     .with_chunk_size(4096)
///     .with_degree_of_parallelism(2);
/// let pipeline = Pipeline::new(config)?;
///
/// let sealed = pipeline
///     .compress_and_encrypt(Cursor::new(vec![7u8; 10_000]), Vec::new())?
///     .into_destination();
/// let plain = pipeline
///     .decrypt_and_decompress(Cursor::new(sealed), Vec::new())?
///     .into_destination();
/// assert_eq!(plain, vec![7u8; 10_000]);
/// # Ok::<(), sealpipe_core::SealError>(())
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    cipher: Arc<CipherContext>,
    pool: Arc<BufferPool>,
    state: StateCell,
    run_lock: Mutex<()>,
    telemetry: Arc<dyn StageTelemetry>,
}

impl Pipeline {
    /// Validates `config`, derives the key and allocates the buffer pool.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let key = derive_key(
            config.cipher.passphrase.as_bytes(),
            &config.cipher.salt,
            config.cipher.iterations,
            config.cipher.memory_kib,
        )?;
        let cipher = Arc::new(CipherContext::new(&key));
        let pool = Arc::new(BufferPool::with_strategy(
            config.buffer_capacity(),
            config.allocation_strategy(),
        ));

        Ok(Self {
            config,
            cipher,
            pool,
            state: StateCell::new(),
            run_lock: Mutex::new(()),
            telemetry: Arc::new(DefaultStageTelemetry),
        })
    }

    /// Replaces the telemetry backend used by stage workers.
    pub fn with_stage_telemetry(mut self, telemetry: Arc<dyn StageTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_metrics(&self) -> PoolMetricsSnapshot {
        self.pool.metrics()
    }

    /// Seals everything from the current position of `source` to its end.
    pub fn compress_and_encrypt<R, W>(
        &self,
        source: R,
        destination: W,
    ) -> Result<PipelineOutcome<W>>
    where
        R: Read + Seek,
        W: Write + Send,
    {
        self.compress_and_encrypt_with(
            source,
            destination,
            &CancellationToken::new(),
            &mut NoopProgress,
        )
    }

    /// Like [`compress_and_encrypt`](Self::compress_and_encrypt), observing
    /// `cancel` and reporting every written chunk to `progress`.
    pub fn compress_and_encrypt_with<R, W, P>(
        &self,
        mut source: R,
        destination: W,
        cancel: &CancellationToken,
        progress: &mut P,
    ) -> Result<PipelineOutcome<W>>
    where
        R: Read + Seek,
        W: Write + Send,
        P: ProgressSink + Send,
    {
        let total_len = remaining_len(&mut source)?;
        self.encode(source, total_len, destination, cancel, progress)
    }

    /// Seals exactly `declared_len` bytes from a source that cannot seek.
    ///
    /// Bytes past `declared_len` are not read. A shorter source fails with
    /// `Io(UnexpectedEof)`.
    pub fn compress_and_encrypt_sized<R, W>(
        &self,
        source: R,
        declared_len: u64,
        destination: W,
    ) -> Result<PipelineOutcome<W>>
    where
        R: Read,
        W: Write + Send,
    {
        self.encode(
            source,
            declared_len,
            destination,
            &CancellationToken::new(),
            &mut NoopProgress,
        )
    }

    pub fn decrypt_and_decompress<R, W>(
        &self,
        source: R,
        destination: W,
    ) -> Result<PipelineOutcome<W>>
    where
        R: Read,
        W: Write + Send,
    {
        self.decrypt_and_decompress_with(
            source,
            destination,
            &CancellationToken::new(),
            &mut NoopProgress,
        )
    }

    /// Opens a sealed stream, observing `cancel` and reporting progress.
    ///
    /// On error the destination may hold a partial prefix and must be discarded.
    pub fn decrypt_and_decompress_with<R, W, P>(
        &self,
        source: R,
        destination: W,
        cancel: &CancellationToken,
        progress: &mut P,
    ) -> Result<PipelineOutcome<W>>
    where
        R: Read,
        W: Write + Send,
        P: ProgressSink + Send,
    {
        self.decode(source, destination, cancel, progress)
    }

    fn encode<R, W, P>(
        &self,
        mut source: R,
        total_len: u64,
        destination: W,
        cancel: &CancellationToken,
        progress: &mut P,
    ) -> Result<PipelineOutcome<W>>
    where
        R: Read,
        W: Write + Send,
        P: ProgressSink + Send,
    {
        let direction = RunDirection::Encode;
        let _run = self.begin_run(direction, total_len);
        let started_at = Instant::now();

        let control = RunControl::new(cancel.child_token());
        let window = InFlightWindow::new(self.config.in_flight_window());
        let capacity = self.config.bounded_capacity;
        let workers = self.config.degree_of_parallelism;
        let chunk_size = self.config.chunk_size;
        let level = self.config.compression_level;
        let pending_limit = self.config.reorder_pending_limit;
        let pool = self.pool.as_ref();
        let cipher = self.cipher.as_ref();

        let (raw_tx, raw_rx) = bounded::<RawChunk>(capacity);
        let (compressed_tx, compressed_rx) = bounded::<CompressedChunk>(capacity);
        let (sealed_tx, sealed_rx) = bounded::<EncryptedChunk>(capacity);
        let (end_tx, end_rx) = bounded::<Result<u64>>(1);

        let compress_stage =
            StageRunner::with_telemetry("compress", workers, Arc::clone(&self.telemetry));
        let encrypt_stage =
            StageRunner::with_telemetry("encrypt", workers, Arc::clone(&self.telemetry));

        let (sink, produced, handles) = thread::scope(|scope| {
            let control = &control;
            let window = &window;

            let compress = compress_stage.spawn(
                scope,
                raw_rx,
                compressed_tx,
                control,
                move |_worker_id, chunk| compress_chunk(chunk, pool, level, control.token()),
            );
            let encrypt = encrypt_stage.spawn(
                scope,
                compressed_rx,
                sealed_tx,
                control,
                move |_worker_id, chunk| encrypt_chunk(chunk, cipher),
            );
            let orderer = scope.spawn(move || {
                orderer::run(OrdererTask {
                    orderer: Orderer::new(FrameSink::new(destination, total_len), pending_limit),
                    direction,
                    input: sealed_rx,
                    producer_end: end_rx,
                    control,
                    window,
                    progress,
                })
            });

            let ctx = ProducerContext {
                pool,
                window,
                control,
            };
            let produced =
                match producer::produce_chunks(&mut source, total_len, chunk_size, &ctx, raw_tx) {
                    Ok(produced) => {
                        self.state.advance(PipelineState::Draining);
                        let _ = end_tx.send(Ok(produced.chunks));
                        produced
                    }
                    Err(error) => {
                        control.fail(error);
                        Produced::default()
                    }
                };
            drop(end_tx);

            let sink = join_orderer(orderer, control);
            (sink, produced, [compress, encrypt])
        });

        let result = control.into_result().and_then(|()| {
            let sink = sink.ok_or_else(|| SealError::protocol("orderer exited without a result"))?;
            let stats = self.stats(
                direction,
                started_at,
                produced.bytes_read,
                &sink,
                produced.chunks,
                &window,
                &handles,
            );
            Ok(PipelineOutcome {
                destination: sink.into_destination(),
                stats,
            })
        });
        self.end_run(direction, started_at, result)
    }

    fn decode<R, W, P>(
        &self,
        mut source: R,
        destination: W,
        cancel: &CancellationToken,
        progress: &mut P,
    ) -> Result<PipelineOutcome<W>>
    where
        R: Read,
        W: Write + Send,
        P: ProgressSink + Send,
    {
        let direction = RunDirection::Decode;
        let _run = self.begin_run(direction, 0);
        let started_at = Instant::now();

        let header = match StreamHeader::read(&mut source) {
            Ok(header) => header,
            Err(error) => return self.end_run(direction, started_at, Err(error)),
        };

        let control = RunControl::new(cancel.child_token());
        let window = InFlightWindow::new(self.config.in_flight_window());
        let capacity = self.config.bounded_capacity;
        let workers = self.config.degree_of_parallelism;
        let max_frame_len = self.config.max_frame_len;
        let pending_limit = self.config.reorder_pending_limit;
        let pool = self.pool.as_ref();
        let cipher = self.cipher.as_ref();

        let (sealed_tx, sealed_rx) = bounded::<EncryptedChunk>(capacity);
        let (opened_tx, opened_rx) = bounded::<Decoded<DecryptedChunk>>(capacity);
        let (plain_tx, plain_rx) = bounded::<Decoded<PlainChunk>>(capacity);
        let (end_tx, end_rx) = bounded::<Result<u64>>(1);

        let decrypt_stage =
            StageRunner::with_telemetry("decrypt", workers, Arc::clone(&self.telemetry));
        let decompress_stage =
            StageRunner::with_telemetry("decompress", workers, Arc::clone(&self.telemetry));

        let (sink, produced, handles) = thread::scope(|scope| {
            let control = &control;
            let window = &window;

            // Decode failures ride along with their chunk and surface in stream
            // order, so frames read past the end of the stream cannot fail the run.
            let decrypt = decrypt_stage.spawn(
                scope,
                sealed_rx,
                opened_tx,
                control,
                move |_worker_id, chunk: EncryptedChunk| {
                    Ok(Decoded::new(chunk.sequence, decrypt_chunk(chunk, cipher)))
                },
            );
            let decompress = decompress_stage.spawn(
                scope,
                opened_rx,
                plain_tx,
                control,
                move |_worker_id, opened: Decoded<DecryptedChunk>| {
                    Ok(opened.and_then(|chunk| decompress_chunk(chunk, pool, control.token())))
                },
            );
            let orderer = scope.spawn(move || {
                orderer::run(OrdererTask {
                    orderer: Orderer::new(
                        PlainSink::new(destination, header.total_len),
                        pending_limit,
                    ),
                    direction,
                    input: plain_rx,
                    producer_end: end_rx,
                    control,
                    window,
                    progress,
                })
            });

            // An empty stream is header-only; nothing after it is read.
            let frames = if header.total_len == 0 {
                drop(sealed_tx);
                Ok(FramesRead {
                    produced: Produced::default(),
                    stopped_by: None,
                })
            } else {
                let ctx = ProducerContext {
                    pool,
                    window,
                    control,
                };
                producer::produce_frames(&mut source, max_frame_len, &ctx, sealed_tx)
            };
            let produced = match frames {
                Ok(FramesRead {
                    produced,
                    stopped_by,
                }) => {
                    self.state.advance(PipelineState::Draining);
                    let _ = end_tx.send(stopped_by.map_or(Ok(produced.chunks), Err));
                    produced
                }
                Err(error) => {
                    control.fail(error);
                    Produced::default()
                }
            };
            drop(end_tx);

            let sink = join_orderer(orderer, control);
            (sink, produced, [decrypt, decompress])
        });

        let result = control.into_result().and_then(|()| {
            let sink = sink.ok_or_else(|| SealError::protocol("orderer exited without a result"))?;
            let input_bytes = STREAM_HEADER_SIZE as u64 + produced.bytes_read;
            let stats = self.stats(
                direction,
                started_at,
                input_bytes,
                &sink,
                produced.chunks,
                &window,
                &handles,
            );
            Ok(PipelineOutcome {
                destination: sink.into_destination(),
                stats,
            })
        });
        self.end_run(direction, started_at, result)
    }

    fn begin_run(&self, direction: RunDirection, input_len: u64) -> MutexGuard<'_, ()> {
        let guard = match self.run_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.state.advance(PipelineState::Running);
        self.pool.reset_peak();
        telemetry::increment_counter(
            tags::METRIC_PIPELINE_RUN_COUNT,
            1,
            &[("subsystem", "pipeline")],
        );
        tracing::info!(
            target: tags::LOG_PIPELINE,
            ?direction,
            input_len,
            workers = self.config.degree_of_parallelism,
            chunk_size = self.config.chunk_size,
            bounded_capacity = self.config.bounded_capacity,
            "pipeline run started"
        );
        guard
    }

    fn end_run<T>(
        &self,
        direction: RunDirection,
        started_at: Instant,
        result: Result<T>,
    ) -> Result<T> {
        let elapsed_us = profile::elapsed_us(started_at);
        telemetry::record_histogram(
            tags::METRIC_PIPELINE_RUN_LATENCY_US,
            elapsed_us,
            &[("subsystem", "pipeline")],
        );
        match &result {
            Ok(_) => {
                self.state.advance(PipelineState::Completed);
                tracing::info!(
                    target: tags::LOG_PIPELINE,
                    ?direction,
                    elapsed_us,
                    "pipeline run completed"
                );
            }
            Err(error) => {
                self.state.advance(PipelineState::Faulted);
                telemetry::increment_counter(
                    tags::METRIC_PIPELINE_FAULT_COUNT,
                    1,
                    &[("subsystem", "pipeline")],
                );
                if error.is_cancelled() {
                    tracing::info!(
                        target: tags::LOG_PIPELINE,
                        ?direction,
                        elapsed_us,
                        "pipeline run cancelled"
                    );
                } else {
                    tracing::warn!(
                        target: tags::LOG_PIPELINE,
                        ?direction,
                        elapsed_us,
                        %error,
                        "pipeline run failed"
                    );
                }
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn stats<S: ChunkSink>(
        &self,
        direction: RunDirection,
        started_at: Instant,
        input_bytes: u64,
        sink: &S,
        chunks: u64,
        window: &InFlightWindow,
        handles: &[StageHandle],
    ) -> RunStats {
        RunStats {
            direction,
            elapsed: started_at.elapsed(),
            input_bytes,
            output_bytes: sink.bytes_written(),
            chunks,
            peak_in_flight_chunks: window.peak(),
            pool: self.pool.metrics(),
            stages: handles.iter().map(StageHandle::runtime_snapshot).collect(),
        }
    }
}

/// Seals the rest of `source` into `destination` with a one-shot [`Pipeline`].
pub fn compress_and_encrypt<R, W>(source: R, destination: W, config: &PipelineConfig) -> Result<W>
where
    R: Read + Seek,
    W: Write + Send,
{
    Pipeline::new(config.clone())?
        .compress_and_encrypt(source, destination)
        .map(PipelineOutcome::into_destination)
}

/// Opens a sealed stream into `destination` with a one-shot [`Pipeline`].
pub fn decrypt_and_decompress<R, W>(source: R, destination: W, config: &PipelineConfig) -> Result<W>
where
    R: Read,
    W: Write + Send,
{
    Pipeline::new(config.clone())?
        .decrypt_and_decompress(source, destination)
        .map(PipelineOutcome::into_destination)
}

fn remaining_len<S: Seek>(source: &mut S) -> Result<u64> {
    let position = source.stream_position()?;
    let end = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(position))?;
    Ok(end.saturating_sub(position))
}

fn join_orderer<S>(
    orderer: thread::ScopedJoinHandle<'_, Option<S>>,
    control: &RunControl,
) -> Option<S> {
    match orderer.join() {
        Ok(sink) => sink,
        Err(_) => {
            control.fail(SealError::WorkerPanic { stage: "orderer" });
            None
        }
    }
}
