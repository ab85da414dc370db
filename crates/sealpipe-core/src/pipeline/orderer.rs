use std::io::Write;
use std::time::Instant;

use crossbeam_channel::Receiver;

use crate::cancel;
use crate::core::RunControl;
use crate::format::{self, FRAME_PREFIX_SIZE, ReorderBuffer, STREAM_HEADER_SIZE, StreamHeader};
use crate::telemetry::{self, profile, tags};
use crate::types::{Decoded, EncryptedChunk, PlainChunk, Sequenced};
use crate::{Result, SealError};

use super::types::{ChunkProgress, ProgressSink, RunDirection};
use super::window::InFlightWindow;

const PROFILE_TAG_STACK_ORDERER: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_ORDERER];

/// Destination-side writer used by the [`Orderer`].
pub trait ChunkSink {
    type Chunk: Sequenced;
    type Destination;

    /// Writes one chunk and returns the number of bytes it added.
    fn write_chunk(&mut self, chunk: Self::Chunk) -> Result<u64>;

    /// Whether the destination already holds the whole stream. Later chunks are discarded.
    fn is_complete(&self) -> bool {
        false
    }

    /// Completes the stream after the last chunk.
    fn finish(&mut self) -> Result<()>;

    /// Flushes whatever was written, ignoring errors. Used on failed runs.
    fn flush_best_effort(&mut self);

    fn bytes_written(&self) -> u64;

    fn into_destination(self) -> Self::Destination;
}

/// Writes the stream header followed by one length-prefixed frame per chunk.
#[derive(Debug)]
pub struct FrameSink<W> {
    destination: W,
    header: StreamHeader,
    header_written: bool,
    bytes_written: u64,
}

impl<W: Write> FrameSink<W> {
    pub fn new(destination: W, total_len: u64) -> Self {
        Self {
            destination,
            header: StreamHeader::new(total_len),
            header_written: false,
            bytes_written: 0,
        }
    }

    fn ensure_header(&mut self) -> Result<()> {
        if !self.header_written {
            self.header.write(&mut self.destination)?;
            self.header_written = true;
            self.bytes_written += STREAM_HEADER_SIZE as u64;
        }
        Ok(())
    }
}

impl<W: Write> ChunkSink for FrameSink<W> {
    type Chunk = EncryptedChunk;
    type Destination = W;

    fn write_chunk(&mut self, chunk: EncryptedChunk) -> Result<u64> {
        self.ensure_header()?;
        format::write_frame(&mut self.destination, &chunk.payload)?;
        let written = (FRAME_PREFIX_SIZE + chunk.payload.len()) as u64;
        self.bytes_written += written;
        Ok(written)
    }

    fn finish(&mut self) -> Result<()> {
        self.ensure_header()?;
        self.destination.flush()?;
        Ok(())
    }

    fn flush_best_effort(&mut self) {
        let _ = self.destination.flush();
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn into_destination(self) -> W {
        self.destination
    }
}

/// Writes decoded plaintext, holding it to the length declared by the stream header.
///
/// A chunk that failed to decode is reported when its turn comes.
#[derive(Debug)]
pub struct PlainSink<W> {
    destination: W,
    expected_len: u64,
    bytes_written: u64,
}

impl<W: Write> PlainSink<W> {
    pub fn new(destination: W, expected_len: u64) -> Self {
        Self {
            destination,
            expected_len,
            bytes_written: 0,
        }
    }
}

impl<W: Write> ChunkSink for PlainSink<W> {
    type Chunk = Decoded<PlainChunk>;
    type Destination = W;

    fn write_chunk(&mut self, chunk: Decoded<PlainChunk>) -> Result<u64> {
        let chunk = chunk.outcome?;
        let len = chunk.payload.len() as u64;
        let total = self.bytes_written.saturating_add(len);
        if total > self.expected_len {
            return Err(SealError::corrupt(format!(
                "frame {} decodes past the declared stream length of {} bytes",
                chunk.sequence, self.expected_len
            )));
        }
        self.destination.write_all(&chunk.payload)?;
        self.bytes_written = total;
        Ok(len)
    }

    fn is_complete(&self) -> bool {
        self.bytes_written == self.expected_len
    }

    fn finish(&mut self) -> Result<()> {
        if self.bytes_written != self.expected_len {
            return Err(SealError::corrupt(format!(
                "stream ended after {} of {} declared bytes",
                self.bytes_written, self.expected_len
            )));
        }
        self.destination.flush()?;
        Ok(())
    }

    fn flush_best_effort(&mut self) {
        let _ = self.destination.flush();
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn into_destination(self) -> W {
        self.destination
    }
}

/// Single writer that restores sequence order before chunks reach the sink.
pub struct Orderer<S: ChunkSink> {
    sink: S,
    reorder: ReorderBuffer<S::Chunk>,
    chunks_written: u64,
    chunks_discarded: u64,
}

impl<S: ChunkSink> Orderer<S> {
    pub fn new(sink: S, pending_limit: usize) -> Self {
        Self {
            sink,
            reorder: ReorderBuffer::with_limit(pending_limit),
            chunks_written: 0,
            chunks_discarded: 0,
        }
    }

    /// Accepts one chunk and writes every chunk that became contiguous.
    ///
    /// `on_written` runs after each write, once the chunk's buffer is dropped.
    /// Once the sink is complete, arriving and parked chunks are discarded.
    pub fn accept<F>(&mut self, chunk: S::Chunk, mut on_written: F) -> Result<()>
    where
        F: FnMut(u64, u64, &Self),
    {
        if self.sink.is_complete() {
            self.chunks_discarded += 1;
            return Ok(());
        }
        let sequence = chunk.sequence();
        let ready = self.reorder.push(sequence, chunk)?;
        telemetry::set_gauge(
            tags::METRIC_ORDERER_PENDING,
            self.reorder.pending_len() as u64,
            &[("subsystem", "orderer")],
        );

        for chunk in ready {
            if self.sink.is_complete() {
                self.chunks_discarded += 1;
                continue;
            }
            let started_at = Instant::now();
            let sequence = chunk.sequence();
            let written = self.sink.write_chunk(chunk)?;
            self.chunks_written += 1;

            let labels = [("subsystem", "orderer"), ("op", "write")];
            telemetry::increment_counter(tags::METRIC_ORDERER_WRITE_COUNT, 1, &labels);
            telemetry::increment_counter(tags::METRIC_ORDERER_WRITE_BYTES, written, &labels);
            profile::event(
                tags::PROFILE_ORDERER,
                &PROFILE_TAG_STACK_ORDERER,
                "write",
                "ok",
                profile::elapsed_us(started_at),
                "chunk written",
            );

            on_written(sequence, written, self);
        }
        if self.sink.is_complete() && self.reorder.pending_len() > 0 {
            self.chunks_discarded += self.reorder.discard_pending() as u64;
            telemetry::set_gauge(tags::METRIC_ORDERER_PENDING, 0, &[("subsystem", "orderer")]);
        }
        Ok(())
    }

    /// Verifies that every expected chunk was written, then completes the sink.
    ///
    /// A complete sink finishes regardless of chunks read past its end.
    pub fn finish(&mut self, expected_chunks: u64) -> Result<()> {
        if self.sink.is_complete() {
            return self.sink.finish();
        }
        if self.reorder.pending_len() > 0 {
            return Err(SealError::protocol(format!(
                "input closed with chunks {:?} still waiting for sequence {}",
                self.reorder.pending_sequences(),
                self.reorder.next_expected()
            )));
        }
        if self.chunks_written != expected_chunks {
            return Err(SealError::protocol(format!(
                "wrote {} chunks but the producer emitted {expected_chunks}",
                self.chunks_written
            )));
        }
        self.sink.finish()
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// Chunks dropped because they arrived after the sink was complete.
    pub fn chunks_discarded(&self) -> u64 {
        self.chunks_discarded
    }

    pub fn is_complete(&self) -> bool {
        self.sink.is_complete()
    }

    pub fn bytes_written(&self) -> u64 {
        self.sink.bytes_written()
    }

    pub fn pending_len(&self) -> usize {
        self.reorder.pending_len()
    }

    pub fn next_expected(&self) -> u64 {
        self.reorder.next_expected()
    }

    fn flush_best_effort(&mut self) {
        self.sink.flush_best_effort();
    }
}

/// Inputs of the orderer thread for one run.
pub(crate) struct OrdererTask<'a, S: ChunkSink, P> {
    pub orderer: Orderer<S>,
    pub direction: RunDirection,
    pub input: Receiver<S::Chunk>,
    /// Chunk count from the producer, or the read error that stopped it.
    pub producer_end: Receiver<Result<u64>>,
    pub control: &'a RunControl,
    pub window: &'a InFlightWindow,
    pub progress: &'a mut P,
}

/// Drains the final stage in order. Returns the finished sink, or `None` after
/// recording a fault on `control`.
pub(crate) fn run<S, P>(task: OrdererTask<'_, S, P>) -> Option<S>
where
    S: ChunkSink,
    P: ProgressSink,
{
    let OrdererTask {
        mut orderer,
        direction,
        input,
        producer_end,
        control,
        window,
        progress,
    } = task;
    let token = control.token();

    let drained = loop {
        let chunk = match cancel::recv(&input, token) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break Ok(()),
            Err(error) => break Err(error),
        };
        let discarded_before = orderer.chunks_discarded();
        let accepted = orderer.accept(chunk, |sequence, written, orderer| {
            if orderer.is_complete() {
                window.close();
            }
            window.release();
            progress.on_chunk_written(ChunkProgress {
                direction,
                sequence,
                bytes_written: written,
                chunks_written: orderer.chunks_written(),
                total_bytes_written: orderer.bytes_written(),
            });
        });
        for _ in discarded_before..orderer.chunks_discarded() {
            window.release();
        }
        if let Err(error) = accepted {
            break Err(error);
        }
    };

    let finished = drained
        .and_then(|()| cancel::recv(&producer_end, token)?.ok_or(SealError::Cancelled))
        .and_then(|end| match end {
            Ok(expected) => orderer.finish(expected),
            Err(error) if !orderer.is_complete() => Err(error),
            Err(error) => {
                tracing::debug!(
                    target: tags::LOG_ORDERER,
                    %error,
                    "ignored unreadable bytes after the end of the stream"
                );
                let written = orderer.chunks_written();
                orderer.finish(written)
            }
        });

    match finished {
        Ok(()) => {
            tracing::debug!(
                target: tags::LOG_ORDERER,
                chunks = orderer.chunks_written(),
                discarded = orderer.chunks_discarded(),
                bytes = orderer.bytes_written(),
                "orderer flushed destination"
            );
            Some(orderer.into_sink())
        }
        Err(error) => {
            orderer.flush_best_effort();
            control.fail(error);
            None
        }
    }
}
