use std::io::{self, ErrorKind, Read};

use crossbeam_channel::Sender;

use crate::buffer::BufferPool;
use crate::cancel;
use crate::core::RunControl;
use crate::format::{self, FRAME_PREFIX_SIZE};
use crate::telemetry::tags;
use crate::types::{EncryptedChunk, RawChunk};
use crate::{Result, SealError};

use super::window::InFlightWindow;

/// What a producer pushed into the first stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Produced {
    pub chunks: u64,
    pub bytes_read: u64,
}

/// How the decode producer stopped.
#[derive(Debug)]
pub(crate) struct FramesRead {
    pub produced: Produced,
    /// Read failure that ended the loop. The orderer decides whether it matters.
    pub stopped_by: Option<SealError>,
}

/// Shared resources the producer blocks on.
pub(crate) struct ProducerContext<'a> {
    pub pool: &'a BufferPool,
    pub window: &'a InFlightWindow,
    pub control: &'a RunControl,
}

/// Splits exactly `total_len` source bytes into sequenced chunks.
///
/// A source that ends early fails with `UnexpectedEof`.
pub(crate) fn produce_chunks<R: Read>(
    source: &mut R,
    total_len: u64,
    chunk_size: usize,
    ctx: &ProducerContext<'_>,
    output: Sender<RawChunk>,
) -> Result<Produced> {
    let token = ctx.control.token();
    let mut produced = Produced::default();

    while produced.bytes_read < total_len {
        let want = (total_len - produced.bytes_read).min(chunk_size as u64);

        ctx.window.admit(token)?;
        let mut payload = match ctx.pool.acquire_cancellable(token) {
            Ok(payload) => payload,
            Err(error) => {
                ctx.window.release();
                return Err(error);
            }
        };

        let read = source
            .by_ref()
            .take(want)
            .read_to_end(payload.as_mut_vec())?;
        if (read as u64) < want {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "source ended after {} of {total_len} bytes",
                    produced.bytes_read + read as u64
                ),
            )
            .into());
        }

        produced.chunks += 1;
        produced.bytes_read += read as u64;
        cancel::send(
            &output,
            RawChunk {
                sequence: produced.chunks,
                payload,
            },
            token,
        )?;
    }

    tracing::debug!(
        target: tags::LOG_PIPELINE,
        chunks = produced.chunks,
        bytes = produced.bytes_read,
        "encode producer reached end of source"
    );
    Ok(produced)
}

/// Reads frames and tags them with sequences until the orderer has written
/// the declared stream length, or the source ends.
///
/// Frames may be read ahead of the orderer by up to the window size; the
/// orderer discards any that lie past the end of the stream. A read failure
/// stops the loop and is handed back in [`FramesRead::stopped_by`].
/// `bytes_read` counts frame prefixes and payloads, not the stream header.
pub(crate) fn produce_frames<R: Read>(
    source: &mut R,
    max_frame_len: usize,
    ctx: &ProducerContext<'_>,
    output: Sender<EncryptedChunk>,
) -> Result<FramesRead> {
    let token = ctx.control.token();
    let mut produced = Produced::default();
    let mut stopped_by = None;

    loop {
        ctx.window.admit(token)?;
        if ctx.window.is_closed() {
            ctx.window.release();
            break;
        }
        let mut payload = match ctx.pool.acquire_cancellable(token) {
            Ok(payload) => payload,
            Err(error) => {
                ctx.window.release();
                return Err(error);
            }
        };

        let more = match format::read_frame(source, max_frame_len, payload.as_mut_vec()) {
            Ok(more) => more,
            Err(error) => {
                stopped_by = Some(error.with_context(format!("frame {}", produced.chunks + 1)));
                false
            }
        };
        if !more {
            drop(payload);
            ctx.window.release();
            break;
        }

        produced.chunks += 1;
        produced.bytes_read += (FRAME_PREFIX_SIZE + payload.len()) as u64;
        cancel::send(
            &output,
            EncryptedChunk {
                sequence: produced.chunks,
                payload,
            },
            token,
        )?;
    }

    tracing::debug!(
        target: tags::LOG_PIPELINE,
        frames = produced.chunks,
        bytes = produced.bytes_read,
        read_failed = stopped_by.is_some(),
        "decode producer stopped"
    );
    Ok(FramesRead {
        produced,
        stopped_by,
    })
}
