//! Per-chunk transforms run by the stage workers.
//!
//! Each function consumes its input chunk. Buffers that are not carried
//! forward return to the pool when the input chunk is dropped.

use crate::buffer::BufferPool;
use crate::cancel::CancellationToken;
use crate::compression::{self, CompressionLevel};
use crate::crypto::CipherContext;
use crate::format::{INNER_HEADER_SIZE, InnerFrameHeader};
use crate::types::{CompressedChunk, DecryptedChunk, EncryptedChunk, PlainChunk, RawChunk};
use crate::Result;

/// Deflates a raw chunk into a fresh buffer laid out as an inner frame.
pub fn compress_chunk(
    chunk: RawChunk,
    pool: &BufferPool,
    level: CompressionLevel,
    cancel: &CancellationToken,
) -> Result<CompressedChunk> {
    let RawChunk { sequence, payload } = chunk;
    let mut frame = pool.acquire_cancellable(cancel)?;
    frame.extend_from_slice(&[0u8; INNER_HEADER_SIZE]);
    let compressed_len = compression::apply(&payload, level, frame.as_mut_vec())?;

    let original_len = payload.len();
    drop(payload);

    let header = InnerFrameHeader::new(compressed_len, original_len).to_bytes()?;
    frame[..INNER_HEADER_SIZE].copy_from_slice(&header);

    Ok(CompressedChunk {
        sequence,
        original_len,
        compressed_len,
        payload: frame,
    })
}

/// Seals an inner frame in place under the chunk's sequence nonce.
pub fn encrypt_chunk(chunk: CompressedChunk, cipher: &CipherContext) -> Result<EncryptedChunk> {
    let CompressedChunk {
        sequence,
        mut payload,
        ..
    } = chunk;
    cipher.seal_in_place(sequence, payload.as_mut_vec())?;
    Ok(EncryptedChunk { sequence, payload })
}

/// Opens a sealed frame in place. Authentication failure is `CorruptData`.
pub fn decrypt_chunk(chunk: EncryptedChunk, cipher: &CipherContext) -> Result<DecryptedChunk> {
    let EncryptedChunk {
        sequence,
        mut payload,
    } = chunk;
    cipher.open_in_place(sequence, payload.as_mut_vec())?;
    Ok(DecryptedChunk { sequence, payload })
}

/// Validates the inner frame and inflates it into a fresh buffer.
pub fn decompress_chunk(
    chunk: DecryptedChunk,
    pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<PlainChunk> {
    let DecryptedChunk { sequence, payload } = chunk;
    let header = InnerFrameHeader::parse(&payload)
        .map_err(|error| error.with_context(format!("frame {sequence}")))?;

    let mut plain = pool.acquire_cancellable(cancel)?;
    compression::reverse(
        &payload[INNER_HEADER_SIZE..],
        header.original_len,
        plain.as_mut_vec(),
    )
    .map_err(|error| error.with_context(format!("frame {sequence}")))?;

    Ok(PlainChunk {
        sequence,
        payload: plain,
    })
}
