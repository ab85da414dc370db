/// Size of the stream header carrying the total source length.
pub const STREAM_HEADER_SIZE: usize = 8;
/// Size of the little-endian length prefix in front of every frame.
pub const FRAME_PREFIX_SIZE: usize = 4;
/// Size of the `[compressed_len][original_len]` header inside a sealed frame.
pub const INNER_HEADER_SIZE: usize = 8;
/// Poly1305 authentication tag appended to every sealed frame.
pub const AEAD_TAG_SIZE: usize = 16;
/// Smallest frame a well-formed stream can contain.
pub const MIN_FRAME_LEN: usize = INNER_HEADER_SIZE + AEAD_TAG_SIZE;

/// Default limit for chunks parked in the reorder buffer.
pub const DEFAULT_REORDER_PENDING_LIMIT: usize = 1024;
/// Default upper bound for a single frame accepted by the decoder.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;
/// Largest chunk the frame prefix can describe after compression overhead.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024 * 1024;

/// Worst-case frame length for a chunk of `chunk_size` bytes.
///
/// Uses zlib's `compressBound` for the deflate expansion, then adds the
/// inner header and the authentication tag.
pub const fn max_encoded_frame_len(chunk_size: usize) -> usize {
    let deflate_bound =
        chunk_size + (chunk_size >> 12) + (chunk_size >> 14) + (chunk_size >> 25) + 13;
    deflate_bound + INNER_HEADER_SIZE + AEAD_TAG_SIZE
}
