//! Wire format of a sealed stream.
//!
//! ```text
//! [8 bytes LE i64 total source length]
//! repeat:
//!   [4 bytes LE i32 frame length]
//!   [frame length bytes: AEAD([4B compressed_len][4B original_len][zlib bytes]) || tag]
//! ```

mod consts;
mod frame;
mod reorder;

pub use consts::{
    AEAD_TAG_SIZE, DEFAULT_MAX_FRAME_LEN, DEFAULT_REORDER_PENDING_LIMIT, FRAME_PREFIX_SIZE,
    INNER_HEADER_SIZE, MAX_CHUNK_SIZE, MIN_FRAME_LEN, STREAM_HEADER_SIZE, max_encoded_frame_len,
};
pub use frame::{InnerFrameHeader, StreamHeader, read_frame, write_frame};
pub use reorder::ReorderBuffer;
