use crate::buffer::PooledBuffer;
use crate::error::SealError;

pub type Result<T> = std::result::Result<T, SealError>;

/// Anything that carries a pipeline sequence number.
///
/// Sequences start at 1 and are assigned once by the producer.
pub trait Sequenced {
    fn sequence(&self) -> u64;
}

/// A slice of source bytes as read by the encode producer.
#[derive(Debug)]
pub struct RawChunk {
    pub sequence: u64,
    pub payload: PooledBuffer,
}

/// Inner frame plaintext: `[compressed_len][original_len][zlib bytes]`.
#[derive(Debug)]
pub struct CompressedChunk {
    pub sequence: u64,
    pub original_len: usize,
    pub compressed_len: usize,
    pub payload: PooledBuffer,
}

/// Sealed inner frame followed by its authentication tag.
#[derive(Debug)]
pub struct EncryptedChunk {
    pub sequence: u64,
    pub payload: PooledBuffer,
}

/// Inner frame recovered from an encrypted frame, not yet validated.
#[derive(Debug)]
pub struct DecryptedChunk {
    pub sequence: u64,
    pub payload: PooledBuffer,
}

/// Decompressed bytes ready to be written to the destination.
#[derive(Debug)]
pub struct PlainChunk {
    pub sequence: u64,
    pub payload: PooledBuffer,
}

/// Decode-side chunk whose transform may have failed.
///
/// Failures stay attached to their sequence so the orderer reports them in
/// stream order, and drops them when they lie past the end of the stream.
#[derive(Debug)]
pub struct Decoded<T> {
    pub sequence: u64,
    pub outcome: Result<T>,
}

impl<T> Decoded<T> {
    pub fn new(sequence: u64, outcome: Result<T>) -> Self {
        Self { sequence, outcome }
    }

    /// Runs the next transform on a successful outcome, keeping the sequence.
    pub fn and_then<U, F>(self, transform: F) -> Decoded<U>
    where
        F: FnOnce(T) -> Result<U>,
    {
        Decoded {
            sequence: self.sequence,
            outcome: self.outcome.and_then(transform),
        }
    }
}

impl<T> Sequenced for Decoded<T> {
    #[inline]
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

macro_rules! impl_sequenced {
    ($($chunk:ty),+ $(,)?) => {
        $(
            impl Sequenced for $chunk {
                #[inline]
                fn sequence(&self) -> u64 {
                    self.sequence
                }
            }
        )+
    };
}

impl_sequenced!(RawChunk, CompressedChunk, EncryptedChunk, DecryptedChunk, PlainChunk);

impl RawChunk {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl PlainChunk {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
