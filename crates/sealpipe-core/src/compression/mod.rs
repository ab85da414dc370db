use std::io::Write;
use std::time::Instant;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};

use crate::telemetry::{self, profile, tags};
use crate::{Result, SealError};

const PROFILE_TAG_STACK_COMPRESSION: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_COMPRESSION];

/// zlib compression level in `0..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    pub const FAST: Self = Self(1);
    pub const BALANCED: Self = Self(6);
    pub const BEST: Self = Self(9);

    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(SealError::config(format!(
                "compression level {level} outside 0..=9"
            )));
        }
        Ok(Self(level))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::BALANCED
    }
}

impl TryFrom<u32> for CompressionLevel {
    type Error = SealError;

    fn try_from(level: u32) -> Result<Self> {
        Self::new(level)
    }
}

impl From<CompressionLevel> for u32 {
    fn from(level: CompressionLevel) -> Self {
        level.0
    }
}

/// Appends the zlib encoding of `data` to `out` and returns the number of bytes added.
pub fn apply(data: &[u8], level: CompressionLevel, out: &mut Vec<u8>) -> Result<usize> {
    let start = Instant::now();
    let before = out.len();

    let mut encoder = ZlibEncoder::new(&mut *out, Compression::new(level.get()));
    encoder.write_all(data)?;
    encoder.finish()?;

    let written = out.len() - before;
    let elapsed_us = profile::elapsed_us(start);
    let labels = [("algo", "zlib"), ("op", "apply")];
    telemetry::increment_counter(tags::METRIC_COMPRESSION_APPLY_COUNT, 1, &labels);
    telemetry::record_histogram(tags::METRIC_COMPRESSION_INPUT_BYTES, data.len() as u64, &labels);
    telemetry::record_histogram(tags::METRIC_COMPRESSION_OUTPUT_BYTES, written as u64, &labels);
    profile::event(
        tags::PROFILE_TRANSFORM,
        &PROFILE_TAG_STACK_COMPRESSION,
        "apply",
        "ok",
        elapsed_us,
        "compression applied",
    );

    Ok(written)
}

/// Appends the decoding of the zlib stream `data` to `out`.
///
/// The stream must end with its checksum, inflate to exactly `expected_len`
/// bytes and not be followed by trailing bytes; anything else is `CorruptData`.
pub fn reverse(data: &[u8], expected_len: usize, out: &mut Vec<u8>) -> Result<()> {
    let start = Instant::now();
    let before = out.len();

    let inflated = inflate_exact(data, expected_len, out);
    if let Err(error) = inflated {
        out.truncate(before);
        return Err(error);
    }
    let produced = out.len() - before;

    let elapsed_us = profile::elapsed_us(start);
    let labels = [("algo", "zlib"), ("op", "reverse")];
    telemetry::increment_counter(tags::METRIC_COMPRESSION_REVERSE_COUNT, 1, &labels);
    telemetry::record_histogram(tags::METRIC_COMPRESSION_INPUT_BYTES, data.len() as u64, &labels);
    telemetry::record_histogram(tags::METRIC_COMPRESSION_OUTPUT_BYTES, produced as u64, &labels);
    profile::event(
        tags::PROFILE_TRANSFORM,
        &PROFILE_TAG_STACK_COMPRESSION,
        "reverse",
        "ok",
        elapsed_us,
        "compression reversed",
    );

    Ok(())
}

fn inflate_exact(data: &[u8], expected_len: usize, out: &mut Vec<u8>) -> Result<()> {
    let before = out.len();
    // One spare byte exposes a stream that inflates past `expected_len`.
    let limit = before + expected_len + 1;
    out.reserve(expected_len + 1);

    let mut inflater = Decompress::new(true);
    loop {
        let consumed = inflater.total_in();
        let inflated = inflater.total_out();
        let status = inflater
            .decompress_vec(&data[consumed as usize..], out, FlushDecompress::Finish)
            .map_err(|error| SealError::corrupt(format!("invalid zlib stream: {error}")))?;

        if out.len() >= limit {
            return Err(SealError::corrupt(format!(
                "chunk inflated to more than {expected_len} bytes"
            )));
        }
        if status == Status::StreamEnd {
            break;
        }
        if inflater.total_in() == consumed && inflater.total_out() == inflated {
            return Err(SealError::corrupt("truncated zlib stream"));
        }
    }

    let produced = out.len() - before;
    if produced != expected_len {
        return Err(SealError::corrupt(format!(
            "chunk inflated to {produced} bytes, expected {expected_len}"
        )));
    }
    let trailing = data.len() as u64 - inflater.total_in();
    if trailing > 0 {
        return Err(SealError::corrupt(format!(
            "{trailing} trailing bytes after zlib stream"
        )));
    }
    Ok(())
}
