use std::io::{ErrorKind, Read, Write};

use crate::{Result, SealError};

use super::{FRAME_PREFIX_SIZE, INNER_HEADER_SIZE, MIN_FRAME_LEN, STREAM_HEADER_SIZE};

/// Header written once at the start of a sealed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    /// Number of plaintext bytes the stream decodes to.
    pub total_len: u64,
}

impl StreamHeader {
    pub fn new(total_len: u64) -> Self {
        Self { total_len }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// Reads the header. A stream shorter than the header is `CorruptData`.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; STREAM_HEADER_SIZE];
        let filled = read_full(reader, &mut bytes)?;
        if filled != STREAM_HEADER_SIZE {
            return Err(SealError::corrupt(format!(
                "truncated stream header: {filled} of {STREAM_HEADER_SIZE} bytes"
            )));
        }
        Self::from_bytes(bytes)
    }

    pub fn to_bytes(&self) -> Result<[u8; STREAM_HEADER_SIZE]> {
        let total = i64::try_from(self.total_len)
            .map_err(|_| SealError::config("source length does not fit the stream header"))?;
        Ok(total.to_le_bytes())
    }

    pub fn from_bytes(bytes: [u8; STREAM_HEADER_SIZE]) -> Result<Self> {
        let total = i64::from_le_bytes(bytes);
        let total_len = u64::try_from(total)
            .map_err(|_| SealError::corrupt(format!("negative stream length {total}")))?;
        Ok(Self { total_len })
    }
}

/// Length header at the front of every decrypted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerFrameHeader {
    /// Length of the zlib bytes following the header.
    pub compressed_len: usize,
    /// Length of the chunk before compression.
    pub original_len: usize,
}

impl InnerFrameHeader {
    pub fn new(compressed_len: usize, original_len: usize) -> Self {
        Self {
            compressed_len,
            original_len,
        }
    }

    pub fn to_bytes(&self) -> Result<[u8; INNER_HEADER_SIZE]> {
        let compressed = i32::try_from(self.compressed_len)
            .map_err(|_| SealError::protocol("compressed chunk exceeds frame limits"))?;
        let original = i32::try_from(self.original_len)
            .map_err(|_| SealError::protocol("chunk exceeds frame limits"))?;

        let mut bytes = [0u8; INNER_HEADER_SIZE];
        bytes[..4].copy_from_slice(&compressed.to_le_bytes());
        bytes[4..].copy_from_slice(&original.to_le_bytes());
        Ok(bytes)
    }

    /// Parses the header from the front of a decrypted frame.
    ///
    /// The compressed length must account for every byte after the header.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < INNER_HEADER_SIZE {
            return Err(SealError::corrupt(format!(
                "inner frame of {} bytes is shorter than its header",
                frame.len()
            )));
        }

        let compressed = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let original = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        if compressed < 0 || original < 0 {
            return Err(SealError::corrupt(format!(
                "negative inner frame length (compressed {compressed}, original {original})"
            )));
        }

        let header = Self::new(compressed as usize, original as usize);
        let body_len = frame.len() - INNER_HEADER_SIZE;
        if header.compressed_len != body_len {
            return Err(SealError::corrupt(format!(
                "inner frame declares {} compressed bytes but carries {body_len}",
                header.compressed_len
            )));
        }
        if header.original_len == 0 {
            return Err(SealError::corrupt("inner frame declares an empty chunk"));
        }
        Ok(header)
    }
}

/// Writes one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = i32::try_from(payload.len())
        .map_err(|_| SealError::protocol("sealed frame exceeds the i32 length prefix"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Reads the next frame into `payload`.
///
/// Returns `Ok(false)` on a clean end of stream at a frame boundary. A partial
/// prefix, a partial payload, or a length outside `MIN_FRAME_LEN..=max_frame_len`
/// is `CorruptData`.
pub fn read_frame<R: Read>(
    reader: &mut R,
    max_frame_len: usize,
    payload: &mut Vec<u8>,
) -> Result<bool> {
    let mut prefix = [0u8; FRAME_PREFIX_SIZE];
    match read_full(reader, &mut prefix)? {
        0 => return Ok(false),
        FRAME_PREFIX_SIZE => {}
        filled => {
            return Err(SealError::corrupt(format!(
                "truncated frame prefix: {filled} of {FRAME_PREFIX_SIZE} bytes"
            )));
        }
    }

    let declared = i32::from_le_bytes(prefix);
    if declared < 0 {
        return Err(SealError::corrupt(format!("negative frame length {declared}")));
    }
    let len = declared as usize;
    if len < MIN_FRAME_LEN || len > max_frame_len {
        return Err(SealError::corrupt(format!(
            "frame length {len} outside {MIN_FRAME_LEN}..={max_frame_len}"
        )));
    }

    payload.clear();
    payload.resize(len, 0);
    let filled = read_full(reader, payload)?;
    if filled != len {
        payload.truncate(filled);
        return Err(SealError::corrupt(format!(
            "truncated frame payload: {filled} of {len} bytes"
        )));
    }
    Ok(true)
}

/// Fills `buf` as far as the reader allows and returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_header_puts_compressed_len_first() {
        let bytes = InnerFrameHeader::new(3, 0x0102_0304)
            .to_bytes()
            .expect("header fits");
        assert_eq!(bytes, [3, 0, 0, 0, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn read_full_stops_at_eof() {
        let mut reader: &[u8] = &[1, 2, 3];
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut reader, &mut buf).expect("read"), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }
}
