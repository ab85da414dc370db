use std::io::Cursor;

use sealpipe_core::pipeline::{ChunkSink, FrameSink, Orderer, PlainSink};
use sealpipe_core::{
    BufferPool, Decoded, EncryptedChunk, PlainChunk, Result, SealError, Sequenced,
};

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

#[derive(Debug)]
struct Tagged {
    sequence: u64,
    label: &'static str,
}

impl Sequenced for Tagged {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Records the order in which chunks reach the destination.
#[derive(Debug, Default)]
struct RecordingSink {
    written: Vec<&'static str>,
    finished: bool,
}

impl ChunkSink for RecordingSink {
    type Chunk = Tagged;
    type Destination = Vec<&'static str>;

    fn write_chunk(&mut self, chunk: Tagged) -> Result<u64> {
        self.written.push(chunk.label);
        Ok(chunk.label.len() as u64)
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn flush_best_effort(&mut self) {}

    fn bytes_written(&self) -> u64 {
        self.written.iter().map(|label| label.len() as u64).sum()
    }

    fn into_destination(self) -> Vec<&'static str> {
        self.written
    }
}

fn tagged(sequence: u64, label: &'static str) -> Tagged {
    Tagged { sequence, label }
}

#[test]
fn out_of_order_arrivals_are_written_in_sequence() -> TestResult {
    let mut orderer = Orderer::new(RecordingSink::default(), 16);
    let mut notified = Vec::new();

    for (sequence, label) in [(3, "three"), (1, "one"), (2, "two")] {
        orderer.accept(tagged(sequence, label), |sequence, written, orderer| {
            notified.push((sequence, written, orderer.chunks_written()));
        })?;
    }

    assert_eq!(notified, vec![(1, 3, 1), (2, 3, 2), (3, 5, 3)]);
    orderer.finish(3)?;
    assert_eq!(orderer.bytes_written(), 11);
    assert_eq!(orderer.into_sink().into_destination(), vec!["one", "two", "three"]);
    Ok(())
}

#[test]
fn nothing_is_written_until_the_gap_closes() -> TestResult {
    let mut orderer = Orderer::new(RecordingSink::default(), 16);
    orderer.accept(tagged(2, "b"), |_, _, _| {})?;
    orderer.accept(tagged(4, "d"), |_, _, _| {})?;

    assert_eq!(orderer.chunks_written(), 0);
    assert_eq!(orderer.pending_len(), 2);
    assert_eq!(orderer.next_expected(), 1);

    orderer.accept(tagged(1, "a"), |_, _, _| {})?;
    assert_eq!(orderer.chunks_written(), 2);
    assert_eq!(orderer.next_expected(), 3);
    Ok(())
}

#[test]
fn duplicate_sequence_is_a_protocol_violation() -> TestResult {
    let mut orderer = Orderer::new(RecordingSink::default(), 16);
    orderer.accept(tagged(1, "a"), |_, _, _| {})?;

    let stale = orderer.accept(tagged(1, "again"), |_, _, _| {});
    assert!(matches!(stale, Err(SealError::ProtocolViolation(_))));

    orderer.accept(tagged(3, "c"), |_, _, _| {})?;
    let duplicate = orderer.accept(tagged(3, "c"), |_, _, _| {});
    assert!(matches!(duplicate, Err(SealError::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn finish_with_pending_chunks_is_a_protocol_violation() -> TestResult {
    let mut orderer = Orderer::new(RecordingSink::default(), 16);
    orderer.accept(tagged(1, "a"), |_, _, _| {})?;
    orderer.accept(tagged(3, "c"), |_, _, _| {})?;

    assert!(matches!(
        orderer.finish(3),
        Err(SealError::ProtocolViolation(_))
    ));
    assert!(!orderer.into_sink().finished);
    Ok(())
}

#[test]
fn finish_with_missing_chunks_is_a_protocol_violation() -> TestResult {
    let mut orderer = Orderer::new(RecordingSink::default(), 16);
    orderer.accept(tagged(1, "a"), |_, _, _| {})?;
    orderer.accept(tagged(2, "b"), |_, _, _| {})?;

    assert!(matches!(
        orderer.finish(3),
        Err(SealError::ProtocolViolation(_))
    ));
    orderer.finish(2)?;
    assert!(orderer.into_sink().finished);
    Ok(())
}

#[test]
fn pending_limit_bounds_the_reorder_set() -> TestResult {
    let mut orderer = Orderer::new(RecordingSink::default(), 2);
    orderer.accept(tagged(2, "b"), |_, _, _| {})?;
    orderer.accept(tagged(3, "c"), |_, _, _| {})?;

    let overflow = orderer.accept(tagged(4, "d"), |_, _, _| {});
    assert!(matches!(overflow, Err(SealError::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn frame_sink_writes_header_then_frames() -> TestResult {
    let pool = BufferPool::new(64, 4);
    let mut payload = pool.acquire();
    payload.extend_from_slice(&[9u8; 24]);

    let mut orderer = Orderer::new(FrameSink::new(Cursor::new(Vec::new()), 1234), 4);
    orderer.accept(
        EncryptedChunk {
            sequence: 1,
            payload,
        },
        |_, written, _| assert_eq!(written, 28),
    )?;
    orderer.finish(1)?;
    assert_eq!(orderer.bytes_written(), 36);

    let bytes = orderer.into_sink().into_destination().into_inner();
    assert_eq!(&bytes[..8], &1234i64.to_le_bytes());
    assert_eq!(&bytes[8..12], &24i32.to_le_bytes());
    assert_eq!(&bytes[12..], &[9u8; 24]);
    assert_eq!(pool.metrics().in_flight, 0);
    Ok(())
}

#[test]
fn frame_sink_without_chunks_still_writes_header() -> TestResult {
    let mut sink = FrameSink::new(Vec::new(), 0);
    sink.finish()?;
    assert_eq!(sink.into_destination(), vec![0u8; 8]);
    Ok(())
}

#[test]
fn plain_sink_enforces_declared_length() -> TestResult {
    let pool = BufferPool::new(16, 4);
    let chunk = |sequence, bytes: &[u8]| {
        let mut payload = pool.acquire();
        payload.extend_from_slice(bytes);
        Decoded::new(sequence, Ok(PlainChunk { sequence, payload }))
    };

    let mut short = PlainSink::new(Vec::new(), 6);
    short.write_chunk(chunk(1, b"abc"))?;
    assert!(!short.is_complete());
    assert!(matches!(short.finish(), Err(SealError::CorruptData(_))));

    let mut long = PlainSink::new(Vec::new(), 4);
    long.write_chunk(chunk(1, b"abc"))?;
    assert!(matches!(
        long.write_chunk(chunk(2, b"def")),
        Err(SealError::CorruptData(_))
    ));

    let mut exact = PlainSink::new(Vec::new(), 6);
    exact.write_chunk(chunk(1, b"abc"))?;
    exact.write_chunk(chunk(2, b"def"))?;
    assert!(exact.is_complete());
    exact.finish()?;
    assert_eq!(exact.into_destination(), b"abcdef".to_vec());
    Ok(())
}

fn plain(pool: &BufferPool, sequence: u64, bytes: &[u8]) -> Decoded<PlainChunk> {
    let mut payload = pool.acquire();
    payload.extend_from_slice(bytes);
    Decoded::new(sequence, Ok(PlainChunk { sequence, payload }))
}

fn failed(sequence: u64) -> Decoded<PlainChunk> {
    Decoded::new(sequence, Err(SealError::CorruptData("authentication failed".into())))
}

#[test]
fn chunks_past_the_declared_length_are_discarded() -> TestResult {
    let pool = BufferPool::new(16, 8);
    let mut orderer = Orderer::new(PlainSink::new(Vec::new(), 6), 8);

    orderer.accept(failed(4), |_, _, _| {})?;
    orderer.accept(plain(&pool, 3, b"zzz"), |_, _, _| {})?;
    orderer.accept(plain(&pool, 2, b"def"), |_, _, _| {})?;
    orderer.accept(plain(&pool, 1, b"abc"), |_, _, _| {})?;
    assert!(orderer.is_complete());
    assert_eq!(orderer.pending_len(), 0);

    orderer.accept(failed(5), |_, _, _| {})?;
    assert_eq!(orderer.chunks_written(), 2);
    assert_eq!(orderer.chunks_discarded(), 3);

    orderer.finish(5)?;
    assert_eq!(orderer.into_sink().into_destination(), b"abcdef".to_vec());
    assert_eq!(pool.metrics().in_flight, 0);
    Ok(())
}

#[test]
fn decode_failure_surfaces_when_its_turn_comes() -> TestResult {
    let pool = BufferPool::new(16, 8);
    let mut orderer = Orderer::new(PlainSink::new(Vec::new(), 9), 8);

    orderer.accept(failed(2), |_, _, _| {})?;
    assert_eq!(orderer.pending_len(), 1);

    let error = orderer
        .accept(plain(&pool, 1, b"abc"), |_, _, _| {})
        .expect_err("frame 2 failed to decode");
    assert!(matches!(error, SealError::CorruptData(_)));
    assert_eq!(orderer.chunks_written(), 1);
    Ok(())
}
