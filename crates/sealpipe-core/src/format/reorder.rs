use std::collections::BTreeMap;

use crate::{Result, SealError};

use super::DEFAULT_REORDER_PENDING_LIMIT;

/// Parks items that arrive out of order and releases them as a contiguous run.
///
/// Sequences start at 1. Items are kept in a `BTreeMap` until the next
/// expected sequence is pushed, at which point it and every contiguous
/// successor are released.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_sequence: u64,
    pending: BTreeMap<u64, T>,
    max_pending: usize,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_REORDER_PENDING_LIMIT)
    }

    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            next_sequence: 1,
            pending: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Pushes an item and returns every item that became ready, in order.
    ///
    /// # Errors
    /// `ProtocolViolation` when the sequence was already released, is already
    /// pending, or would grow the pending set past its limit.
    pub fn push(&mut self, sequence: u64, item: T) -> Result<Vec<T>> {
        if sequence < self.next_sequence {
            return Err(SealError::protocol(format!(
                "sequence {sequence} already written (next expected {})",
                self.next_sequence
            )));
        }

        if self.pending.contains_key(&sequence) {
            return Err(SealError::protocol(format!(
                "duplicate sequence {sequence} in reorder buffer"
            )));
        }

        if sequence != self.next_sequence && self.pending.len() >= self.max_pending {
            return Err(SealError::protocol(format!(
                "reorder buffer exceeded {} pending chunks waiting for sequence {}",
                self.max_pending, self.next_sequence
            )));
        }

        self.pending.insert(sequence, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_sequence) {
            ready.push(item);
            self.next_sequence += 1;
        }
        Ok(ready)
    }

    /// Next sequence that will be released.
    pub fn next_expected(&self) -> u64 {
        self.next_sequence
    }

    /// Number of items released so far.
    pub fn released(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequences still parked, lowest first.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.pending.keys().copied().collect()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Drops every parked item and returns how many there were.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}
