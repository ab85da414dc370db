use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::cancel::{self, CancellationToken};
use crate::Result;

/// Admission window over chunks that were read but not yet written.
///
/// The producer takes a permit before reading each chunk and the orderer
/// returns it once the chunk has been written and its buffer dropped.
/// Closing the window tells the producer that no further chunk is needed.
#[derive(Debug)]
pub(crate) struct InFlightWindow {
    permits: Sender<()>,
    returns: Receiver<()>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    closed: AtomicBool,
}

impl InFlightWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        let (permits, returns) = bounded(capacity.max(1));
        Self {
            permits,
            returns,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Blocks until a permit is free or the run is cancelled.
    pub(crate) fn admit(&self, cancel: &CancellationToken) -> Result<()> {
        cancel::send(&self.permits, (), cancel)?;
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ok(())
    }

    /// Returns one permit. The count drops before the permit is handed back,
    /// so a producer woken by it never observes more than `capacity` chunks.
    pub(crate) fn release(&self) {
        let held = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| held.checked_sub(1))
            .is_ok();
        if held && self.returns.try_recv().is_err() {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Must be called before the permit that wakes the producer is released.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}
