use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::telemetry::{self, profile, tags};
use crate::{Result, SealError};

const PROFILE_TAG_STACK_BUFFER: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_BUFFER];

/// How a [`BufferPool`] sources its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// Recycle released buffers; allocate lazily up to `max_buffers`, then block.
    Pooled { max_buffers: usize },
    /// Allocate a fresh buffer on every acquire and discard it on release.
    Fresh,
}

/// A pool of reusable byte buffers that bounds allocation churn.
///
/// With [`AllocationStrategy::Pooled`] the pool also acts as back-pressure:
/// once `max_buffers` are outstanding, `acquire` waits for one to be released.
///
/// # Example
/// ```
/// use sealpipe_core::BufferPool;
///
/// let pool = BufferPool::new(4096, 8);
/// let mut buffer = pool.acquire();
/// buffer.extend_from_slice(b"payload");
/// drop(buffer); // returns to pool automatically
/// assert_eq!(pool.metrics().in_flight, 0);
/// ```
#[derive(Debug)]
pub struct BufferPool {
    recycler: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
    buffer_capacity: usize,
    strategy: AllocationStrategy,
    metrics: Arc<PoolMetricsInner>,
}

impl BufferPool {
    /// Creates a recycling pool.
    ///
    /// # Arguments
    /// * `buffer_capacity` - Capacity reserved for every newly created buffer
    /// * `max_buffers` - Ceiling on buffers alive at once; `0` is raised to `1`
    pub fn new(buffer_capacity: usize, max_buffers: usize) -> Self {
        Self::with_strategy(buffer_capacity, AllocationStrategy::Pooled { max_buffers })
    }

    /// Creates a pool that never recycles.
    pub fn unpooled(buffer_capacity: usize) -> Self {
        Self::with_strategy(buffer_capacity, AllocationStrategy::Fresh)
    }

    /// A `Pooled` ceiling of zero is raised to one buffer, so `acquire` can
    /// always make progress once earlier buffers are released.
    pub fn with_strategy(buffer_capacity: usize, strategy: AllocationStrategy) -> Self {
        let strategy = match strategy {
            AllocationStrategy::Pooled { max_buffers } => AllocationStrategy::Pooled {
                max_buffers: max_buffers.max(1),
            },
            AllocationStrategy::Fresh => AllocationStrategy::Fresh,
        };
        let slots = match strategy {
            AllocationStrategy::Pooled { max_buffers } => max_buffers,
            AllocationStrategy::Fresh => 1,
        };
        let (tx, rx) = bounded(slots);
        Self {
            recycler: tx,
            receiver: rx,
            buffer_capacity,
            strategy,
            metrics: Arc::new(PoolMetricsInner::default()),
        }
    }

    /// Acquires a buffer, blocking while the pool is exhausted.
    pub fn acquire(&self) -> PooledBuffer {
        let started_at = Instant::now();
        let buffer = match self.try_take() {
            Some(buffer) => buffer,
            None => {
                self.note_wait();
                // The pool owns a sender, so the queue never disconnects.
                self.receiver.recv().unwrap_or_default()
            }
        };
        self.finish_acquire(buffer, started_at)
    }

    /// Acquires a buffer, returning `Cancelled` if the token fires while waiting.
    pub fn acquire_cancellable(&self, cancel: &CancellationToken) -> Result<PooledBuffer> {
        let started_at = Instant::now();
        cancel.check()?;
        let buffer = match self.try_take() {
            Some(buffer) => buffer,
            None => {
                self.note_wait();
                select! {
                    recv(self.receiver) -> buffer => buffer.unwrap_or_default(),
                    recv(cancel.signal()) -> _ => return Err(SealError::Cancelled),
                }
            }
        };
        Ok(self.finish_acquire(buffer, started_at))
    }

    /// Acquires a buffer only if one is available without waiting.
    pub fn try_acquire(&self) -> Option<PooledBuffer> {
        let started_at = Instant::now();
        self.try_take()
            .map(|buffer| self.finish_acquire(buffer, started_at))
    }

    fn try_take(&self) -> Option<Vec<u8>> {
        if let AllocationStrategy::Pooled { max_buffers } = self.strategy {
            match self.receiver.try_recv() {
                Ok(mut buffer) => {
                    buffer.clear();
                    self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                    telemetry::increment_counter(
                        tags::METRIC_BUFFER_ACQUIRE_RECYCLED_COUNT,
                        1,
                        &[("subsystem", "buffer"), ("op", "acquire"), ("result", "recycled")],
                    );
                    return Some(buffer);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            let reserved = self
                .metrics
                .created
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |created| {
                    (created < max_buffers).then_some(created + 1)
                })
                .is_ok();
            if !reserved {
                return None;
            }
        } else {
            self.metrics.created.fetch_add(1, Ordering::Relaxed);
        }

        telemetry::increment_counter(
            tags::METRIC_BUFFER_ACQUIRE_CREATED_COUNT,
            1,
            &[("subsystem", "buffer"), ("op", "acquire"), ("result", "created")],
        );
        Some(Vec::with_capacity(self.buffer_capacity))
    }

    fn note_wait(&self) {
        self.metrics.waits.fetch_add(1, Ordering::Relaxed);
        telemetry::increment_counter(
            tags::METRIC_BUFFER_ACQUIRE_WAIT_COUNT,
            1,
            &[("subsystem", "buffer"), ("op", "acquire"), ("result", "wait")],
        );
        tracing::trace!(target: tags::LOG_BUFFER, "buffer pool exhausted, waiting for release");
    }

    fn finish_acquire(&self, mut buffer: Vec<u8>, started_at: Instant) -> PooledBuffer {
        buffer.clear();
        let in_flight = self.metrics.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.peak_in_flight.fetch_max(in_flight, Ordering::AcqRel);
        telemetry::add_gauge(
            tags::METRIC_BUFFER_IN_FLIGHT,
            1,
            &[("subsystem", "buffer"), ("op", "acquire")],
        );

        let elapsed_us = profile::elapsed_us(started_at);
        telemetry::record_histogram(
            tags::METRIC_BUFFER_ACQUIRE_LATENCY_US,
            elapsed_us,
            &[("subsystem", "buffer"), ("op", "acquire")],
        );
        profile::event(
            tags::PROFILE_BUFFER,
            &PROFILE_TAG_STACK_BUFFER,
            "acquire",
            "ok",
            elapsed_us,
            "buffer acquire completed",
        );

        let recycler = match self.strategy {
            AllocationStrategy::Pooled { .. } => Some(self.recycler.clone()),
            AllocationStrategy::Fresh => None,
        };
        PooledBuffer {
            buffer,
            recycler,
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Returns a snapshot of the current pool metrics.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let created = self.metrics.created.load(Ordering::Acquire);
        let recycled = self.metrics.recycled.load(Ordering::Acquire);
        PoolMetricsSnapshot {
            created,
            recycled,
            acquired: created + recycled,
            released: self.metrics.released.load(Ordering::Acquire),
            discarded: self.metrics.discarded.load(Ordering::Acquire),
            waits: self.metrics.waits.load(Ordering::Acquire),
            in_flight: self.metrics.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.metrics.peak_in_flight.load(Ordering::Acquire),
        }
    }

    /// Resets the high-water mark to the current in-flight count.
    pub fn reset_peak(&self) {
        let current = self.metrics.in_flight.load(Ordering::Acquire);
        self.metrics.peak_in_flight.store(current, Ordering::Release);
    }

    /// Capacity reserved for newly created buffers.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    /// Ceiling on buffers alive at once, `None` for the fresh strategy.
    pub fn max_buffers(&self) -> Option<usize> {
        match self.strategy {
            AllocationStrategy::Pooled { max_buffers } => Some(max_buffers),
            AllocationStrategy::Fresh => None,
        }
    }
}

/// A snapshot of buffer pool metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolMetricsSnapshot {
    /// Buffers allocated by the pool.
    pub created: usize,
    /// Acquisitions served from a recycled buffer.
    pub recycled: usize,
    /// Total acquisitions (`created + recycled`).
    pub acquired: usize,
    /// Buffers handed back by their holder.
    pub released: usize,
    /// Released buffers that were freed instead of recycled.
    pub discarded: usize,
    /// Acquisitions that had to wait for a release.
    pub waits: usize,
    /// Buffers currently held outside the pool.
    pub in_flight: usize,
    /// Highest `in_flight` observed.
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    created: AtomicUsize,
    recycled: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
    waits: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// A buffer acquired from a [`BufferPool`].
///
/// Dropping it returns the storage to the pool, so a buffer is released
/// exactly once. Implements `Deref`/`DerefMut` to the underlying `Vec<u8>`.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Vec<u8>,
    recycler: Option<Sender<Vec<u8>>>,
    metrics: Arc<PoolMetricsInner>,
}

impl PooledBuffer {
    /// Returns a slice reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Returns a mutable reference to the underlying Vec.
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.metrics.released.fetch_add(1, Ordering::AcqRel);
        self.metrics.in_flight.fetch_sub(1, Ordering::AcqRel);
        telemetry::sub_gauge_saturating(
            tags::METRIC_BUFFER_IN_FLIGHT,
            1,
            &[("subsystem", "buffer"), ("op", "release")],
        );

        let recycled = match self.recycler.take() {
            Some(recycler) => recycler.try_send(buffer).is_ok(),
            None => false,
        };
        if !recycled {
            self.metrics.discarded.fetch_add(1, Ordering::AcqRel);
            telemetry::increment_counter(
                tags::METRIC_BUFFER_RELEASE_DISCARDED_COUNT,
                1,
                &[("subsystem", "buffer"), ("op", "release"), ("result", "discarded")],
            );
        }
    }
}
