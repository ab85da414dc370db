use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sealpipe_core::{AllocationStrategy, BufferPool, CancellationToken, SealError};

#[test]
fn released_buffers_are_recycled() {
    let pool = BufferPool::new(64, 2);
    assert_eq!(pool.buffer_capacity(), 64);
    assert_eq!(pool.max_buffers(), Some(2));

    {
        let mut buffer = pool.acquire();
        buffer.extend_from_slice(b"hello");
        assert_eq!(buffer.len(), 5);
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.created, 1);
    assert_eq!(metrics.recycled, 0);
    assert_eq!(metrics.released, 1);
    assert_eq!(metrics.in_flight, 0);

    {
        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 64);
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.created, 1);
    assert_eq!(metrics.recycled, 1);
    assert_eq!(metrics.acquired, 2);
    assert_eq!(metrics.discarded, 0);
}

#[test]
fn exhausted_pool_refuses_try_acquire() {
    let pool = BufferPool::new(16, 2);
    let first = pool.acquire();
    let second = pool.acquire();

    assert!(pool.try_acquire().is_none());
    assert_eq!(pool.metrics().in_flight, 2);

    drop(first);
    let third = pool.try_acquire();
    assert!(third.is_some());
    assert_eq!(pool.metrics().created, 2);

    drop(second);
    drop(third);
    assert_eq!(pool.metrics().peak_in_flight, 2);
}

#[test]
fn zero_ceiling_still_hands_out_one_buffer() {
    let pool = BufferPool::new(16, 0);
    assert_eq!(pool.max_buffers(), Some(1));
    assert_eq!(pool.strategy(), AllocationStrategy::Pooled { max_buffers: 1 });

    let only = pool.try_acquire().expect("one buffer is always available");
    assert!(pool.try_acquire().is_none());
    drop(only);

    let again = pool.acquire();
    assert_eq!(pool.metrics().created, 1);
    assert_eq!(pool.metrics().recycled, 1);
    drop(again);
}

#[test]
fn acquire_waits_for_release() -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(BufferPool::new(16, 1));
    let held = pool.acquire();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let buffer = pool.acquire();
            buffer.capacity()
        })
    };

    thread::sleep(Duration::from_millis(50));
    drop(held);

    let capacity = waiter.join().map_err(|_| "waiter panicked")?;
    assert!(capacity >= 16);

    let metrics = pool.metrics();
    assert_eq!(metrics.created, 1);
    assert_eq!(metrics.waits, 1);
    assert_eq!(metrics.in_flight, 0);
    Ok(())
}

#[test]
fn cancellation_interrupts_blocked_acquire() -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(BufferPool::new(16, 1));
    let token = CancellationToken::new();
    let _held = pool.acquire();

    let waiter = {
        let pool = Arc::clone(&pool);
        let token = token.clone();
        thread::spawn(move || pool.acquire_cancellable(&token).map(|_| ()))
    };

    thread::sleep(Duration::from_millis(50));
    token.cancel();

    let result = waiter.join().map_err(|_| "waiter panicked")?;
    assert!(matches!(result, Err(SealError::Cancelled)));
    assert_eq!(pool.metrics().in_flight, 1);
    Ok(())
}

#[test]
fn cancelled_token_fails_before_taking_a_buffer() {
    let pool = BufferPool::new(16, 4);
    let token = CancellationToken::new();
    token.cancel();

    assert!(matches!(
        pool.acquire_cancellable(&token),
        Err(SealError::Cancelled)
    ));
    assert_eq!(pool.metrics().acquired, 0);
}

#[test]
fn fresh_strategy_discards_every_release() {
    let pool = BufferPool::unpooled(32);
    assert_eq!(pool.strategy(), AllocationStrategy::Fresh);
    assert_eq!(pool.max_buffers(), None);

    for _ in 0..3 {
        let mut buffer = pool.acquire();
        buffer.push(1);
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.created, 3);
    assert_eq!(metrics.recycled, 0);
    assert_eq!(metrics.discarded, 3);
    assert_eq!(metrics.in_flight, 0);
}

#[test]
fn concurrent_use_conserves_buffers() -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(BufferPool::new(128, 4));
    let mut handles = Vec::new();

    for worker in 0..8u8 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            for _ in 0..250 {
                let mut buffer = pool.acquire();
                buffer.extend_from_slice(&[worker; 32]);
                assert!(buffer.iter().all(|byte| *byte == worker));
            }
        }));
    }
    for handle in handles {
        handle.join().map_err(|_| "worker panicked")?;
    }

    let metrics = pool.metrics();
    assert!(metrics.created <= 4);
    assert!(metrics.peak_in_flight <= 4);
    assert_eq!(metrics.acquired, 2000);
    assert_eq!(metrics.acquired, metrics.released);
    assert_eq!(metrics.in_flight, 0);
    Ok(())
}

#[test]
fn reset_peak_tracks_current_in_flight() {
    let pool = BufferPool::new(8, 4);
    let a = pool.acquire();
    let b = pool.acquire();
    drop(b);
    assert_eq!(pool.metrics().peak_in_flight, 2);

    pool.reset_peak();
    assert_eq!(pool.metrics().peak_in_flight, 1);
    drop(a);
}
