//! Buffers between the capture thread and the channel pipelines.
//!
//! - [`SampleQueue`]: bounded queue of shared wideband buffers. Offering
//!   never blocks; when full the oldest buffer is dropped and a warning is
//!   logged at most once per [`OVERFLOW_WARNING_INTERVAL`].
//! - [`BlockAssembler`]: regroups a stream of samples into fixed-size
//!   blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use tracing::warn;

use crate::ComplexBuffer;

/// Minimum time between two overflow warnings of the same queue
pub const OVERFLOW_WARNING_INTERVAL: Duration = Duration::from_secs(5);

const NEVER: u64 = u64::MAX;

/// Bounded drop-oldest queue of wideband buffers.
pub struct SampleQueue {
    label: String,
    queue: ArrayQueue<ComplexBuffer>,
    dropped: AtomicU64,
    created: Instant,
    /// Milliseconds since `created` of the last overflow warning
    last_warning: AtomicU64,
}

impl SampleQueue {
    /// Create a queue holding up to `capacity` buffers (at least one)
    pub fn new<S: Into<String>>(label: S, capacity: usize) -> Self {
        Self {
            label: label.into(),
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
            created: Instant::now(),
            last_warning: AtomicU64::new(NEVER),
        }
    }

    /// Enqueue `buffer`, evicting the oldest one when full.
    ///
    /// Returns `false` when a buffer was dropped.
    pub fn offer(&self, buffer: ComplexBuffer) -> bool {
        match self.queue.force_push(buffer) {
            None => true,
            Some(_evicted) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.warn_overflow(dropped);
                false
            }
        }
    }

    fn warn_overflow(&self, dropped: u64) {
        let now = self.created.elapsed().as_millis() as u64;
        let last = self.last_warning.load(Ordering::Relaxed);
        let due = last == NEVER
            || now.saturating_sub(last) >= OVERFLOW_WARNING_INTERVAL.as_millis() as u64;
        if due
            && self
                .last_warning
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            warn!(
                queue = %self.label,
                dropped,
                capacity = self.queue.capacity(),
                "sample queue overflow, dropping oldest buffers"
            );
        }
    }

    /// Dequeue the oldest buffer
    pub fn poll(&self) -> Option<ComplexBuffer> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Total number of buffers dropped on overflow
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Discard every queued buffer
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

impl std::fmt::Debug for SampleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleQueue")
            .field("label", &self.label)
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Regroups samples into blocks of exactly `block_size` samples.
#[derive(Debug, Clone)]
pub struct BlockAssembler<T> {
    block: Vec<T>,
    block_size: usize,
}

impl<T: Copy> BlockAssembler<T> {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block: Vec::with_capacity(block_size),
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Samples waiting for the current block to fill
    pub fn pending(&self) -> usize {
        self.block.len()
    }

    /// Append `samples`, handing every completed block to `emit`
    pub fn push<F: FnMut(&[T])>(&mut self, mut samples: &[T], mut emit: F) {
        while !samples.is_empty() {
            let room = self.block_size - self.block.len();
            let take = room.min(samples.len());
            self.block.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.block.len() == self.block_size {
                emit(&self.block);
                self.block.clear();
            }
        }
    }

    /// Hand out the partial block, if any
    pub fn flush<F: FnMut(&[T])>(&mut self, mut emit: F) {
        if !self.block.is_empty() {
            emit(&self.block);
            self.block.clear();
        }
    }
}
