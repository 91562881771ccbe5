use std::sync::{Arc, Mutex};

use crate::ComplexBuffer;
use crate::dsp::buffer::SampleQueue;

type QueueList = Arc<Vec<Arc<SampleQueue>>>;

/// Fan-out of wideband buffers from the capture thread to every running
/// channel source.
///
/// `broadcast` only offers the shared buffer to each bounded queue, so the
/// capture thread never waits on a channel.
#[derive(Debug, Default)]
pub struct TunerFeed {
    queues: Mutex<QueueList>,
}

impl TunerFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, queue: Arc<SampleQueue>) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = Vec::with_capacity(queues.len() + 1);
        next.extend(queues.iter().cloned());
        next.push(queue);
        *queues = Arc::new(next);
    }

    /// Returns `false` when `queue` was not registered
    pub fn unregister(&self, queue: &Arc<SampleQueue>) -> bool {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if !queues.iter().any(|q| Arc::ptr_eq(q, queue)) {
            return false;
        }
        let next: Vec<_> = queues
            .iter()
            .filter(|q| !Arc::ptr_eq(q, queue))
            .cloned()
            .collect();
        *queues = Arc::new(next);
        true
    }

    /// Offer `buffer` to every registered queue
    pub fn broadcast(&self, buffer: ComplexBuffer) {
        let queues = Arc::clone(&self.queues.lock().unwrap_or_else(|e| e.into_inner()));
        for queue in queues.iter() {
            queue.offer(Arc::clone(&buffer));
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.queues.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    #[test]
    fn test_broadcast_shares_buffer() {
        let feed = TunerFeed::new();
        let a = Arc::new(SampleQueue::new("a", 4));
        let b = Arc::new(SampleQueue::new("b", 4));
        feed.register(Arc::clone(&a));
        feed.register(Arc::clone(&b));
        assert_eq!(feed.receiver_count(), 2);

        let buffer: ComplexBuffer = Arc::from(vec![Complex::new(1.0, 0.0); 8]);
        feed.broadcast(Arc::clone(&buffer));
        assert!(Arc::ptr_eq(&a.poll().unwrap(), &buffer));
        assert!(Arc::ptr_eq(&b.poll().unwrap(), &buffer));
    }

    #[test]
    fn test_unregister() {
        let feed = TunerFeed::new();
        let a = Arc::new(SampleQueue::new("a", 4));
        feed.register(Arc::clone(&a));
        assert!(feed.unregister(&a));
        assert!(!feed.unregister(&a));
        feed.broadcast(Arc::from(vec![Complex::new(0.0, 0.0); 2]));
        assert!(a.is_empty());
    }
}
