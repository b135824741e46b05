//! Sample Bridge: bounded single-producer/single-consumer queue of Sample
//! Blocks between the Device Source thread and the DSP worker thread.
//! Drop-oldest when full; dropped count is tracked. The consumer accepts
//! a poison value that makes it return immediately rather than waiting
//! out its read timeout.
//!
//! Built on native `Mutex`/`Condvar` rather than an async channel, since
//! both ends here are native OS threads.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use spectra_core::SampleBlock;

struct Inner {
    queue: VecDeque<Option<SampleBlock>>,
    dropped: u64,
    poisoned: bool,
}

pub struct SampleBridge {
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl SampleBridge {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dropped: 0,
                poisoned: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes a block, dropping the oldest queued block if at capacity.
    /// No-op once poisoned.
    pub fn push(&self, block: SampleBlock) {
        let mut inner = self.inner.lock().expect("sample bridge mutex poisoned");
        if inner.poisoned {
            return;
        }
        if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            inner.dropped += 1;
        }
        inner.queue.push_back(Some(block));
        self.not_empty.notify_one();
    }

    /// Blocks up to `timeout` for the next block. Returns `None` on
    /// timeout or once the poison value has been consumed.
    pub fn pop(&self, timeout: Duration) -> Option<SampleBlock> {
        let mut inner = self.inner.lock().expect("sample bridge mutex poisoned");
        loop {
            if let Some(item) = inner.queue.pop_front() {
                return item;
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(inner, timeout)
                .expect("sample bridge condvar poisoned");
            inner = guard;
            if result.timed_out() {
                return None;
            }
        }
    }

    /// Injects the poison marker so a blocked consumer returns promptly.
    pub fn poison(&self) {
        let mut inner = self.inner.lock().expect("sample bridge mutex poisoned");
        inner.poisoned = true;
        inner.queue.push_back(None);
        self.not_empty.notify_all();
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().expect("sample bridge mutex poisoned").dropped
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.inner.lock().expect("sample bridge mutex poisoned").poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(seq: u64) -> SampleBlock {
        SampleBlock {
            samples: vec![0.0; 4],
            center_freq: 1.0,
            sample_rate: 1.0,
            seq,
        }
    }

    #[test]
    fn drop_oldest_never_reorders_delivered_blocks() {
        let bridge = SampleBridge::new(2);
        bridge.push(block(0));
        bridge.push(block(1));
        bridge.push(block(2)); // drops seq 0
        assert_eq!(bridge.dropped_count(), 1);
        let first = bridge.pop(Duration::from_millis(10)).unwrap();
        let second = bridge.pop(Duration::from_millis(10)).unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
    }

    #[test]
    fn poison_returns_immediately() {
        let bridge = SampleBridge::new(4);
        bridge.poison();
        assert!(bridge.pop(Duration::from_secs(5)).is_none());
        assert!(bridge.is_poisoned());
    }

    #[test]
    fn pop_times_out_when_empty() {
        let bridge = SampleBridge::new(4);
        assert!(bridge.pop(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn dropped_count_is_monotonic() {
        let bridge = SampleBridge::new(1);
        bridge.push(block(0));
        bridge.push(block(1));
        bridge.push(block(2));
        let d1 = bridge.dropped_count();
        bridge.push(block(3));
        let d2 = bridge.dropped_count();
        assert!(d2 >= d1);
    }
}
