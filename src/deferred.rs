use std::time::{Duration, Instant};

use heapless::Deque;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Enough for one enable of every quad channel with headroom.
pub const MAX_DEFERRED_COMMANDS: usize = 32;

#[derive(Debug, Clone)]
pub struct DeferredCommand<T> {
    pub action: T,
    /// Minimum spacing from the previously released command.
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ExecutorStats {
    pub total_enqueued: u32,
    pub total_released: u32,
    pub total_cleared: u32,
    pub currently_pending: u8,
}

/// FIFO of actions, each released no sooner than its delay after the
/// previous release. The first release is immediate.
///
/// Nothing runs on its own: the owner calls [`release`](Self::release) (or
/// [`process`](Self::process) for closures) from its periodic tick.
#[derive(Debug)]
pub struct DeferredExecutor<T> {
    queue: Deque<DeferredCommand<T>, MAX_DEFERRED_COMMANDS>,
    last_released: Option<Instant>,
    stats: ExecutorStats,
}

impl<T> DeferredExecutor<T> {
    pub fn new() -> Self {
        Self {
            queue: Deque::new(),
            last_released: None,
            stats: ExecutorStats::default(),
        }
    }

    pub fn enqueue(&mut self, action: T, delay: Duration) -> Result<(), &'static str> {
        debug_assert!(
            self.queue.len() <= MAX_DEFERRED_COMMANDS,
            "Deferred queue length {} over capacity {}",
            self.queue.len(),
            MAX_DEFERRED_COMMANDS
        );

        self.queue
            .push_back(DeferredCommand { action, delay })
            .map_err(|_| "Deferred command queue full")?;
        self.stats.total_enqueued = self.stats.total_enqueued.wrapping_add(1);
        self.stats.currently_pending = self.queue.len() as u8;
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pop the head if its delay since the last release has elapsed.
    pub fn release(&mut self, now: Instant) -> Option<T> {
        let head = self.queue.front()?;
        if let Some(last) = self.last_released {
            if now.saturating_duration_since(last) < head.delay {
                return None;
            }
        }

        let command = self.queue.pop_front()?;
        self.last_released = Some(now);
        self.stats.total_released = self.stats.total_released.wrapping_add(1);
        self.stats.currently_pending = self.queue.len() as u8;
        trace!("Released deferred command, {} pending", self.queue.len());
        Some(command.action)
    }

    /// Drop everything pending. Returns how many commands were discarded.
    pub fn clear(&mut self) -> usize {
        let cleared = self.queue.len();
        self.queue.clear();
        self.stats.total_cleared = self.stats.total_cleared.wrapping_add(cleared as u32);
        self.stats.currently_pending = 0;
        cleared
    }

    pub fn last_released(&self) -> Option<Instant> {
        self.last_released
    }

    pub fn get_stats(&self) -> &ExecutorStats {
        &self.stats
    }
}

impl<F: FnOnce()> DeferredExecutor<F> {
    /// Run at most one due closure. Returns whether one ran.
    pub fn process(&mut self, now: Instant) -> bool {
        match self.release(now) {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }
}

impl<T> Default for DeferredExecutor<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const STEP: Duration = Duration::from_millis(100);

    #[test]
    fn test_first_release_is_immediate() {
        let mut executor = DeferredExecutor::new();
        executor.enqueue('a', Duration::from_secs(10)).unwrap();
        assert_eq!(executor.release(Instant::now()), Some('a'));
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn test_releases_in_order_with_spacing() {
        let start = Instant::now();
        let mut executor = DeferredExecutor::new();
        for n in 0..4 {
            executor.enqueue(n, STEP * 3).unwrap();
        }

        let mut released = Vec::new();
        let mut release_times = Vec::new();
        for tick in 0..20u32 {
            let now = start + STEP * tick;
            if let Some(n) = executor.release(now) {
                released.push(n);
                release_times.push(now);
            }
        }

        assert_eq!(released, vec![0, 1, 2, 3]);
        for pair in release_times.windows(2) {
            assert!(pair[1] - pair[0] >= STEP * 3);
        }
        assert_eq!(executor.get_stats().total_released, 4);
    }

    #[test]
    fn test_nothing_pending_is_noop() {
        let mut executor: DeferredExecutor<u8> = DeferredExecutor::new();
        assert_eq!(executor.release(Instant::now()), None);
        assert!(executor.last_released().is_none());
    }

    #[test]
    fn test_clear_discards_pending() {
        let now = Instant::now();
        let mut executor = DeferredExecutor::new();
        for n in 0..5 {
            executor.enqueue(n, STEP).unwrap();
        }
        assert_eq!(executor.release(now), Some(0));
        assert_eq!(executor.clear(), 4);
        assert_eq!(executor.pending(), 0);
        assert_eq!(executor.release(now + STEP * 10), None);
        assert_eq!(executor.get_stats().total_cleared, 4);
    }

    #[test]
    fn test_queue_capacity() {
        let mut executor = DeferredExecutor::new();
        for n in 0..MAX_DEFERRED_COMMANDS {
            executor.enqueue(n, STEP).unwrap();
        }
        assert!(executor.enqueue(99, STEP).is_err());
    }

    #[test]
    fn test_process_runs_closures() {
        let start = Instant::now();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut executor = DeferredExecutor::new();
        for n in 0..3 {
            let calls = Rc::clone(&calls);
            executor
                .enqueue(Box::new(move || calls.borrow_mut().push(n)) as Box<dyn FnOnce()>, STEP)
                .unwrap();
        }

        assert!(executor.process(start));
        assert!(!executor.process(start + STEP / 2));
        assert!(executor.process(start + STEP));
        assert!(executor.process(start + STEP * 2));
        assert!(!executor.process(start + STEP * 10));
        assert_eq!(*calls.borrow(), vec![0, 1, 2]);
    }
}
