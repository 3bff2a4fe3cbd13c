//! Epoch-counter signalling (spec §3, §4.2).
//!
//! The teacher's `signal.rs` exposed only polling (`Epoch::has_changed`) over
//! a `SafeSAB`, since a browser worker has no blocking primitive across a
//! `SharedArrayBuffer` boundary other than `Atomics.wait`. Here the kernel
//! runs as native threads, so `EpochArray::wait` adds a bounded spin
//! followed by a `parking_lot::Condvar` park, while keeping the teacher's
//! atomic increment/current-value core and per-reader cursor shape.

use crate::layout::{EPOCH_COUNT, OFFSET_EPOCH_ARRAY};
use crate::memory::MemoryProvider;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SPIN_ITERATIONS: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Changed(u32),
    TimedOut,
}

/// Returns whether `current` is strictly ahead of `last` under wraparound,
/// i.e. treats the 32-bit counter space as cyclic (spec §4.2 "wrap-safe").
fn has_advanced(current: u32, last: u32) -> bool {
    (current.wrapping_sub(last) as i32) > 0
}

struct WaiterCell {
    lock: Mutex<()>,
    condvar: Condvar,
}

/// Shared view over the arena's 192 epoch counters plus the park/wake
/// bookkeeping used by [`EpochArray::wait`]. One instance is shared by every
/// [`Reader`] and every writer in the process.
pub struct EpochArray {
    mem: Arc<dyn MemoryProvider>,
    waiters: Mutex<HashMap<u32, Arc<WaiterCell>>>,
}

impl EpochArray {
    pub fn new(mem: Arc<dyn MemoryProvider>) -> Self {
        Self {
            mem,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    fn offset(index: u32) -> usize {
        OFFSET_EPOCH_ARRAY + index as usize * 4
    }

    pub fn get(&self, index: u32) -> u32 {
        debug_assert!(index < EPOCH_COUNT, "epoch index {index} out of range");
        self.mem.atomic_load_u32(Self::offset(index)).unwrap_or(0)
    }

    /// Bumps the counter and wakes every thread parked on this index. At
    /// least one waiter (if any) observes the new value (spec §4.2
    /// "at-least-one-wake per increment").
    pub fn increment(&self, index: u32) -> u32 {
        debug_assert!(index < EPOCH_COUNT, "epoch index {index} out of range");
        let next = self.mem.atomic_add_u32(Self::offset(index), 1).unwrap_or(0) + 1;
        if let Some(cell) = self.waiters.lock().get(&index).cloned() {
            let _guard = cell.lock.lock();
            cell.condvar.notify_all();
        }
        next
    }

    fn waiter_cell(&self, index: u32) -> Arc<WaiterCell> {
        self.waiters
            .lock()
            .entry(index)
            .or_insert_with(|| {
                Arc::new(WaiterCell {
                    lock: Mutex::new(()),
                    condvar: Condvar::new(),
                })
            })
            .clone()
    }

    /// Blocks the calling thread until the counter at `index` advances past
    /// `last_seen`, or `timeout` elapses. Spins briefly first (most waits
    /// resolve within microseconds on a busy kernel) and falls back to
    /// parking on a condvar so idle workers don't burn CPU.
    pub fn wait(&self, index: u32, last_seen: u32, timeout: Duration) -> WaitResult {
        let deadline = Instant::now() + timeout;

        for _ in 0..SPIN_ITERATIONS {
            let current = self.get(index);
            if has_advanced(current, last_seen) {
                return WaitResult::Changed(current);
            }
            std::hint::spin_loop();
        }

        let cell = self.waiter_cell(index);
        loop {
            let current = self.get(index);
            if has_advanced(current, last_seen) {
                return WaitResult::Changed(current);
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitResult::TimedOut;
            }
            let mut guard = cell.lock.lock();
            // Re-check with the lock held to close the race between the
            // load above and waiting on the condvar.
            let current = self.get(index);
            if has_advanced(current, last_seen) {
                return WaitResult::Changed(current);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return WaitResult::TimedOut;
            }
            let _ = cell.condvar.wait_for(&mut guard, remaining);
        }
    }
}

/// An independent read cursor over one epoch index. Two readers on the same
/// index never interfere (spec §4.2 "independent Reader cursors").
pub struct Reader {
    array: Arc<EpochArray>,
    index: u32,
    last_seen: u32,
}

impl Reader {
    pub fn new(array: Arc<EpochArray>, index: u32) -> Self {
        let last_seen = array.get(index);
        Self {
            array,
            index,
            last_seen,
        }
    }

    pub fn poll(&mut self) -> bool {
        let current = self.array.get(self.index);
        if has_advanced(current, self.last_seen) {
            self.last_seen = current;
            true
        } else {
            false
        }
    }

    pub fn wait(&mut self, timeout: Duration) -> WaitResult {
        match self.array.wait(self.index, self.last_seen, timeout) {
            WaitResult::Changed(v) => {
                self.last_seen = v;
                WaitResult::Changed(v)
            }
            WaitResult::TimedOut => WaitResult::TimedOut,
        }
    }

    pub fn last_seen(&self) -> u32 {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::memory::InProcessMemory;

    fn array() -> Arc<EpochArray> {
        Arc::new(EpochArray::new(Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT))))
    }

    #[test]
    fn increment_is_observed_by_reader() {
        let array = array();
        let mut reader = Reader::new(array.clone(), 5);
        assert!(!reader.poll());
        array.increment(5);
        assert!(reader.poll());
        assert!(!reader.poll());
    }

    #[test]
    fn wait_returns_immediately_when_already_advanced() {
        let array = array();
        array.increment(3);
        let result = array.wait(3, 0, Duration::from_millis(50));
        assert_eq!(result, WaitResult::Changed(1));
    }

    #[test]
    fn wait_times_out_when_never_signalled() {
        let array = array();
        let result = array.wait(9, 0, Duration::from_millis(20));
        assert_eq!(result, WaitResult::TimedOut);
    }

    #[test]
    fn wait_wakes_on_increment_from_another_thread() {
        let array = array();
        let writer = array.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.increment(1);
        });
        let result = array.wait(1, 0, Duration::from_secs(2));
        assert_eq!(result, WaitResult::Changed(1));
        handle.join().unwrap();
    }

    #[test]
    fn wraparound_is_handled_safely() {
        assert!(has_advanced(0, u32::MAX));
        assert!(!has_advanced(u32::MAX, 0));
    }
}
