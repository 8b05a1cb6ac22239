// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Min-heap of idle-connection deadlines with lazy invalidation.
//!
//! Entries don't hold a reactor back-reference and aren't removed from the
//! heap on cancellation; a cancelled entry is just marked invalid and is
//! skipped (and dropped) the next time [`TimerHeap::tick`] walks past it.
//! This keeps `cancel`/`refresh` O(1) instead of requiring a reheapify.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

/// Opaque handle to a live timer entry. Cancelling a handle is O(1): it just
/// flips the shared `valid` flag, leaving the heap entry as a tombstone.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    valid: Rc<Cell<bool>>,
}

impl TimerHandle {
    fn new() -> (Self, Rc<Cell<bool>>) {
        let valid = Rc::new(Cell::new(true));
        (
            Self {
                valid: valid.clone(),
            },
            valid,
        )
    }
}

struct Entry<T> {
    deadline: u64,
    valid: Rc<Cell<bool>>,
    payload: T,
}

impl<T> Entry<T> {
    fn is_valid(&self) -> bool {
        self.valid.get()
    }
}

// Ordered by deadline only; wrapped in `Reverse` at push/pop sites so that
// `BinaryHeap`, a max-heap by default, behaves as a min-heap over deadlines.
impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap::pop` yields the earliest deadline first.
        other.deadline.cmp(&self.deadline)
    }
}

/// Min-heap of deadlines, generic over the payload fired when a deadline
/// elapses. The payload is a tagged value (e.g. a connection token) rather
/// than a closure: `tick` hands fired payloads back to the caller instead of
/// invoking a callback, so the heap never needs to know about the reactor.
#[derive(Debug, Default)]
pub struct TimerHeap<T> {
    heap: BinaryHeap<Entry<T>>,
}

impl<T> TimerHeap<T> {
    /// Creates an empty timer heap.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Schedules `payload` to fire `delay_secs` after `now`, returning a
    /// handle that can later cancel or be superseded by [`TimerHeap::refresh`].
    pub fn add(&mut self, now: u64, delay_secs: u64, payload: T) -> TimerHandle {
        let (handle, valid) = TimerHandle::new();
        self.heap.push(Entry {
            deadline: now + delay_secs,
            valid,
            payload,
        });
        handle
    }

    /// Marks `handle`'s entry invalid. The entry is not removed from the heap
    /// immediately; it is skipped and dropped on the next [`TimerHeap::tick`]
    /// that reaches it.
    pub fn cancel(&mut self, handle: &TimerHandle) {
        handle.valid.set(false);
    }

    /// Equivalent to `cancel(handle)` followed by `add(now, delay_secs, payload)`.
    pub fn refresh(&mut self, handle: &TimerHandle, now: u64, delay_secs: u64, payload: T) -> TimerHandle {
        self.cancel(handle);
        self.add(now, delay_secs, payload)
    }

    /// Pops and returns every payload whose deadline is `<= now`, dropping any
    /// tombstoned (invalid) entries encountered along the way. Stops as soon
    /// as the root's deadline is in the future.
    pub fn tick(&mut self, now: u64) -> Vec<T> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if !top.is_valid() {
                self.heap.pop();
                continue;
            }
            if top.deadline > now {
                break;
            }
            // SAFETY of unwrap: we just peeked Some above.
            let entry = self.heap.pop().unwrap();
            fired.push(entry.payload);
        }
        fired
    }

    /// Number of entries still in the heap, including tombstones.
    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_due_entries_in_deadline_order() {
        let mut heap = TimerHeap::new();
        heap.add(0, 10, "b");
        heap.add(0, 5, "a");
        heap.add(0, 15, "c");

        assert_eq!(heap.tick(4), Vec::<&str>::new());
        assert_eq!(heap.tick(5), vec!["a"]);
        assert_eq!(heap.tick(10), vec!["b"]);
        assert_eq!(heap.tick(100), vec!["c"]);
    }

    #[test]
    fn cancel_then_tick_never_fires_the_cancelled_entry() {
        let mut heap = TimerHeap::new();
        let handle = heap.add(0, 5, "a");
        heap.add(0, 6, "b");

        heap.cancel(&handle);
        assert_eq!(heap.tick(100), vec!["b"]);
    }

    #[test]
    fn refresh_replaces_deadline_without_firing_old_one() {
        let mut heap = TimerHeap::new();
        let handle = heap.add(0, 5, "a");
        let handle = heap.refresh(&handle, 0, 20, "a");

        assert_eq!(heap.tick(5), Vec::<&str>::new());
        assert_eq!(heap.tick(20), vec!["a"]);
        // refreshed handle is independent of the stale original
        heap.cancel(&handle);
    }

    #[test]
    fn tombstones_are_collected_on_next_tick() {
        let mut heap = TimerHeap::new();
        let handle = heap.add(0, 5, "a");
        heap.add(0, 5, "b");
        assert_eq!(heap.raw_len(), 2);

        heap.cancel(&handle);
        let fired = heap.tick(5);
        assert_eq!(fired, vec!["b"]);
        assert_eq!(heap.raw_len(), 0);
    }

    #[test]
    fn empty_heap_ticks_cleanly() {
        let mut heap: TimerHeap<u32> = TimerHeap::new();
        assert_eq!(heap.tick(1000), Vec::<u32>::new());
    }
}
