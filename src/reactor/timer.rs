// Min-heap timer wheel: monotonic ids, binary-heap array storage, and the
// same growth/shrink policy as the original `sev_timers_resize`.

use std::time::{Duration, Instant};

/// Initial/floor capacity of the timer heap.
pub const DEFAULT_SIZE: usize = 128;
/// Hard cap on heap growth.
pub const MAX_SIZE: usize = 131_072;

/// `0` is reserved to mean "no timer" (matches the original's `tmaxid`
/// starting at 0 and never being returned as a live id).
pub type TimerId = u64;

pub type TimerProc = Box<dyn FnMut(TimerId) + Send>;

struct Timer {
    id: TimerId,
    due: Instant,
    proc: TimerProc,
}

/// Binary min-heap over `due`, keyed by insertion order for ties (stable
/// enough; the original doesn't guarantee tie-break order either).
pub struct TimerHeap {
    timers: Vec<Timer>,
    next_id: TimerId,
    max_size: usize,
}

fn parent(i: usize) -> usize {
    (i - 1) / 2
}
fn left(i: usize) -> usize {
    2 * i + 1
}
fn right(i: usize) -> usize {
    2 * i + 2
}

impl TimerHeap {
    pub fn new() -> Self {
        Self {
            timers: Vec::with_capacity(DEFAULT_SIZE),
            next_id: 0,
            max_size: DEFAULT_SIZE,
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Schedule `proc` to fire after `timeout`. Returns `0` (the reserved
    /// sentinel) if the heap has grown past [`MAX_SIZE`].
    pub fn add(&mut self, timeout: Duration, proc: TimerProc) -> TimerId {
        if self.timers.len() >= self.max_size && self.grow().is_err() {
            return 0;
        }

        self.next_id += 1;
        let id = self.next_id;
        let timer = Timer {
            id,
            due: Instant::now() + timeout,
            proc,
        };

        let i = self.timers.len();
        self.timers.push(timer);
        self.sift_up(i);
        id
    }

    pub fn del(&mut self, id: TimerId) -> bool {
        let Some(i) = self.timers.iter().position(|t| t.id == id) else {
            return false;
        };
        self.remove_at(i);
        self.maybe_shrink();
        true
    }

    fn remove_at(&mut self, i: usize) {
        let last = self.timers.len() - 1;
        if i != last {
            self.timers.swap(i, last);
        }
        self.timers.pop();

        if i < self.timers.len() {
            if i == 0 || self.cmp(i, parent(i)).is_gt() {
                self.sift_down(i);
            } else {
                self.sift_up(i);
            }
        }
    }

    /// Fire every timer whose deadline has passed. The callback runs while
    /// the timer is still in the heap (so it can legally delete itself or
    /// any other timer by id), matching the original's invoke-then-remove
    /// order.
    pub fn process_due(&mut self) -> usize {
        let mut fired = 0;
        loop {
            let Some(top) = self.timers.first() else {
                break;
            };
            if top.due > Instant::now() {
                break;
            }
            let id = top.id;
            // Take the callback out so `proc` can freely mutate the heap
            // (including deleting itself) without a double borrow.
            let mut proc = {
                let timer = &mut self.timers[0];
                std::mem::replace(&mut timer.proc, Box::new(|_| {}))
            };
            proc(id);
            self.del(id);
            fired += 1;
        }
        fired
    }

    /// Seconds until the next timer is due, for bounding the reactor's poll
    /// timeout. `None` means no timers are scheduled.
    pub fn next_due_in(&self) -> Option<Duration> {
        self.timers
            .first()
            .map(|t| t.due.saturating_duration_since(Instant::now()))
    }

    fn cmp(&self, i: usize, j: usize) -> std::cmp::Ordering {
        self.timers[i].due.cmp(&self.timers[j].due)
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let p = parent(i);
            if self.cmp(i, p).is_lt() {
                self.timers.swap(i, p);
                i = p;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let l = left(i);
            let r = right(i);
            let mut smallest = i;
            if l < self.timers.len() && self.cmp(l, smallest).is_lt() {
                smallest = l;
            }
            if r < self.timers.len() && self.cmp(r, smallest).is_lt() {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.timers.swap(i, smallest);
            i = smallest;
        }
    }

    fn grow(&mut self) -> Result<(), ()> {
        let new_max = self.max_size * 2;
        if new_max > MAX_SIZE {
            return Err(());
        }
        self.max_size = new_max;
        Ok(())
    }

    fn maybe_shrink(&mut self) {
        if self.timers.len() <= self.max_size / 4 && self.max_size / 2 >= DEFAULT_SIZE {
            self.max_size /= 2;
        }
    }

    /// Checks the min-heap property holds over the whole array: every
    /// parent's `due` is no later than either child's. Test-only.
    #[cfg(test)]
    fn is_min_heap(&self) -> bool {
        (0..self.timers.len()).all(|i| {
            let l = left(i);
            let r = right(i);
            (l >= self.timers.len() || self.cmp(i, l).is_le())
                && (r >= self.timers.len() || self.cmp(i, r).is_le())
        })
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fires_in_due_order() {
        let mut heap = TimerHeap::new();
        let order: Arc<std::sync::Mutex<Vec<i32>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        heap.add(
            Duration::from_millis(0),
            Box::new(move |_| o1.lock().expect("poisoned").push(1)),
        );
        heap.add(
            Duration::from_millis(0),
            Box::new(move |_| o2.lock().expect("poisoned").push(2)),
        );
        std::thread::sleep(Duration::from_millis(5));
        heap.process_due();
        assert_eq!(*order.lock().expect("poisoned"), vec![1, 2]);
    }

    #[test]
    fn zero_is_never_returned_as_a_live_id() {
        let mut heap = TimerHeap::new();
        let id = heap.add(Duration::from_secs(10), Box::new(|_| {}));
        assert_ne!(id, 0);
    }

    #[test]
    fn delete_by_id_removes_exactly_one_timer() {
        let mut heap = TimerHeap::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c1 = counter.clone();
        let c2 = counter.clone();
        let id_a = heap.add(Duration::from_secs(10), Box::new(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        let _id_b = heap.add(Duration::from_secs(10), Box::new(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(heap.del(id_a));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn grows_past_default_capacity() {
        let mut heap = TimerHeap::new();
        for _ in 0..(DEFAULT_SIZE + 10) {
            heap.add(Duration::from_secs(60), Box::new(|_| {}));
        }
        assert_eq!(heap.len(), DEFAULT_SIZE + 10);
        assert!(heap.max_size > DEFAULT_SIZE);
    }

    #[test]
    fn shrinks_back_down_after_draining() {
        let mut heap = TimerHeap::new();
        let mut ids = Vec::new();
        for _ in 0..(DEFAULT_SIZE * 3) {
            ids.push(heap.add(Duration::from_secs(60), Box::new(|_| {})));
        }
        for id in ids {
            heap.del(id);
        }
        assert_eq!(heap.max_size, DEFAULT_SIZE);
    }

    proptest! {
        // the timer heap satisfies the min-heap property after every
        // insert and every delete. Drives a random sequence of inserts
        // (with randomized delays, so ordering isn't insertion order) and
        // deletes-by-index, checking the heap invariant after each step.
        #[test]
        fn min_heap_property_survives_random_inserts_and_deletes(
            ops in proptest::collection::vec(
                (proptest::bool::ANY, 0u64..500, 0usize..64),
                1..200,
            )
        ) {
            let mut heap = TimerHeap::new();
            let mut live_ids: Vec<TimerId> = Vec::new();

            for (is_insert, delay_ms, pick) in ops {
                if is_insert || live_ids.is_empty() {
                    let id = heap.add(Duration::from_millis(delay_ms), Box::new(|_| {}));
                    if id != 0 {
                        live_ids.push(id);
                    }
                } else {
                    let idx = pick % live_ids.len();
                    let id = live_ids.swap_remove(idx);
                    heap.del(id);
                }
                prop_assert!(heap.is_min_heap());
            }
        }
    }
}
