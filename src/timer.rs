//! Timer wheel (§4.2): a min-ordered list of `(deadline, callback)` entries
//! keyed by monotonic `Instant`, not wall clock. Structured as a slab of
//! entries plus a binary heap of handles ordered by deadline, following the
//! handle/slab split the teacher's own (now-deprecated) `timer.rs` uses,
//! generalized here to a simple sorted structure per the design notes
//! rather than a tick-bucketed wheel, since entry counts are tiny (one
//! heartbeat timer) and precision matters more than O(1) insertion.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Opaque handle returned by `TimerWheel::add`, used to `remove` a timer
/// before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// What a fired callback tells the wheel to do with its own entry.
pub enum TimerAction {
    /// Reinsert with the same interval, relative to the deadline that just
    /// fired (not to "now"), so a slow poll doesn't stretch the period.
    Reschedule,
    /// Drop the entry.
    Cancel,
}

struct Entry<T> {
    interval: Duration,
    callback: Box<dyn FnMut(&mut T) -> TimerAction>,
}

struct Scheduled {
    deadline: Instant,
    id: u64,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Scheduled {}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline on top.
        other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Monotonic timer wheel parameterized over the type its callbacks mutate
/// (the connection instance).
pub struct TimerWheel<T> {
    entries: std::collections::HashMap<u64, Entry<T>>,
    heap: BinaryHeap<Scheduled>,
    next_id: u64,
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        TimerWheel {
            entries: std::collections::HashMap::new(),
            heap: BinaryHeap::new(),
            next_id: 1,
        }
    }

    /// Schedules `callback` to fire after `interval`, and again every
    /// `interval` thereafter as long as it returns `Reschedule`.
    pub fn add(
        &mut self,
        interval: Duration,
        callback: impl FnMut(&mut T) -> TimerAction + 'static,
    ) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                interval,
                callback: Box::new(callback),
            },
        );
        self.heap.push(Scheduled {
            deadline: Instant::now() + interval,
            id,
        });
        TimerHandle(id)
    }

    pub fn remove(&mut self, handle: TimerHandle) {
        self.entries.remove(&handle.0);
        // Lazily dropped from the heap in `expire_due`/`time_to_next_deadline`.
    }

    /// Invokes every callback whose deadline has passed, mutating `state`.
    /// Must be called with the same `now` used to decide the poll timeout,
    /// so that a callback observing "now" stays consistent with §5's
    /// "timer callbacks observe state as of the end of the prior cycle".
    pub fn expire_due(&mut self, state: &mut T) {
        let now = Instant::now();
        loop {
            let Some(top) = self.heap.peek() else {
                break;
            };
            if top.deadline > now {
                break;
            }
            let Scheduled { deadline, id } = self.heap.pop().unwrap();
            let Some(entry) = self.entries.get_mut(&id) else {
                // Removed since being scheduled; drop silently.
                continue;
            };
            match (entry.callback)(state) {
                TimerAction::Reschedule => {
                    let interval = entry.interval;
                    self.heap.push(Scheduled {
                        deadline: deadline + interval,
                        id,
                    });
                }
                TimerAction::Cancel => {
                    self.entries.remove(&id);
                }
            }
        }
    }

    /// Bounds the poller: `None` means no timer pending.
    pub fn time_to_next_deadline(&mut self) -> Option<Duration> {
        self.prune_dead();
        self.heap.peek().map(|top| {
            top.deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO)
        })
    }

    fn prune_dead(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.entries.contains_key(&top.id) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn fires_after_interval_and_reschedules() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new();
        let mut state = 0u32;
        wheel.add(Duration::from_millis(5), |s: &mut u32| {
            *s += 1;
            TimerAction::Reschedule
        });

        sleep(Duration::from_millis(10));
        wheel.expire_due(&mut state);
        assert_eq!(state, 1);

        sleep(Duration::from_millis(10));
        wheel.expire_due(&mut state);
        assert_eq!(state, 2);
    }

    #[test]
    fn cancel_stops_future_firings() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new();
        let mut state = 0u32;
        wheel.add(Duration::from_millis(1), |s: &mut u32| {
            *s += 1;
            TimerAction::Cancel
        });
        sleep(Duration::from_millis(5));
        wheel.expire_due(&mut state);
        assert_eq!(state, 1);
        sleep(Duration::from_millis(5));
        wheel.expire_due(&mut state);
        assert_eq!(state, 1);
    }

    #[test]
    fn remove_before_fire_is_silent() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new();
        let mut state = 0u32;
        let handle = wheel.add(Duration::from_millis(1), |s: &mut u32| {
            *s += 1;
            TimerAction::Reschedule
        });
        wheel.remove(handle);
        sleep(Duration::from_millis(5));
        wheel.expire_due(&mut state);
        assert_eq!(state, 0);
        assert!(wheel.time_to_next_deadline().is_none());
    }
}
