// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! An ordered timer set for event loops.
//!
//! The wheel is driven by its owning loop: the loop bounds its poll timeout
//! with [`TimerWheel::next_timeout`] and runs [`TimerWheel::poll_expired`]
//! after each wakeup. Cancellation is lazy: a cancelled entry stays in the
//! heap until its deadline and is skipped when it surfaces. This keeps
//! cancellation O(1) and makes it safe to cancel a repeating timer from
//! within its own callback, which prevents the next fire.

use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

// lower bound for a pending poll timeout, so a deadline a few microseconds
// out does not degenerate into a zero-timeout spin
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Identifies a scheduled timer. Ids are unique for the lifetime of the
/// wheel and are never reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

struct Entry<T> {
    deadline: Instant,
    id: TimerId,
    period: Option<Duration>,
    value: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // reversed so the BinaryHeap pops the earliest deadline first, ties
        // broken by id for deterministic ordering
        match other.deadline.cmp(&self.deadline) {
            std::cmp::Ordering::Equal => other.id.cmp(&self.id),
            ord => ord,
        }
    }
}

pub struct TimerWheel<T> {
    heap: BinaryHeap<Entry<T>>,
    active: HashSet<TimerId>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
}

impl<T> Default for TimerWheel<T>
where
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerWheel<T>
where
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            active: HashSet::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        }
    }

    fn push(&mut self, deadline: Instant, period: Option<Duration>, value: T) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.active.insert(id);
        self.heap.push(Entry {
            deadline,
            id,
            period,
            value,
        });
        id
    }

    /// Schedule a one-shot timer `delay` from now.
    pub fn schedule(&mut self, delay: Duration, value: T) -> TimerId {
        self.push(Instant::now() + delay, None, value)
    }

    /// Schedule a repeating timer. The first fire is one `interval` from now.
    pub fn schedule_repeating(&mut self, interval: Duration, value: T) -> TimerId {
        self.push(Instant::now() + interval, Some(interval), value)
    }

    /// Cancel a timer. Returns `true` when the timer was still scheduled.
    /// Cancelling a repeating timer from within its own callback prevents it
    /// from firing again.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if self.active.remove(&id) {
            self.cancelled.insert(id);
            true
        } else {
            false
        }
    }

    /// How long the owning loop may sleep before the earliest timer is due.
    /// Returns `None` when nothing is scheduled.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        // a cancelled entry at the head only causes one early wakeup; it is
        // discarded by the next poll_expired call
        self.heap.peek().map(|entry| {
            if entry.deadline <= now {
                Duration::from_millis(0)
            } else {
                (entry.deadline - now).max(MIN_TIMEOUT)
            }
        })
    }

    /// Pop every timer with `deadline <= now`, in non-decreasing deadline
    /// order. Repeating timers are re-armed at `now + interval` before being
    /// returned, so a callback may cancel its own id to stop the repetition.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<(TimerId, T)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            if let Some(period) = entry.period {
                self.heap.push(Entry {
                    deadline: now + period,
                    id: entry.id,
                    period: entry.period,
                    value: entry.value.clone(),
                });
            } else {
                self.active.remove(&entry.id);
            }
            expired.push((entry.id, entry.value));
        }
        expired
    }

    /// Number of live (scheduled, not cancelled) timers.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
