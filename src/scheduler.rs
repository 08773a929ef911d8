// Copyright (c) 2023 The TQUIC Authors.
//
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

//! A discrete-event scheduler driving a simulated clock.

use std::time::Duration;
use std::time::Instant;

use priority_queue::double_priority_queue::DoublePriorityQueue;
use slab::Slab;

/// Handle of a scheduled event, used for cancellation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
    /// Slot of the event payload.
    key: usize,

    /// Insertion sequence, distinguishes events reusing the same slot.
    seq: u64,
}

/// Store events in a binary queue. Keep them sorted by which event is going to
/// fire first; events scheduled for the same instant fire in insertion order.
pub struct Scheduler<E> {
    /// Current simulated time.
    now: Instant,

    /// Pending event payloads with their insertion sequence.
    events: Slab<(u64, E)>,

    /// Expiration order of the pending events.
    timers: DoublePriorityQueue<usize, (Instant, u64)>,

    /// Next insertion sequence.
    next_seq: u64,
}

impl<E> Scheduler<E> {
    /// Create a new Scheduler whose clock starts at `start`.
    pub fn new(start: Instant) -> Self {
        Self {
            now: start,
            events: Slab::new(),
            timers: DoublePriorityQueue::new(),
            next_seq: 0,
        }
    }

    /// Return the current simulated time.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Return the number of pending events.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Return if there is no pending event.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Schedule an event at the given time. Times in the past are treated as
    /// now.
    pub fn schedule_at(&mut self, time: Instant, event: E) -> EventId {
        let time = time.max(self.now);
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = self.events.insert((seq, event));
        _ = self.timers.push(key, (time, seq));
        EventId { key, seq }
    }

    /// Schedule an event after the given delay.
    pub fn schedule_after(&mut self, delay: Duration, event: E) -> EventId {
        self.schedule_at(self.now + delay, event)
    }

    /// Check whether the event is still pending.
    pub fn is_pending(&self, id: EventId) -> bool {
        matches!(self.events.get(id.key), Some((seq, _)) if *seq == id.seq)
    }

    /// Cancel a pending event and return its payload. Cancelling an event
    /// which already fired or was cancelled is a no-op.
    pub fn cancel(&mut self, id: EventId) -> Option<E> {
        if !self.is_pending(id) {
            return None;
        }
        _ = self.timers.remove(&id.key);
        self.events.try_remove(id.key).map(|(_, event)| event)
    }

    /// Return the amount of time remaining for the earliest pending event.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.timers
            .peek_min()
            .map(|(_, (expires_at, _))| expires_at.saturating_duration_since(self.now))
    }

    /// Pop the earliest pending event and advance the clock to its time.
    pub fn next_event(&mut self) -> Option<(Instant, E)> {
        let (key, (time, _)) = self.timers.pop_min()?;
        let (_, event) = self.events.try_remove(key)?;
        self.now = time;
        Some((time, event))
    }

    /// Drop all pending events.
    pub fn clear(&mut self) {
        self.timers.clear();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule() {
        let start = Instant::now();
        let mut s = Scheduler::new(start);
        assert!(s.is_empty());
        assert_eq!(s.time_remaining(), None);

        s.schedule_after(Duration::from_millis(200), "b");
        s.schedule_after(Duration::from_millis(100), "a");
        s.schedule_after(Duration::from_millis(300), "c");
        assert_eq!(s.len(), 3);
        assert_eq!(s.time_remaining(), Some(Duration::from_millis(100)));

        assert_eq!(
            s.next_event(),
            Some((start + Duration::from_millis(100), "a"))
        );
        assert_eq!(s.now(), start + Duration::from_millis(100));
        assert_eq!(s.time_remaining(), Some(Duration::from_millis(100)));

        assert_eq!(s.next_event().map(|(_, e)| e), Some("b"));
        assert_eq!(s.next_event().map(|(_, e)| e), Some("c"));
        assert_eq!(s.next_event(), None);
        assert_eq!(s.now(), start + Duration::from_millis(300));
    }

    #[test]
    fn same_time_fifo() {
        let start = Instant::now();
        let mut s = Scheduler::new(start);
        for i in 0..10 {
            s.schedule_after(Duration::from_millis(10), i);
        }
        for i in 0..10 {
            assert_eq!(s.next_event().map(|(_, e)| e), Some(i));
        }
    }

    #[test]
    fn past_is_now() {
        let start = Instant::now() + Duration::from_secs(1);
        let mut s = Scheduler::new(start);
        s.schedule_at(start - Duration::from_millis(500), ());
        assert_eq!(s.time_remaining(), Some(Duration::ZERO));
        assert_eq!(s.next_event(), Some((start, ())));
    }

    #[test]
    fn cancel() {
        let start = Instant::now();
        let mut s = Scheduler::new(start);

        let a = s.schedule_after(Duration::from_millis(100), "a");
        let b = s.schedule_after(Duration::from_millis(200), "b");
        assert!(s.is_pending(a));

        assert_eq!(s.cancel(a), Some("a"));
        assert!(!s.is_pending(a));
        assert_eq!(s.len(), 1);

        // Cancel twice.
        assert_eq!(s.cancel(a), None);

        // A stale handle must not cancel an event reusing the same slot.
        let c = s.schedule_after(Duration::from_millis(50), "c");
        assert_eq!(s.cancel(a), None);
        assert!(s.is_pending(c));

        assert_eq!(s.next_event().map(|(_, e)| e), Some("c"));
        assert_eq!(s.cancel(c), None);
        assert!(s.is_pending(b));

        s.clear();
        assert!(s.is_empty());
        assert!(!s.is_pending(b));
    }
}
