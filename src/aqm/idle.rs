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

use std::time::Duration;
use std::time::Instant;

/// Tracks the idle periods of the outgoing link and the packets it sent during
/// one sampling interval.
///
/// The link turns idle when a dequeue attempt finds the queue empty, and busy
/// again when an item arrives or is dequeued.
#[derive(Debug, Clone)]
pub(crate) struct IdleTracker {
    /// Whether the link is idle.
    idle: bool,

    /// Start of the current idle interval.
    idle_start_time: Instant,

    /// Idle time accumulated since the last sampling tick.
    total_idle_time: Duration,

    /// Number of departed packets since the last sampling tick.
    departed_pkts: u64,
}

impl IdleTracker {
    /// Create a tracker. The link is initially idle.
    pub fn new(now: Instant) -> Self {
        Self {
            idle: true,
            idle_start_time: now,
            total_idle_time: Duration::ZERO,
            departed_pkts: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn total_idle_time(&self) -> Duration {
        self.total_idle_time
    }

    pub fn departed_pkts(&self) -> u64 {
        self.departed_pkts
    }

    /// Account the idle time elapsed until `now`. The link stays idle and a
    /// new idle interval starts at `now`.
    pub fn close_idle_interval(&mut self, now: Instant) {
        if !self.idle {
            return;
        }
        self.total_idle_time += now.saturating_duration_since(self.idle_start_time);
        self.idle_start_time = now;
    }

    /// An item arrived: the link is busy.
    pub fn on_arrival(&mut self, now: Instant) {
        if self.idle {
            self.close_idle_interval(now);
            self.idle = false;
        }
    }

    /// A dequeue attempt found the queue empty.
    pub fn on_empty(&mut self, now: Instant) {
        if !self.idle {
            self.idle = true;
            self.idle_start_time = now;
        }
    }

    /// An item was dequeued.
    pub fn on_departure(&mut self, now: Instant) {
        if self.idle {
            self.close_idle_interval(now);
            self.idle = false;
        }
        self.departed_pkts = self.departed_pkts.saturating_add(1);
    }

    /// Start a new sampling interval.
    pub fn reset(&mut self, now: Instant) {
        self.departed_pkts = 0;
        self.total_idle_time = Duration::ZERO;
        if self.idle {
            self.idle_start_time = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_tracker_init() {
        let now = Instant::now();
        let t = IdleTracker::new(now);
        assert!(t.is_idle());
        assert_eq!(t.total_idle_time(), Duration::ZERO);
        assert_eq!(t.departed_pkts(), 0);
    }

    #[test]
    fn idle_tracker_transitions() {
        let now = Instant::now();
        let mut t = IdleTracker::new(now);

        // Idle -> Busy on arrival.
        let now = now + Duration::from_millis(3);
        t.on_arrival(now);
        assert!(!t.is_idle());
        assert_eq!(t.total_idle_time(), Duration::from_millis(3));

        // Busy departures do not add idle time.
        let now = now + Duration::from_millis(1);
        t.on_departure(now);
        t.on_departure(now);
        assert_eq!(t.departed_pkts(), 2);
        assert_eq!(t.total_idle_time(), Duration::from_millis(3));

        // Busy -> Idle on an empty dequeue attempt.
        t.on_empty(now);
        assert!(t.is_idle());

        // A second empty attempt keeps the original idle start.
        t.on_empty(now + Duration::from_millis(1));

        // Idle -> Busy on departure.
        let now = now + Duration::from_millis(2);
        t.on_departure(now);
        assert!(!t.is_idle());
        assert_eq!(t.departed_pkts(), 3);
        assert_eq!(t.total_idle_time(), Duration::from_millis(5));
    }

    #[test]
    fn idle_tracker_interval() {
        let start = Instant::now();
        let mut t = IdleTracker::new(start);

        // Idle through the whole interval.
        let now = start + Duration::from_millis(6);
        t.close_idle_interval(now);
        assert!(t.is_idle());
        assert_eq!(t.total_idle_time(), Duration::from_millis(6));

        t.reset(now);
        assert_eq!(t.total_idle_time(), Duration::ZERO);
        assert_eq!(t.departed_pkts(), 0);

        // The next interval only accounts the idle time after the reset.
        let now = now + Duration::from_millis(2);
        t.on_arrival(now);
        assert_eq!(t.total_idle_time(), Duration::from_millis(2));

        // A busy link has nothing to close.
        t.close_idle_interval(now + Duration::from_millis(4));
        assert_eq!(t.total_idle_time(), Duration::from_millis(2));
    }
}
