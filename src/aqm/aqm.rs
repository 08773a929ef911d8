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

#![allow(unused_variables)]

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumIter;

use crate::packet::QueueDiscItem;
pub use pi::PiQueueDisc;
pub use pi::PiQueueDiscBuilder;
pub use stpi::STPI_RTT;

/// The admission decision taken for an arriving item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, Display)]
pub enum EnqueueOutcome {
    /// The item was handed to the internal queue.
    #[strum(serialize = "Accepted")]
    Accepted,

    /// The item was dropped because the queue limit would be exceeded. Forced
    /// drops are reactive and do not depend on the drop probability.
    #[strum(serialize = "Forced drop")]
    ForcedDrop,

    /// The item was dropped by the early probability test.
    #[strum(serialize = "Unforced drop")]
    UnforcedDrop,

    /// The item was selected by the early probability test, but marked with
    /// Congestion Experienced instead of being dropped. It was handed to the
    /// internal queue.
    #[strum(serialize = "Unforced mark")]
    UnforcedMark,
}

impl EnqueueOutcome {
    /// Whether the item was discarded.
    pub fn is_dropped(&self) -> bool {
        matches!(self, EnqueueOutcome::ForcedDrop | EnqueueOutcome::UnforcedDrop)
    }
}

/// Queue discipline statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDiscStats {
    /// Drops due to queue limit: reactive.
    pub forced_drop: u64,

    /// Early probability drops: proactive.
    pub unforced_drop: u64,

    /// Early probability marks: proactive.
    pub unforced_mark: u64,

    /// Items handed to the internal queue.
    pub packets_enqueued: u64,

    /// Items removed from the internal queue.
    pub packets_dequeued: u64,
}

/// Queue discipline interfaces shared by different algorithms.
///
/// All callbacks run to completion and never overlap: `enqueue` is driven by
/// packet arrivals, `dequeue` by packet departures and `on_timeout` by the
/// expiration of the timer reported by `timeout`.
pub trait QueueDisc<T: QueueDiscItem> {
    /// Name of the queue discipline.
    fn name(&self) -> &str;

    /// Decide whether the arriving item is queued, dropped or marked.
    fn enqueue(&mut self, item: T, now: Instant) -> EnqueueOutcome;

    /// Remove the item at the head.
    fn dequeue(&mut self, now: Instant) -> Option<T>;

    /// Return a reference to the item at the head.
    fn peek(&self) -> Option<&T>;

    /// Current occupancy, in the unit of the queue limit.
    fn occupancy(&self) -> u64;

    /// Queue discipline stats.
    fn stats(&self) -> &QueueDiscStats;

    /// The next time `on_timeout` should be called, if any.
    fn timeout(&self) -> Option<Instant> {
        None
    }

    /// Process an expired timer.
    fn on_timeout(&mut self, now: Instant) {}

    /// Release the queue discipline. Pending timers are cancelled and never
    /// fire again.
    fn close(&mut self) {}
}

impl<T: QueueDiscItem> fmt::Debug for dyn QueueDisc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue disc {}.", self.name())
    }
}

/// A classifier which maps items to the classes of a queue discipline.
pub trait PacketFilter<T: QueueDiscItem> {
    /// Return the class index of the item, or None if it can not be classified.
    fn classify(&self, item: &T) -> Option<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn enqueue_outcome() {
        for outcome in EnqueueOutcome::iter() {
            match outcome {
                EnqueueOutcome::ForcedDrop | EnqueueOutcome::UnforcedDrop => {
                    assert!(outcome.is_dropped())
                }
                _ => assert!(!outcome.is_dropped()),
            }
        }
        assert_eq!(format!("{}", EnqueueOutcome::ForcedDrop), "Forced drop");
        assert_eq!(format!("{}", EnqueueOutcome::UnforcedMark), "Unforced mark");
    }
}

mod idle;
mod pi;
mod stpi;
mod timer;
