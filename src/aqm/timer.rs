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

/// A periodic timer owned by a queue discipline.
///
/// Once stopped the timer can not be armed again.
#[derive(Debug, Copy, Clone)]
pub(crate) struct TickTimer {
    /// Interval between two expirations.
    period: Duration,

    /// Next expiration time.
    expires: Option<Instant>,

    /// Whether the timer was stopped.
    cancelled: bool,
}

impl TickTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            expires: None,
            cancelled: false,
        }
    }

    /// Interval between two expirations.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Arm the timer to expire one period after `now`. The timer is disarmed
    /// if the expiration time is not representable.
    pub fn rearm(&mut self, now: Instant) {
        if self.cancelled {
            return;
        }
        self.expires = now.checked_add(self.period);
    }

    /// Move the expiration time forward by whole periods from the previous
    /// expiration, so that it is after `now`. Late expirations do not shift
    /// the cadence and missed periods are skipped.
    pub fn advance(&mut self, now: Instant) {
        if self.cancelled {
            return;
        }
        let expires = match self.expires {
            Some(expires) => expires,
            None => return self.rearm(now),
        };

        let late = now.saturating_duration_since(expires).as_nanos();
        let periods = late / self.period.as_nanos().max(1) + 1;
        self.expires = u32::try_from(periods)
            .ok()
            .and_then(|n| self.period.checked_mul(n))
            .and_then(|d| expires.checked_add(d));
    }

    /// Cancel the timer. Return true if this call cancelled it.
    pub fn stop(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        self.expires = None;
        true
    }

    /// Get the expiration time.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.expires
    }

    /// Check whether the timer is expired.
    pub fn is_expired(&self, after: Instant) -> bool {
        self.expires.map_or(false, |x| x <= after)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
