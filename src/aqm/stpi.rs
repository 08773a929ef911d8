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

//! Self-Tuning PI.
//!
//! The classic PI controller is designed for a fixed link capacity, number of
//! flows and round trip time. Self-Tuning PI estimates the capacity of the
//! outgoing link from the packets sent while the link was busy, and the
//! quantity N/(R*C) from the drop probability, and re-derives the PI gains
//! from both estimations on every sampling tick.

use std::time::Instant;

use log::*;

use super::idle::IdleTracker;
use crate::Config;

/// The round trip time assumed by Self-Tuning PI, in seconds.
pub const STPI_RTT: f64 = 0.0015;

/// Self-Tuning PI state.
#[derive(Debug, Clone)]
pub(crate) struct SelfTuningState {
    /// Filter time constant to smoothen the capacity.
    kc: f64,

    /// Filter time constant to smoothen N/(R*C).
    knrc: f64,

    /// Controls the AQM responsiveness.
    bpi: f64,

    /// Link capacity measured in the last interval, in bits per second.
    capacity: f64,

    /// Smoothed estimate of the capacity.
    thc: f64,

    /// Smoothed estimate of the capacity at the previous tick.
    old_thc: f64,

    /// Smoothed estimate of N/(R*C).
    thnrc: f64,

    /// Smoothed estimate of N/(R*C) at the previous tick.
    old_thnrc: f64,

    /// Estimated round trip time in seconds.
    rtt: f64,

    /// Proportional gain.
    kp: f64,

    /// Integral gain.
    ki: f64,

    /// Time the link was busy during the last interval, in seconds.
    router_busy_time: f64,

    /// Start of the current sampling interval.
    interval_start: Instant,

    /// Idle and departure accounting of the current interval.
    tracker: IdleTracker,
}

impl SelfTuningState {
    pub fn new(conf: &Config, now: Instant) -> Self {
        Self {
            kc: conf.kc,
            knrc: conf.knrc,
            bpi: conf.bpi,
            capacity: 0.0,
            thc: 0.0,
            old_thc: 0.0,
            thnrc: 0.0,
            old_thnrc: 0.0,
            rtt: STPI_RTT,
            kp: conf.kp,
            ki: conf.ki,
            router_busy_time: 0.0,
            interval_start: now,
            tracker: IdleTracker::new(now),
        }
    }

    pub fn tracker(&self) -> &IdleTracker {
        &self.tracker
    }

    pub fn on_arrival(&mut self, now: Instant) {
        self.tracker.on_arrival(now);
    }

    pub fn on_departure(&mut self, now: Instant) {
        self.tracker.on_departure(now);
    }

    pub fn on_empty(&mut self, now: Instant) {
        self.tracker.on_empty(now);
    }

    /// Update the capacity estimation and the PI gains at the end of a
    /// sampling interval. The interval is measured from the previous tick, so
    /// a late tick does not inflate the capacity.
    pub fn update_estimation(&mut self, now: Instant, drop_prob: f64, mean_pkt_size: u32) {
        self.tracker.close_idle_interval(now);

        let interval = now.saturating_duration_since(self.interval_start);
        self.router_busy_time =
            interval.as_secs_f64() - self.tracker.total_idle_time().as_secs_f64();
        if self.router_busy_time <= 0.0 {
            // The link was idle during the whole interval.
            return;
        }

        self.capacity = self.tracker.departed_pkts() as f64 * mean_pkt_size as f64 * 8.0
            / self.router_busy_time;
        self.thc = self.old_thc * (1.0 - self.kc) + self.kc * self.capacity;

        if drop_prob > 0.0 {
            self.thnrc = self.old_thnrc * (1.0 - self.knrc) + self.knrc * (drop_prob / 2.0).sqrt();

            // Without any capacity sample the gains would not be finite.
            if self.rtt * self.thc > 0.0 {
                self.kp = 2.0 * self.bpi * (self.bpi * self.bpi + 1.0).sqrt() * self.thnrc
                    / (self.rtt * self.thc);
                self.ki = (2.0 * self.thnrc / self.rtt) * self.kp;
            }
        }

        trace!(
            "STPI. busy = {:.6}s, departed = {}, capacity = {:.0}bps, thc = {:.0}bps, thnrc = {:.6}, kp = {:e}, ki = {:e}",
            self.router_busy_time,
            self.tracker.departed_pkts(),
            self.capacity,
            self.thc,
            self.thnrc,
            self.kp,
            self.ki,
        );
    }

    /// Drop probability, before bounding, for the current queue length.
    pub fn probability(&self, qlen: f64, q_ref: f64, mean_pkt_size: Option<u32>) -> f64 {
        match mean_pkt_size {
            Some(mps) => {
                let qlen = qlen / mps as f64;
                self.ki * qlen - q_ref + self.kp * qlen
            }
            None => self.ki * (qlen - q_ref) + self.kp * qlen,
        }
    }

    /// Start a new sampling interval.
    pub fn end_interval(&mut self, now: Instant) {
        self.interval_start = now;
        self.tracker.reset(now);
        self.old_thc = self.thc;
        self.old_thnrc = self.thnrc;
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn thc(&self) -> f64 {
        self.thc
    }

    pub fn thnrc(&self) -> f64 {
        self.thnrc
    }

    pub fn kp(&self) -> f64 {
        self.kp
    }

    pub fn ki(&self) -> f64 {
        self.ki
    }

    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    pub fn router_busy_time(&self) -> f64 {
        self.router_busy_time
    }
}
