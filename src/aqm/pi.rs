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

//! PI: a Proportional-Integral controller for Active Queue Management.
//!
//! The drop probability is updated once per sampling period from the error
//! between the queue length and a reference queue length, and from the trend
//! of the queue length since the previous sample. Arriving packets are dropped
//! (or ECN marked) with that probability before they reach the queue.
//!
//! See "On Designing Improved Controllers for AQM Routers Supporting TCP
//! Flows", C.V. Hollot, V. Misra, D. Towsley and W. Gong, INFOCOM 2001.

use std::time::Instant;

use log::*;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use super::stpi::SelfTuningState;
use super::timer::TickTimer;
use super::EnqueueOutcome;
use super::PacketFilter;
use super::QueueDisc;
use super::QueueDiscStats;
use crate::packet::QueueDiscItem;
use crate::queue::DropTailQueue;
use crate::queue::PacketQueue;
use crate::queue::QueueSizeUnit;
use crate::Config;
use crate::Error;
use crate::Result;

/// State of the probability controller.
#[derive(Debug, Default, Clone)]
struct ControllerState {
    /// Drop probability of arriving packets.
    drop_prob: f64,

    /// Queue length at the previous sampling tick.
    q_old: u64,
}

/// Builder of a PI queue disc.
///
/// The builder validates the configuration and the attached components
/// before any packet is processed.
pub struct PiQueueDiscBuilder<T: QueueDiscItem> {
    /// Config.
    config: Config,

    /// Internal queues. A default one is created if none is provided.
    queues: Vec<Box<dyn PacketQueue<T>>>,

    /// Child queue discs. Not supported by PI.
    classes: Vec<Box<dyn QueueDisc<T>>>,

    /// Packet filters. Not supported by PI.
    filters: Vec<Box<dyn PacketFilter<T>>>,

    /// Seed of the random stream.
    seed: Option<u64>,
}

impl<T: QueueDiscItem + 'static> PiQueueDiscBuilder<T> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            queues: Vec::new(),
            classes: Vec::new(),
            filters: Vec::new(),
            seed: None,
        }
    }

    /// Attach an internal queue.
    pub fn internal_queue(mut self, queue: Box<dyn PacketQueue<T>>) -> Self {
        self.queues.push(queue);
        self
    }

    /// Attach a child queue disc.
    pub fn class(mut self, class: Box<dyn QueueDisc<T>>) -> Self {
        self.classes.push(class);
        self
    }

    /// Attach a packet filter.
    pub fn packet_filter(mut self, filter: Box<dyn PacketFilter<T>>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Use a fixed seed for the random stream.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check the attached components, creating the default internal queue if
    /// needed.
    pub fn check_config(&mut self) -> Result<()> {
        let limit = self.config.max_size;

        if !self.classes.is_empty() {
            error!("PI cannot have classes");
            return Err(Error::InvalidConfig("classes".into()));
        }

        if !self.filters.is_empty() {
            error!("PI cannot have packet filters");
            return Err(Error::InvalidConfig("packet filters".into()));
        }

        if self.queues.is_empty() {
            self.queues.push(Box::new(DropTailQueue::new(limit)));
        }

        if self.queues.len() != 1 {
            error!("PI needs 1 internal queue, got {}", self.queues.len());
            return Err(Error::InvalidConfig("internal queues".into()));
        }

        let queue_size = self.queues[0].max_size();
        if queue_size.unit != limit.unit {
            error!(
                "the unit of the internal queue {} does not match the queue limit {}",
                queue_size, limit
            );
            return Err(Error::InvalidConfig("internal queue unit".into()));
        }

        if queue_size.value < limit.value {
            error!(
                "the size of the internal queue {} is less than the queue limit {}",
                queue_size, limit
            );
            return Err(Error::InvalidConfig("internal queue size".into()));
        }

        Ok(())
    }

    /// Build the queue disc. The first sampling tick expires one period after
    /// `now`.
    pub fn build(mut self, now: Instant) -> Result<PiQueueDisc<T>> {
        self.config.validate()?;
        self.check_config()?;

        let queue = match self.queues.pop() {
            Some(queue) => queue,
            None => return Err(Error::InvalidState("no internal queue".into())),
        };
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let period = self.config.sampling_period();
        if now.checked_add(period).is_none() {
            error!("the sampling period {:?} is out of range", period);
            return Err(Error::InvalidConfig(format!(
                "sampling frequency {}",
                self.config.w
            )));
        }

        let mut qdisc = PiQueueDisc {
            timer: TickTimer::new(period),
            stpi: None,
            config: self.config,
            queue,
            state: ControllerState::default(),
            rng,
            stats: QueueDiscStats::default(),
        };
        qdisc.initialize_params(now);
        qdisc.timer.rearm(now);

        Ok(qdisc)
    }
}

/// PI queue disc.
pub struct PiQueueDisc<T: QueueDiscItem> {
    /// Config.
    config: Config,

    /// Internal queue.
    queue: Box<dyn PacketQueue<T>>,

    /// Probability controller.
    state: ControllerState,

    /// Self-Tuning PI state, only present in STPI mode.
    stpi: Option<SelfTuningState>,

    /// Timer of the drop probability calculation.
    timer: TickTimer,

    /// Random stream of the early drop test.
    rng: StdRng,

    /// Statistics.
    stats: QueueDiscStats,
}

impl<T: QueueDiscItem + 'static> PiQueueDisc<T> {
    /// Create a queue disc with the default internal queue.
    pub fn new(config: Config, now: Instant) -> Result<Self> {
        PiQueueDiscBuilder::new(config).build(now)
    }

    /// Return a builder to attach custom components.
    pub fn builder(config: Config) -> PiQueueDiscBuilder<T> {
        PiQueueDiscBuilder::new(config)
    }
}

impl<T: QueueDiscItem> PiQueueDisc<T> {
    fn initialize_params(&mut self, now: Instant) {
        self.state = ControllerState::default();
        self.stats = QueueDiscStats::default();
        self.stpi = if self.config.stpi {
            Some(SelfTuningState::new(&self.config, now))
        } else {
            None
        };
    }

    /// Current drop probability.
    pub fn drop_prob(&self) -> f64 {
        self.state.drop_prob
    }

    /// Queue length at the previous sampling tick.
    pub fn q_old(&self) -> u64 {
        self.state.q_old
    }

    /// Config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reseed the random stream used by the early drop test, and return the
    /// number of streams used by this queue disc.
    pub fn assign_streams(&mut self, stream: u64) -> i64 {
        self.rng = StdRng::seed_from_u64(stream);
        1
    }

    fn unit(&self) -> QueueSizeUnit {
        self.config.max_size.unit
    }

    /// Mean packet size, only used to normalize byte counts.
    fn byte_scale(&self) -> Option<u32> {
        match self.unit() {
            QueueSizeUnit::Bytes => Some(self.config.mean_pkt_size),
            QueueSizeUnit::Packets => None,
        }
    }

    /// Check if an item needs to be dropped due to probability drop.
    fn drop_early(&mut self, item: &T) -> bool {
        let mut p = self.state.drop_prob;
        if let Some(mps) = self.byte_scale() {
            p = p * item.size() as f64 / mps as f64;
        }
        p = p.min(1.0);

        let u: f64 = self.rng.gen();
        p > 0.0 && u <= p
    }

    /// Periodically update the drop probability based on the queue length
    /// samples: not only the current sample but also the trend where the
    /// queue length is going, up or down.
    fn calculate_p(&mut self, now: Instant) {
        let qlen = self.occupancy();
        let q_ref = self.config.q_ref;
        let scale = self.byte_scale();
        let drop_prob = self.state.drop_prob;

        let p = match self.stpi.as_mut() {
            None => {
                let (a, b) = (self.config.a, self.config.b);
                match scale {
                    Some(mps) => {
                        let mps = mps as f64;
                        a * (qlen as f64 / mps - q_ref)
                            - b * (self.state.q_old as f64 / mps - q_ref)
                            + drop_prob
                    }
                    None => {
                        a * (qlen as f64 - q_ref) - b * (self.state.q_old as f64 - q_ref)
                            + drop_prob
                    }
                }
            }
            Some(stpi) => {
                stpi.update_estimation(now, drop_prob, self.config.mean_pkt_size);
                let p = stpi.probability(qlen as f64, q_ref, scale);
                stpi.end_interval(now);
                p
            }
        };

        // NaN is mapped to zero.
        let p = p.max(0.0).min(1.0);

        trace!(
            "{}. qlen = {}, q_old = {}, drop_prob = {:.6} -> {:.6}",
            self.name(),
            qlen,
            self.state.q_old,
            drop_prob,
            p
        );

        self.state.drop_prob = p;
        self.state.q_old = qlen;
    }

    #[cfg(test)]
    fn self_tuning(&self) -> Option<&SelfTuningState> {
        self.stpi.as_ref()
    }
}

impl<T: QueueDiscItem> QueueDisc<T> for PiQueueDisc<T> {
    fn name(&self) -> &str {
        if self.stpi.is_some() {
            "STPI"
        } else {
            "PI"
        }
    }

    fn enqueue(&mut self, mut item: T, now: Instant) -> EnqueueOutcome {
        if let Some(stpi) = self.stpi.as_mut() {
            stpi.on_arrival(now);
        }

        let n_queued = self.occupancy();
        let projected = match self.unit() {
            QueueSizeUnit::Packets => n_queued + 1,
            QueueSizeUnit::Bytes => n_queued + item.size() as u64,
        };

        if projected > self.config.max_size.value as u64 {
            // Drops due to queue limit: reactive
            debug!(
                "{}. forced drop, size {}, queued {}",
                self.name(),
                item.size(),
                n_queued
            );
            self.stats.forced_drop = self.stats.forced_drop.saturating_add(1);
            return EnqueueOutcome::ForcedDrop;
        }

        let mut outcome = EnqueueOutcome::Accepted;
        if self.drop_early(&item) {
            // Early probability drop: proactive
            if self.config.use_ecn && item.mark() {
                self.stats.unforced_mark = self.stats.unforced_mark.saturating_add(1);
                outcome = EnqueueOutcome::UnforcedMark;
            } else {
                debug!(
                    "{}. unforced drop, drop_prob {:.6}, queued {}",
                    self.name(),
                    self.state.drop_prob,
                    n_queued
                );
                self.stats.unforced_drop = self.stats.unforced_drop.saturating_add(1);
                return EnqueueOutcome::UnforcedDrop;
            }
        }

        // If the internal queue rejects the item, the drop is accounted by
        // the internal queue itself.
        if self.queue.enqueue(item) {
            self.stats.packets_enqueued = self.stats.packets_enqueued.saturating_add(1);
        } else {
            debug!("{}. internal queue rejected the item", self.name());
        }

        outcome
    }

    fn dequeue(&mut self, now: Instant) -> Option<T> {
        match self.queue.dequeue() {
            Some(item) => {
                if let Some(stpi) = self.stpi.as_mut() {
                    stpi.on_departure(now);
                }
                self.stats.packets_dequeued = self.stats.packets_dequeued.saturating_add(1);
                Some(item)
            }
            None => {
                trace!("{}. queue empty", self.name());
                if let Some(stpi) = self.stpi.as_mut() {
                    stpi.on_empty(now);
                }
                None
            }
        }
    }

    fn peek(&self) -> Option<&T> {
        self.queue.peek()
    }

    fn occupancy(&self) -> u64 {
        self.queue.occupancy(self.unit())
    }

    fn stats(&self) -> &QueueDiscStats {
        &self.stats
    }

    fn timeout(&self) -> Option<Instant> {
        self.timer.next_timeout()
    }

    fn on_timeout(&mut self, now: Instant) {
        if !self.timer.is_expired(now) {
            return;
        }
        self.calculate_p(now);
        self.timer.advance(now);
    }

    fn close(&mut self) {
        if self.timer.stop() {
            debug!("{}. sampling timer cancelled", self.name());
        }
    }
}

impl<T: QueueDiscItem> Drop for PiQueueDisc<T> {
    fn drop(&mut self) {
        self.timer.stop();
    }
}
