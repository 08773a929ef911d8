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

//! A discrete-event simulation of a single bottleneck link guarded by a PI
//! queue disc.

use std::fs::File;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::trace;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use statrs::distribution::Exp;

use pi_aqm::Config;
use pi_aqm::Ecn;
use pi_aqm::EventId;
use pi_aqm::Packet;
use pi_aqm::PiQueueDisc;
use pi_aqm::QueueDisc;
use pi_aqm::QueueDiscStats;
use pi_aqm::Scheduler;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Return the log target. Logs are written to `stderr` if no file is given.
pub fn log_target(log_file: &Option<String>) -> Result<env_logger::Target> {
    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            Ok(env_logger::Target::Pipe(Box::new(file)))
        }
        None => Ok(env_logger::Target::Stderr),
    }
}

/// Traffic and link parameters of a simulation.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Simulated duration.
    pub duration: Duration,

    /// Mean arrival rate in packets per second. Arrivals are Poisson.
    pub arrival_rate: f64,

    /// Bottleneck link rate in bits per second.
    pub link_rate: f64,

    /// Size of every packet in bytes.
    pub packet_size: u32,

    /// Fraction of ECN capable packets, in [0, 1].
    pub ecn_fraction: f64,

    /// Seed of the traffic generator and of the queue disc.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            arrival_rate: 2500.0,
            link_rate: 8_000_000.0,
            packet_size: 500,
            ecn_fraction: 0.0,
            seed: 1,
        }
    }
}

/// Simulation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimEvent {
    /// A packet arrives at the queue disc.
    Arrival,

    /// The link finished transmitting the head of the queue.
    Departure,

    /// The sampling timer of the queue disc expires.
    Tick,
}

/// Result of a simulation.
#[derive(Debug, Default, Clone)]
pub struct SimReport {
    /// Queue disc stats.
    pub stats: QueueDiscStats,

    /// Packets offered to the queue disc.
    pub arrivals: u64,

    /// Packets sent on the link.
    pub delivered: u64,

    /// Delivered packets carrying Congestion Experienced.
    pub marked: u64,

    /// Drop probability sampled after every tick.
    pub drop_prob_samples: Vec<f64>,

    /// Queue occupancy sampled after every tick.
    pub occupancy_samples: Vec<f64>,

    /// Queueing delay of delivered packets, in milliseconds.
    pub delay_samples: Vec<f64>,
}

impl SimReport {
    /// Dump the report as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "stats": serde_json::to_value(&self.stats)?,
            "arrivals": self.arrivals,
            "delivered": self.delivered,
            "marked": self.marked,
            "drop_prob": self.drop_prob_samples,
            "occupancy": self.occupancy_samples,
        }))
    }
}

/// A Poisson source feeding a fixed rate link through a PI queue disc.
pub struct Simulation {
    conf: SimConfig,

    /// Event queue and simulated clock.
    scheduler: Scheduler<SimEvent>,

    /// The queue disc under test.
    qdisc: PiQueueDisc<Packet>,

    /// Inter-arrival time distribution, in seconds.
    inter_arrival: Exp,

    /// Random stream of the traffic generator.
    rng: StdRng,

    /// Pending tick of the queue disc.
    tick: Option<EventId>,

    /// Whether the link is transmitting.
    link_busy: bool,

    /// Identifier of the next packet.
    next_id: u64,

    report: SimReport,
}

impl Simulation {
    pub fn new(conf: SimConfig, qdisc_conf: Config) -> Result<Self> {
        if !(0.0..=1.0).contains(&conf.ecn_fraction) {
            return Err(format!("invalid ecn fraction {}", conf.ecn_fraction).into());
        }
        if !(conf.link_rate > 0.0) || conf.packet_size == 0 {
            return Err("invalid link rate or packet size".into());
        }

        let start = Instant::now();
        let qdisc = PiQueueDisc::builder(qdisc_conf)
            .seed(conf.seed)
            .build(start)?;

        Ok(Self {
            inter_arrival: Exp::new(conf.arrival_rate)?,
            rng: StdRng::seed_from_u64(conf.seed),
            scheduler: Scheduler::new(start),
            qdisc,
            tick: None,
            link_busy: false,
            next_id: 0,
            report: SimReport::default(),
            conf,
        })
    }

    /// Run the simulation to completion.
    pub fn run(mut self) -> SimReport {
        let start = self.scheduler.now();
        let end = start + self.conf.duration;

        self.schedule_arrival();
        self.schedule_tick();

        while let Some((now, event)) = self.scheduler.next_event() {
            if now > end {
                break;
            }
            match event {
                SimEvent::Arrival => self.on_arrival(now),
                SimEvent::Departure => self.on_departure(now),
                SimEvent::Tick => self.on_tick(now),
            }
        }

        if let Some(id) = self.tick.take() {
            self.scheduler.cancel(id);
        }
        self.qdisc.close();
        self.scheduler.clear();

        self.report.stats = self.qdisc.stats().clone();
        debug!(
            "simulation finished, {} arrivals, {} delivered",
            self.report.arrivals, self.report.delivered
        );
        self.report
    }

    fn transmission_time(&self, size: u32) -> Duration {
        Duration::from_secs_f64(size as f64 * 8.0 / self.conf.link_rate)
    }

    fn schedule_arrival(&mut self) {
        let delay = self.inter_arrival.sample(&mut self.rng);
        self.scheduler
            .schedule_after(Duration::from_secs_f64(delay), SimEvent::Arrival);
    }

    fn schedule_tick(&mut self) {
        self.tick = self
            .qdisc
            .timeout()
            .map(|t| self.scheduler.schedule_at(t, SimEvent::Tick));
    }

    fn on_arrival(&mut self, now: Instant) {
        let ecn = if self.rng.gen_bool(self.conf.ecn_fraction) {
            Ecn::Ect0
        } else {
            Ecn::NotEct
        };
        let mut pkt = Packet::new(self.next_id, self.conf.packet_size, ecn);
        pkt.arrival_time = Some(now);
        self.next_id += 1;
        self.report.arrivals += 1;

        let outcome = self.qdisc.enqueue(pkt, now);
        trace!("packet {} {}", self.next_id - 1, outcome);

        if !outcome.is_dropped() && !self.link_busy {
            self.start_transmission();
        }
        self.schedule_arrival();
    }

    fn start_transmission(&mut self) {
        let size = match self.qdisc.peek() {
            Some(pkt) => pkt.size,
            None => return,
        };
        self.link_busy = true;
        let delay = self.transmission_time(size);
        self.scheduler.schedule_after(delay, SimEvent::Departure);
    }

    fn on_departure(&mut self, now: Instant) {
        if let Some(pkt) = self.qdisc.dequeue(now) {
            self.report.delivered += 1;
            if pkt.is_marked() {
                self.report.marked += 1;
            }
            if let Some(arrival) = pkt.arrival_time {
                let delay = now.saturating_duration_since(arrival);
                self.report.delay_samples.push(delay.as_secs_f64() * 1000.0);
            }
        }

        self.link_busy = false;
        if self.qdisc.peek().is_some() {
            self.start_transmission();
        } else {
            // Let the queue disc observe the empty queue.
            self.qdisc.dequeue(now);
        }
    }

    fn on_tick(&mut self, now: Instant) {
        self.qdisc.on_timeout(now);
        self.report.drop_prob_samples.push(self.qdisc.drop_prob());
        self.report
            .occupancy_samples
            .push(self.qdisc.occupancy() as f64);
        self.schedule_tick();
    }
}
