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

//! PI-AQM is an implementation of the Proportional-Integral (PI) Active Queue
//! Management algorithm and its Self-Tuning variant (STPI).
//!
//! ## Features
//!
//! * **Classic PI**: the drop probability of arriving packets is updated at a
//!   fixed sampling frequency from the deviation of the queue length from a
//!   reference value and from the queue length trend.
//! * **Self-Tuning PI**: the PI gains are re-derived at runtime from an
//!   estimation of the link capacity and of the load.
//! * **ECN**: ECN capable packets may be marked instead of dropped.
//! * **Packet and byte modes**: the queue limit and the reference queue length
//!   may be measured in packets or in bytes.
//!
//! The queue disc does not own a clock. Every operation takes the current time
//! and the caller drives the sampling timer through `timeout()` and
//! `on_timeout()`, so the same code runs under wall-clock or simulated time.
//!
//! ## Get started
//!
//! ```
//! use std::time::Instant;
//! use pi_aqm::{Config, Ecn, Packet, PiQueueDisc, QueueDisc};
//!
//! let now = Instant::now();
//! let mut qdisc = PiQueueDisc::new(Config::new(), now)?;
//! let outcome = qdisc.enqueue(Packet::new(0, 1000, Ecn::NotEct), now);
//! assert!(!outcome.is_dropped());
//!
//! if let Some(timeout) = qdisc.timeout() {
//!     qdisc.on_timeout(timeout);
//! }
//! assert!(qdisc.dequeue(now).is_some());
//! # Ok::<(), pi_aqm::Error>(())
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DisplayFromStr;

/// Default mean packet size in bytes.
const DEFAULT_MEAN_PKT_SIZE: u32 = 500;

/// Default reference queue length.
const DEFAULT_QUEUE_REF: f64 = 50.0;

/// Default value of the PI parameter a.
const DEFAULT_A: f64 = 0.00001822;

/// Default value of the PI parameter b.
const DEFAULT_B: f64 = 0.00001816;

/// Default sampling frequency in Hz.
const DEFAULT_W: f64 = 170.0;

/// Default queue limit.
const DEFAULT_MAX_SIZE: QueueSize = QueueSize {
    unit: QueueSizeUnit::Packets,
    value: 500,
};

/// Default filter time constant to smoothen the capacity.
const DEFAULT_KC: f64 = 0.5;

/// Default filter time constant to smoothen N/(R*C).
const DEFAULT_KNRC: f64 = 0.5;

/// Default AQM responsiveness of Self-Tuning PI.
const DEFAULT_BPI: f64 = 0.5;

/// Upper bound of the AQM responsiveness.
const MAX_BPI: f64 = 0.85;

/// Default initial proportional gain of Self-Tuning PI.
const DEFAULT_KP: f64 = 0.00001816;

/// Default initial integral gain of Self-Tuning PI.
const DEFAULT_KI: f64 = 0.00001822;

/// A specialized [`Result`] type for PI-AQM operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations of the PI queue disc.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Average of packet size in bytes.
    pub(crate) mean_pkt_size: u32,

    /// Desired queue size, in the unit of the queue limit.
    pub(crate) q_ref: f64,

    /// Value of the PI parameter a.
    pub(crate) a: f64,

    /// Value of the PI parameter b.
    pub(crate) b: f64,

    /// Sampling frequency in Hz.
    pub(crate) w: f64,

    /// Maximum number of packets or bytes accepted by the queue disc.
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) max_size: QueueSize,

    /// Whether to mark ECN capable packets instead of dropping them.
    pub(crate) use_ecn: bool,

    /// Whether to use Self-Tuning PI.
    pub(crate) stpi: bool,

    /// Filter time constant to smoothen the capacity.
    pub(crate) kc: f64,

    /// Filter time constant to smoothen N/(R*C).
    pub(crate) knrc: f64,

    /// AQM responsiveness of Self-Tuning PI.
    pub(crate) bpi: f64,

    /// Round trip time in seconds. Self-Tuning PI assumes `STPI_RTT`.
    pub(crate) rtt: f64,

    /// Initial proportional gain of Self-Tuning PI.
    pub(crate) kp: f64,

    /// Initial integral gain of Self-Tuning PI.
    pub(crate) ki: f64,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut conf = pi_aqm::Config::new();
    /// conf.set_max_size("75000B".parse()?);
    /// conf.set_mean_pkt_size(1500);
    /// conf.enable_ecn(true);
    /// # Ok::<(), pi_aqm::error::Error>(())
    /// ```
    pub fn new() -> Self {
        Self {
            mean_pkt_size: DEFAULT_MEAN_PKT_SIZE,
            q_ref: DEFAULT_QUEUE_REF,
            a: DEFAULT_A,
            b: DEFAULT_B,
            w: DEFAULT_W,
            max_size: DEFAULT_MAX_SIZE,
            use_ecn: false,
            stpi: false,
            kc: DEFAULT_KC,
            knrc: DEFAULT_KNRC,
            bpi: DEFAULT_BPI,
            rtt: 0.0,
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
        }
    }

    /// Load a configuration from JSON. Missing fields take default values.
    ///
    /// ```
    /// let conf = pi_aqm::Config::from_json(r#"{"max_size": "100p", "stpi": true}"#)?;
    /// assert!(conf.stpi());
    /// # Ok::<(), pi_aqm::error::Error>(())
    /// ```
    pub fn from_json(s: &str) -> Result<Self> {
        let conf: Config = serde_json::from_str(s)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Load a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json(&s)
    }

    /// Set the mean packet size in bytes, used to normalize byte counts.
    pub fn set_mean_pkt_size(&mut self, v: u32) {
        self.mean_pkt_size = v;
    }

    /// Set the desired queue size, in the unit of the queue limit.
    pub fn set_queue_ref(&mut self, v: f64) {
        self.q_ref = v;
    }

    /// Set the PI parameter a.
    pub fn set_alpha(&mut self, v: f64) {
        self.a = v;
    }

    /// Set the PI parameter b.
    pub fn set_beta(&mut self, v: f64) {
        self.b = v;
    }

    /// Set the frequency of the drop probability calculation, in Hz.
    pub fn set_sampling_frequency(&mut self, v: f64) {
        self.w = v;
    }

    /// Set the queue limit. The unit of the limit is also the unit of the
    /// reference queue length.
    pub fn set_max_size(&mut self, v: QueueSize) {
        self.max_size = v;
    }

    /// Set whether to mark ECN capable packets instead of dropping them.
    pub fn enable_ecn(&mut self, v: bool) {
        self.use_ecn = v;
    }

    /// Set whether to use Self-Tuning PI.
    pub fn enable_stpi(&mut self, v: bool) {
        self.stpi = v;
    }

    /// Set the filter time constant to smoothen the capacity.
    pub fn set_kc(&mut self, v: f64) {
        self.kc = v;
    }

    /// Set the filter time constant to smoothen N/(R*C).
    pub fn set_knrc(&mut self, v: f64) {
        self.knrc = v;
    }

    /// Set the AQM responsiveness of Self-Tuning PI, in [0, 0.85].
    pub fn set_bpi(&mut self, v: f64) {
        self.bpi = v;
    }

    /// Set the round trip time in seconds.
    pub fn set_rtt(&mut self, v: f64) {
        self.rtt = v;
    }

    /// Set the initial proportional gain of Self-Tuning PI.
    pub fn set_kp(&mut self, v: f64) {
        self.kp = v;
    }

    /// Set the initial integral gain of Self-Tuning PI.
    pub fn set_ki(&mut self, v: f64) {
        self.ki = v;
    }

    pub fn max_size(&self) -> QueueSize {
        self.max_size
    }

    pub fn mean_pkt_size(&self) -> u32 {
        self.mean_pkt_size
    }

    pub fn use_ecn(&self) -> bool {
        self.use_ecn
    }

    pub fn stpi(&self) -> bool {
        self.stpi
    }

    /// Interval between two drop probability calculations.
    ///
    /// An invalid sampling frequency saturates to `Duration::MAX`, which is
    /// rejected by `validate`.
    pub fn sampling_period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.w).unwrap_or(Duration::MAX)
    }

    /// Check the parameters.
    pub fn validate(&self) -> Result<()> {
        // The sampling period must be a non-zero duration.
        let period = Duration::try_from_secs_f64(1.0 / self.w);
        if !self.w.is_finite() || self.w <= 0.0 || period.map_or(true, |d| d.is_zero()) {
            return Err(Error::InvalidConfig(format!(
                "sampling frequency {}",
                self.w
            )));
        }
        if self.mean_pkt_size == 0 {
            return Err(Error::InvalidConfig("mean packet size 0".into()));
        }
        if self.max_size.value == 0 {
            return Err(Error::InvalidConfig(format!(
                "queue limit {}",
                self.max_size
            )));
        }
        if !self.q_ref.is_finite() || self.q_ref < 0.0 {
            return Err(Error::InvalidConfig(format!("queue ref {}", self.q_ref)));
        }
        if !self.a.is_finite() || !self.b.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "a {} b {}",
                self.a, self.b
            )));
        }
        if !self.rtt.is_finite() || self.rtt < 0.0 {
            return Err(Error::InvalidConfig(format!("rtt {}", self.rtt)));
        }
        if !self.stpi {
            return Ok(());
        }

        if !(self.kc > 0.0 && self.kc <= 1.0) {
            return Err(Error::InvalidConfig(format!("kc {}", self.kc)));
        }
        if !(self.knrc > 0.0 && self.knrc <= 1.0) {
            return Err(Error::InvalidConfig(format!("knrc {}", self.knrc)));
        }
        if !(self.bpi >= 0.0 && self.bpi <= MAX_BPI) {
            return Err(Error::InvalidConfig(format!("bpi {}", self.bpi)));
        }
        if !self.kp.is_finite() || !self.ki.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "kp {} ki {}",
                self.kp, self.ki
            )));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .format_timestamp_millis()
            .is_test(true)
            .init();
    }

    #[test]
    fn config_default() {
        let conf = Config::new();
        assert_eq!(conf.mean_pkt_size, 500);
        assert_eq!(conf.q_ref, 50.0);
        assert_eq!(conf.a, 0.00001822);
        assert_eq!(conf.b, 0.00001816);
        assert_eq!(conf.w, 170.0);
        assert_eq!(conf.max_size(), QueueSize::packets(500));
        assert!(!conf.use_ecn());
        assert!(!conf.stpi());
        assert_eq!(conf.kc, 0.5);
        assert_eq!(conf.knrc, 0.5);
        assert_eq!(conf.bpi, 0.5);
        assert_eq!(conf.kp, 0.00001816);
        assert_eq!(conf.ki, 0.00001822);
        assert_eq!(conf, Config::default());
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn config_sampling_period() {
        let mut conf = Config::new();
        conf.set_sampling_frequency(100.0);
        assert_eq!(conf.sampling_period(), Duration::from_millis(10));
    }

    #[test]
    fn config_validate() {
        let mut conf = Config::new();
        conf.set_sampling_frequency(0.0);
        assert!(conf.validate().is_err());
        conf.set_sampling_frequency(f64::NAN);
        assert!(conf.validate().is_err());

        // The sampling period does not fit in a duration.
        conf.set_sampling_frequency(1e-20);
        assert_eq!(
            conf.validate(),
            Err(Error::InvalidConfig("sampling frequency 0.00000000000000000001".into()))
        );
        assert_eq!(conf.sampling_period(), Duration::MAX);

        // The sampling period is shorter than a nanosecond.
        conf.set_sampling_frequency(1e10);
        assert!(conf.validate().is_err());

        conf.set_sampling_frequency(1e-19);
        assert!(conf.validate().is_ok());
        assert!(conf.sampling_period().as_secs() > 9_000_000_000_000_000_000);

        let mut conf = Config::new();
        conf.set_mean_pkt_size(0);
        assert!(conf.validate().is_err());

        let mut conf = Config::new();
        conf.set_max_size(QueueSize::bytes(0));
        assert!(conf.validate().is_err());

        let mut conf = Config::new();
        conf.set_queue_ref(-1.0);
        assert!(conf.validate().is_err());

        let mut conf = Config::new();
        conf.set_alpha(f64::INFINITY);
        assert!(conf.validate().is_err());

        // STPI parameters are only checked in STPI mode.
        let mut conf = Config::new();
        conf.set_bpi(0.9);
        conf.set_kc(0.0);
        assert!(conf.validate().is_ok());
        conf.enable_stpi(true);
        assert_eq!(conf.validate(), Err(Error::InvalidConfig("kc 0".into())));
        conf.set_kc(1.0);
        assert_eq!(conf.validate(), Err(Error::InvalidConfig("bpi 0.9".into())));
        conf.set_bpi(0.85);
        assert!(conf.validate().is_ok());
        conf.set_bpi(0.0);
        assert!(conf.validate().is_ok());

        conf.set_knrc(1.5);
        assert!(conf.validate().is_err());
        conf.set_knrc(1.0);
        conf.set_ki(f64::NAN);
        assert!(conf.validate().is_err());
    }

    #[test]
    fn config_from_json() -> Result<()> {
        let conf = Config::from_json("{}")?;
        assert_eq!(conf, Config::new());

        let conf = Config::from_json(
            r#"{
                "mean_pkt_size": 1000,
                "q_ref": 30000,
                "max_size": "75000B",
                "use_ecn": true,
                "stpi": true,
                "bpi": 0.8
            }"#,
        )?;
        assert_eq!(conf.mean_pkt_size(), 1000);
        assert_eq!(conf.q_ref, 30000.0);
        assert_eq!(conf.max_size(), QueueSize::bytes(75000));
        assert!(conf.use_ecn());
        assert!(conf.stpi());
        assert_eq!(conf.bpi, 0.8);
        assert_eq!(conf.a, DEFAULT_A);

        // Round trip through the textual queue size.
        let json = serde_json::to_string(&conf).map_err(Error::from)?;
        assert!(json.contains(r#""max_size":"75000B""#));
        assert_eq!(Config::from_json(&json)?, conf);

        // Malformed or invalid configurations.
        assert!(Config::from_json(r#"{"max_size": "75000"}"#).is_err());
        assert!(Config::from_json(r#"{"stpi": true, "bpi": 1.0}"#).is_err());
        assert!(Config::from_json("[").is_err());

        Ok(())
    }

    #[test]
    fn config_from_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("pi_aqm_conf_{}.json", std::process::id()));
        fs::write(&path, r#"{"max_size": "1500B", "w": 100}"#)?;
        let conf = Config::from_file(&path);
        fs::remove_file(&path)?;

        let conf = conf?;
        assert_eq!(conf.max_size(), QueueSize::bytes(1500));
        assert_eq!(conf.sampling_period(), Duration::from_millis(10));

        match Config::from_file(&path) {
            Err(Error::IoError(_)) => (),
            r => panic!("unexpected result {:?}", r),
        }
        Ok(())
    }
}

pub use crate::aqm::EnqueueOutcome;
pub use crate::aqm::PacketFilter;
pub use crate::aqm::PiQueueDisc;
pub use crate::aqm::PiQueueDiscBuilder;
pub use crate::aqm::QueueDisc;
pub use crate::aqm::QueueDiscStats;
pub use crate::aqm::STPI_RTT;
pub use crate::error::Error;
pub use crate::packet::Ecn;
pub use crate::packet::Packet;
pub use crate::packet::QueueDiscItem;
pub use crate::queue::DropTailQueue;
pub use crate::queue::PacketQueue;
pub use crate::queue::QueueSize;
pub use crate::queue::QueueSizeUnit;
pub use crate::scheduler::EventId;
pub use crate::scheduler::Scheduler;

#[path = "aqm/aqm.rs"]
pub mod aqm;

pub mod error;
pub mod packet;
pub mod queue;
pub mod scheduler;
