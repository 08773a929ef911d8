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

use std::fs;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use log::info;
use log::warn;
use statrs::statistics::Data;
use statrs::statistics::Distribution;
use statrs::statistics::Max;
use statrs::statistics::Min;
use statrs::statistics::OrderStatistics;

use pi_aqm::Config;
use pi_aqm::QueueSize;
use pi_aqm_tools::Result;
use pi_aqm_tools::SimConfig;
use pi_aqm_tools::SimReport;
use pi_aqm_tools::Simulation;

#[derive(Parser, Debug, Clone)]
#[clap(name = "pi_sim")]
pub struct SimOpt {
    /// Simulated duration in seconds.
    #[clap(short, long, default_value = "10", value_name = "TIME")]
    pub duration: f64,

    /// Mean packet arrival rate in packets per second.
    #[clap(short, long, default_value = "2500", value_name = "NUM")]
    pub arrival_rate: f64,

    /// Bottleneck link rate in bits per second.
    #[clap(short, long, default_value = "8000000", value_name = "NUM")]
    pub link_rate: f64,

    /// Packet size in bytes.
    #[clap(long, default_value = "500", value_name = "NUM")]
    pub packet_size: u32,

    /// Fraction of ECN capable packets.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub ecn_fraction: f64,

    /// Seed of the random streams.
    #[clap(long, default_value = "1", value_name = "NUM")]
    pub seed: u64,

    /// Queue disc configuration file in JSON. Options below override it.
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<String>,

    /// Queue limit, e.g. "500p" for packets or "75000B" for bytes.
    #[clap(long, value_name = "SIZE")]
    pub max_size: Option<QueueSize>,

    /// Mean packet size in bytes.
    #[clap(long, value_name = "NUM")]
    pub mean_pkt_size: Option<u32>,

    /// Desired queue size, in the unit of the queue limit.
    #[clap(long, value_name = "NUM")]
    pub queue_ref: Option<f64>,

    /// Value of the PI parameter a.
    #[clap(long, value_name = "NUM")]
    pub alpha: Option<f64>,

    /// Value of the PI parameter b.
    #[clap(long, value_name = "NUM")]
    pub beta: Option<f64>,

    /// Sampling frequency in Hz.
    #[clap(long, value_name = "NUM")]
    pub sampling_frequency: Option<f64>,

    /// Mark ECN capable packets instead of dropping them.
    #[clap(long)]
    pub use_ecn: bool,

    /// Use Self-Tuning PI.
    #[clap(long)]
    pub stpi: bool,

    /// Responsiveness of Self-Tuning PI, in [0, 0.85].
    #[clap(long, value_name = "NUM")]
    pub bpi: Option<f64>,

    /// Dump the results in JSON to the given file.
    #[clap(long, value_name = "FILE")]
    pub dump_file: Option<String>,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

impl SimOpt {
    fn sim_config(&self) -> SimConfig {
        SimConfig {
            duration: Duration::from_secs_f64(self.duration),
            arrival_rate: self.arrival_rate,
            link_rate: self.link_rate,
            packet_size: self.packet_size,
            ecn_fraction: self.ecn_fraction,
            seed: self.seed,
        }
    }

    fn qdisc_config(&self) -> Result<Config> {
        let mut conf = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::new(),
        };

        if let Some(v) = self.max_size {
            conf.set_max_size(v);
        }
        if let Some(v) = self.mean_pkt_size {
            conf.set_mean_pkt_size(v);
        }
        if let Some(v) = self.queue_ref {
            conf.set_queue_ref(v);
        }
        if let Some(v) = self.alpha {
            conf.set_alpha(v);
        }
        if let Some(v) = self.beta {
            conf.set_beta(v);
        }
        if let Some(v) = self.sampling_frequency {
            conf.set_sampling_frequency(v);
        }
        if let Some(v) = self.bpi {
            conf.set_bpi(v);
        }
        if self.use_ecn {
            conf.enable_ecn(true);
        }
        if self.stpi {
            conf.enable_stpi(true);
        }

        Ok(conf)
    }
}

fn print_samples(name: &str, samples: &[f64]) {
    if samples.is_empty() {
        println!("{}: no samples", name);
        return;
    }

    let mut s = Data::new(samples.to_vec());
    println!("{}:", name);
    println!(
        "\tmin: {:.6}, max: {:.6}, mean: {:.6}, sd: {:.6}",
        s.min(),
        s.max(),
        s.mean().unwrap_or(0.0),
        s.std_dev().unwrap_or(0.0),
    );
    println!(
        "\tmedian: {:.6}, p80: {:.6}, p90: {:.6}, p99: {:.6}",
        s.median(),
        s.percentile(80),
        s.percentile(90),
        s.percentile(99),
    );
}

fn print_report(option: &SimOpt, report: &SimReport) {
    println!();
    println!(
        "simulated {:.2}s, arrivals {}, delivered {}, marked {}",
        option.duration, report.arrivals, report.delivered, report.marked
    );
    println!(
        "drops: forced {}, unforced {}, marks: unforced {}",
        report.stats.forced_drop, report.stats.unforced_drop, report.stats.unforced_mark
    );
    println!(
        "queue: enqueued {}, dequeued {}",
        report.stats.packets_enqueued, report.stats.packets_dequeued
    );
    print_samples("drop probability", &report.drop_prob_samples);
    print_samples("queue occupancy", &report.occupancy_samples);
    print_samples("queueing delay(ms)", &report.delay_samples);
    println!();
}

fn parse_option() -> std::result::Result<SimOpt, clap::error::Error> {
    let option = SimOpt::parse();

    if !(option.duration > 0.0) || !option.duration.is_finite() {
        return Err(SimOpt::command().error(
            ErrorKind::InvalidValue,
            "Specify a positive simulation duration",
        ));
    }

    if !(option.arrival_rate > 0.0) {
        return Err(SimOpt::command().error(
            ErrorKind::InvalidValue,
            "Specify a positive arrival rate",
        ));
    }

    Ok(option)
}

fn process_option(option: &SimOpt) -> Result<()> {
    env_logger::builder()
        .target(pi_aqm_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    Ok(())
}

fn main() -> Result<()> {
    // Parse simulation option.
    let option = match parse_option() {
        Ok(option) => option,
        Err(e) => e.exit(),
    };

    // Process simulation option.
    process_option(&option)?;

    let qdisc_conf = option.qdisc_config()?;
    info!("queue disc config {:?}", qdisc_conf);

    // Run simulation.
    let report = Simulation::new(option.sim_config(), qdisc_conf)?.run();
    print_report(&option, &report);

    if let Some(path) = &option.dump_file {
        if let Err(e) = fs::write(path, report.to_json()?.to_string()) {
            warn!("write dump file {} error: {:?}", path, e);
            return Err(Box::new(e));
        }
    }

    Ok(())
}
