//! CLI for the scheduling simulator
//!
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::settings;
use crate::simulation::SimulationConfig;

#[derive(Clone, Debug, clap::Parser)]
#[command(name = "gossamer", version, about = "Per-peer gossip send scheduling simulator")]
pub struct Cli {
    // Optional JSON settings file; flags below override it
    #[clap(
        long,
        env("GOSSAMER_SETTINGS_FILE"),
        help = "JSON file with estimator, delay and rate limit settings"
    )]
    pub settings_file: Option<PathBuf>,

    #[clap(
        long,
        default_value = "4",
        env("GOSSAMER_PEERS"),
        help = "Number of simulated peers"
    )]
    pub peers: usize,

    #[clap(
        long,
        default_value = "50",
        env("GOSSAMER_MESSAGES"),
        help = "Messages fanned out to every peer"
    )]
    pub messages: usize,

    #[clap(
        long,
        default_value = "10",
        env("GOSSAMER_SYSTEM_EVERY"),
        help = "Every n-th message is a system message (0 disables)"
    )]
    pub system_every: usize,

    #[clap(
        long,
        default_value = "512",
        env("GOSSAMER_PAYLOAD_BYTES"),
        help = "Payload size of each message in bytes"
    )]
    pub payload_bytes: usize,

    #[clap(
        long,
        default_value = "0.1",
        env("GOSSAMER_LOSS_PROBABILITY"),
        help = "Probability that a send is lost"
    )]
    pub loss_probability: f64,

    #[clap(
        long,
        default_value = "0.2",
        env("GOSSAMER_MEAN_RTT"),
        help = "Mean simulated round-trip time in seconds"
    )]
    pub mean_rtt: f64,

    #[clap(
        long,
        default_value = "50",
        env("GOSSAMER_TICK_MS"),
        help = "Simulated milliseconds per scheduling tick"
    )]
    pub tick_ms: u64,

    #[clap(
        long,
        default_value = "10000",
        env("GOSSAMER_MAX_TICKS"),
        help = "Stop after this many ticks"
    )]
    pub max_ticks: u64,

    #[clap(
        long,
        env("GOSSAMER_REALTIME"),
        help = "Pace ticks on the wall clock instead of running flat out"
    )]
    pub realtime: bool,

    #[clap(
        long,
        default_value = "0",
        env("GOSSAMER_STATS_EVERY"),
        help = "Log peer statistics every n ticks (0 disables)"
    )]
    pub stats_every: u64,

    #[clap(
        long,
        env("GOSSAMER_EXPONENTIAL_DELAY"),
        help = "Draw an exponential delay per message instead of a fixed per-peer jitter"
    )]
    pub exponential_delay: bool,

    #[clap(long, env("GOSSAMER_RATE"), help = "Rate limit in bytes per second")]
    pub rate: Option<f64>,

    #[clap(long, env("GOSSAMER_CAPACITY"), help = "Rate limit burst capacity in bytes")]
    pub capacity: Option<f64>,

    #[clap(long, env("GOSSAMER_SEED"), help = "Seed for reproducible runs")]
    pub seed: Option<u64>,
}

impl Cli {
    pub fn settings(&self) -> Result<settings::Settings> {
        let mut settings = match &self.settings_file {
            Some(path) => settings::Settings::from_json(&std::fs::read_to_string(path)?)?,
            None => settings::Settings::default(),
        };
        if self.exponential_delay {
            settings.delay.use_fixed_delay = false;
        }
        if let Some(rate) = self.rate {
            settings.rate_limit.rate = rate;
        }
        if let Some(capacity) = self.capacity {
            settings.rate_limit.capacity = capacity;
        }
        if self.seed.is_some() {
            settings.rng_seed = self.seed;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn simulation_config(&self) -> SimulationConfig {
        let tick = Duration::from_millis(self.tick_ms);
        SimulationConfig {
            peers: self.peers,
            messages: self.messages,
            system_every: self.system_every,
            payload_bytes: self.payload_bytes,
            loss_probability: self.loss_probability,
            mean_rtt: self.mean_rtt,
            tick_seconds: tick.as_secs_f64(),
            max_ticks: self.max_ticks,
            pace: self.realtime.then_some(tick),
            stats_every: self.stats_every,
        }
    }
}
