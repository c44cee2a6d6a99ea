//! Lossy-network simulation driving a set of peers end to end
//!
//! All peers share one token bucket. Time is virtual: every tick advances the
//! clock by `tick_seconds`, and the rate limiter drips on that same clock so a
//! run with a fixed seed is reproducible.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::config_error;
use crate::error::Result;
use crate::limiters::{RateLimiter, TokenBucket};
use crate::message::{Message, OutboundMessage};
use crate::peer::{PeerAddress, PeerIdentity, PeerNode};
use crate::settings::Settings;

#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub peers: usize,
    pub messages: usize,
    /// Every n-th message is a system message; 0 disables them
    pub system_every: usize,
    pub payload_bytes: usize,
    pub loss_probability: f64,
    pub mean_rtt: f64,
    pub tick_seconds: f64,
    pub max_ticks: u64,
    /// Real time between ticks; `None` runs as fast as possible
    pub pace: Option<Duration>,
    /// Dump peer statistics every n ticks; 0 disables periodic dumps
    pub stats_every: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            peers: 4,
            messages: 50,
            system_every: 10,
            payload_bytes: 512,
            loss_probability: 0.1,
            mean_rtt: 0.2,
            tick_seconds: 0.05,
            max_ticks: 10_000,
            pace: None,
            stats_every: 0,
        }
    }
}

/// Simulated peers listen on consecutive ports from here
const BASE_PORT: u16 = 8800;
const MAX_PEERS: usize = (u16::MAX - BASE_PORT) as usize + 1;

fn peer_port(index: usize) -> Result<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|offset| BASE_PORT.checked_add(offset))
        .ok_or_else(|| config_error!("no port left for peer {}", index))
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.peers == 0 || self.peers > MAX_PEERS {
            return Err(config_error!(
                "simulation needs between 1 and {} peers, got {}",
                MAX_PEERS,
                self.peers
            ));
        }
        if !(0.0..1.0).contains(&self.loss_probability) {
            return Err(config_error!(
                "loss probability {} must be in [0, 1)",
                self.loss_probability
            ));
        }
        if !(self.tick_seconds > 0.0 && self.mean_rtt >= 0.0) {
            return Err(config_error!(
                "tick ({}) must be positive and mean rtt ({}) non-negative",
                self.tick_seconds,
                self.mean_rtt
            ));
        }
        Ok(())
    }
}

/// Token bucket that drips on the simulation clock instead of the wall clock
struct VirtualClockLimiter {
    bucket: TokenBucket,
    now_ms: AtomicI64,
}

impl VirtualClockLimiter {
    fn advance(&self, now: f64) {
        self.now_ms.store((now * 1000.0) as i64, Ordering::Relaxed);
    }
}

impl RateLimiter for VirtualClockLimiter {
    fn consume(&self, size: usize) -> bool {
        self.bucket
            .consume_at(size, self.now_ms.load(Ordering::Relaxed))
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PeerReport {
    pub name: String,
    pub address: String,
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub remaining: usize,
    pub final_rto: f64,
    pub missed_ticks: u32,
    pub stats: serde_json::Value,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SimulationReport {
    pub ticks: u64,
    pub elapsed_seconds: f64,
    pub completed: bool,
    pub peers: Vec<PeerReport>,
}

impl SimulationReport {
    pub fn total_delivered(&self) -> u64 {
        self.peers.iter().map(|p| p.delivered).sum()
    }
}

type SimMessage = Arc<OutboundMessage>;

enum Outcome {
    Acked { rtt: f64 },
    Lost,
}

struct InFlight {
    peer: usize,
    message: SimMessage,
    resolves_at: f64,
    outcome: Outcome,
}

struct SimPeer {
    node: PeerNode<SimMessage>,
    report: PeerReport,
    heard_from: bool,
}

pub struct Simulation {
    config: SimulationConfig,
    limiter: Arc<VirtualClockLimiter>,
    peers: Vec<SimPeer>,
    in_flight: Vec<InFlight>,
    rng: StdRng,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    pub fn new(config: SimulationConfig, settings: Settings) -> Result<Self> {
        config.validate()?;
        settings.validate()?;

        let limiter = Arc::new(VirtualClockLimiter {
            bucket: TokenBucket::with_tokens(
                settings.rate_limit.capacity,
                settings.rate_limit.clone(),
                0,
            ),
            now_ms: AtomicI64::new(0),
        });
        let mut rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut peers = Vec::with_capacity(config.peers);
        for i in 0..config.peers {
            // each peer gets its own delay stream derived from the run seed
            let mut peer_settings = settings.clone();
            peer_settings.rng_seed = settings.rng_seed.map(|_| rng.gen());
            let identity = PeerIdentity::new(
                format!("{:016x}", rng.gen::<u64>()),
                PeerAddress::new("127.0.0.1", peer_port(i)?),
            )
            .with_name(format!("peer-{}", i));
            let limiter: Arc<dyn RateLimiter> = limiter.clone();
            let mut node = PeerNode::new(identity, limiter, &peer_settings)?;
            node.set_enabled(true);

            node.initialize_stats("local");
            let report = PeerReport {
                name: node.name().to_string(),
                address: node.address().to_string(),
                ..PeerReport::default()
            };
            peers.push(SimPeer {
                node,
                report,
                heard_from: false,
            });
        }

        Ok(Self {
            config,
            limiter,
            peers,
            in_flight: Vec::new(),
            rng,
        })
    }

    pub fn peer(&self, index: usize) -> Option<&PeerNode<SimMessage>> {
        self.peers.get(index).map(|p| &p.node)
    }

    pub async fn run(&mut self) -> Result<SimulationReport> {
        info!(
            "Starting simulation: {} peers, {} messages, loss {:.2}",
            self.config.peers, self.config.messages, self.config.loss_probability
        );
        self.seed_messages()?;

        let mut interval = self.config.pace.map(tokio::time::interval);
        let mut tick = 0u64;
        let mut now = 0.0;
        while tick < self.config.max_ticks && !self.is_complete() {
            match interval.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => tokio::task::yield_now().await,
            }
            tick += 1;
            now = tick as f64 * self.config.tick_seconds;
            self.limiter.advance(now);

            self.resolve_in_flight(now)?;
            self.send_round(now);
            self.update_liveness();

            if self.config.stats_every > 0 && tick % self.config.stats_every == 0 {
                let batch = format!("tick-{}", tick);
                for peer in &self.peers {
                    peer.node.dump_peer_stats(&batch, &[]);
                }
            }
        }

        let completed = self.is_complete();
        info!(
            "Simulation finished after {} ticks ({:.2}s simulated), completed={}",
            tick, now, completed
        );
        Ok(self.report(tick, now, completed))
    }

    fn seed_messages(&mut self) -> Result<()> {
        for n in 0..self.config.messages {
            let id = format!("msg-{:06}", n);
            let payload = vec![0u8; self.config.payload_bytes];
            let is_system = self.config.system_every > 0 && n % self.config.system_every == 0;
            let message = Arc::new(if is_system {
                OutboundMessage::system(id, payload)
            } else {
                OutboundMessage::new(id, payload)
            });
            for peer in &mut self.peers {
                peer.node.enqueue_message(message.clone(), 0.0)?;
            }
        }
        Ok(())
    }

    fn send_round(&mut self, now: f64) {
        for (index, peer) in self.peers.iter_mut().enumerate() {
            if !peer.node.is_enabled() {
                continue;
            }
            let Some(message) = peer.node.get_next_sendable(now) else {
                continue;
            };
            peer.report.sent += 1;
            let lost = self.rng.gen_bool(self.config.loss_probability);
            let in_flight = if lost {
                InFlight {
                    peer: index,
                    message,
                    resolves_at: now + peer.node.rto(),
                    outcome: Outcome::Lost,
                }
            } else {
                let rtt = self.config.mean_rtt * self.rng.gen_range(0.5..=1.5);
                InFlight {
                    peer: index,
                    message,
                    resolves_at: now + rtt,
                    outcome: Outcome::Acked { rtt },
                }
            };
            self.in_flight.push(in_flight);
        }
    }

    fn resolve_in_flight(&mut self, now: f64) -> Result<()> {
        let (due, pending): (Vec<InFlight>, Vec<InFlight>) = self
            .in_flight
            .drain(..)
            .partition(|f| f.resolves_at <= now);
        self.in_flight = pending;

        for flight in due {
            let peer = &mut self.peers[flight.peer];
            match flight.outcome {
                Outcome::Acked { rtt } => {
                    peer.node.message_delivered(&flight.message, rtt);
                    peer.report.delivered += 1;
                    peer.heard_from = true;
                }
                Outcome::Lost => {
                    debug!(
                        "[{}] Timed out waiting for {}",
                        peer.node.name(),
                        flight.message.identifier().short()
                    );
                    peer.node.message_dropped(flight.message, Some(now))?;
                    peer.report.dropped += 1;
                }
            }
        }
        Ok(())
    }

    fn update_liveness(&mut self) {
        for peer in &mut self.peers {
            if std::mem::take(&mut peer.heard_from) {
                peer.node.reset_ticks();
            } else {
                peer.node.bump_ticks();
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.in_flight.is_empty() && self.peers.iter().all(|p| p.node.queue().is_empty())
    }

    fn report(&self, ticks: u64, elapsed_seconds: f64, completed: bool) -> SimulationReport {
        let peers = self
            .peers
            .iter()
            .map(|peer| PeerReport {
                remaining: peer.node.queue().len(),
                final_rto: peer.node.rto(),
                missed_ticks: peer.node.missed_ticks(),
                stats: peer
                    .node
                    .stats()
                    .map(|stats| stats.snapshot())
                    .unwrap_or(serde_json::Value::Null),
                ..peer.report.clone()
            })
            .collect();
        SimulationReport {
            ticks,
            elapsed_seconds,
            completed,
            peers,
        }
    }
}
