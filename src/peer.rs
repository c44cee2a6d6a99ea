//! Remote peer as seen by the gossip scheduler
//!
//! A `PeerNode` owns the peer's transmission queue and round-trip estimator
//! and borrows the node-wide rate limiter. It decides when a queued message
//! may go out; it never performs I/O and never decides that a peer is gone.
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::estimator::RoundTripEstimator;
use crate::limiters::RateLimiter;
use crate::message::Message;
use crate::scheduling_error;
use crate::settings::{DelaySettings, Settings};
use crate::stats::{MetricValue, PeerStats, StatsSink};
use crate::transmission_queue::TransmissionQueue;

/// Stable, opaque identifier of a remote peer
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId::new(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        PeerId::new(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Who the peer is, independent of scheduling state
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PeerIdentity {
    pub identifier: PeerId,
    pub name: Option<String>,
    pub address: PeerAddress,
}

impl PeerIdentity {
    pub fn new(identifier: impl Into<PeerId>, address: PeerAddress) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            address,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicit name, or the first eight characters of the identifier
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.identifier.as_str().chars().take(8).collect(),
        }
    }
}

/// Delay added before a non-system message becomes eligible.
///
/// Chosen once per peer: either one jitter value drawn at construction, or
/// an exponential draw on every call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SendDelay {
    Fixed(f64),
    Exponential { lambda: f64 },
}

impl SendDelay {
    pub fn from_settings<R: Rng>(settings: &DelaySettings, rng: &mut R) -> Self {
        if settings.use_fixed_delay {
            let (low, high) = settings.delay_range;
            SendDelay::Fixed(rng.gen_range(low..=high))
        } else {
            SendDelay::Exponential {
                lambda: settings.distribution_lambda,
            }
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match *self {
            SendDelay::Fixed(delay) => delay,
            SendDelay::Exponential { lambda } => {
                // inverse CDF; 1 - u keeps the argument of ln in (0, 1]
                let u: f64 = rng.gen();
                -(1.0 - u).ln() / lambda
            }
        }
    }
}

/// Read-only view of peer state shared with statistic samplers
#[derive(Debug, Default)]
struct PeerGauges {
    enabled: AtomicBool,
    queue_len: AtomicUsize,
    rto_bits: AtomicU64,
    queue_summary: RwLock<String>,
}

impl PeerGauges {
    fn rto(&self) -> f64 {
        f64::from_bits(self.rto_bits.load(Ordering::Relaxed))
    }

    fn queue_summary(&self) -> String {
        match self.queue_summary.read() {
            Ok(summary) => summary.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub struct PeerNode<M> {
    identity: PeerIdentity,
    name: String,
    enabled: bool,
    missed_ticks: u32,
    estimator: RoundTripEstimator,
    queue: TransmissionQueue<M>,
    rate_limiter: Arc<dyn RateLimiter>,
    delay: SendDelay,
    rng: StdRng,
    gauges: Arc<PeerGauges>,
    stats: Option<PeerStats>,
}

impl<M: Message> PeerNode<M> {
    pub fn new(
        identity: PeerIdentity,
        rate_limiter: Arc<dyn RateLimiter>,
        settings: &Settings,
    ) -> Result<Self> {
        settings.validate()?;
        let mut rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let delay = SendDelay::from_settings(&settings.delay, &mut rng);
        let name = identity.display_name();
        debug!("[{}] New peer at {} with delay {:?}", name, identity.address, delay);

        let peer = Self {
            name,
            identity,
            enabled: false,
            missed_ticks: 0,
            estimator: RoundTripEstimator::new(settings.estimator.clone()),
            queue: TransmissionQueue::new(),
            rate_limiter,
            delay,
            rng,
            gauges: Arc::new(PeerGauges::default()),
            stats: None,
        };
        peer.refresh_gauges();
        Ok(peer)
    }

    pub fn identifier(&self) -> &PeerId {
        &self.identity.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &PeerAddress {
        &self.identity.address
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.gauges.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn send_delay(&self) -> SendDelay {
        self.delay
    }

    pub fn rto(&self) -> f64 {
        self.estimator.rto()
    }

    pub fn estimator(&self) -> &RoundTripEstimator {
        &self.estimator
    }

    pub fn queue(&self) -> &TransmissionQueue<M> {
        &self.queue
    }

    pub fn missed_ticks(&self) -> u32 {
        self.missed_ticks
    }

    /// Delay in seconds for the next non-system message
    pub fn delay(&mut self) -> f64 {
        self.delay.sample(&mut self.rng)
    }

    /// Queue a message: system messages are due immediately, everything
    /// else after this peer's delay.
    pub fn enqueue_message(&mut self, msg: M, now: f64) -> Result<()> {
        if !now.is_finite() {
            return Err(scheduling_error!(
                "[{}] cannot schedule message {} at time {}",
                self.name,
                msg.identifier().short(),
                now
            ));
        }
        let time_to_send = if msg.is_system_message() {
            0.0
        } else {
            now + self.delay()
        };
        debug!(
            "[{}] Enqueue message {} for {:.3}",
            self.name,
            msg.identifier().short(),
            time_to_send
        );
        self.queue.enqueue(msg, time_to_send)?;
        self.refresh_gauges();
        Ok(())
    }

    /// Remove a message from the queue; absent messages are ignored.
    pub fn dequeue_message(&mut self, msg: &M) -> Option<M> {
        let removed = self.queue.dequeue(msg.identifier());
        self.refresh_gauges();
        removed
    }

    /// Take the next message that may be sent at `now`, if any.
    ///
    /// The head must be due (`time_to_send < now`) before the rate limiter is
    /// asked; system messages never touch the rate limiter. A denied message
    /// stays queued. Nothing is due at a non-finite `now`.
    pub fn get_next_sendable(&mut self, now: f64) -> Option<M> {
        if !now.is_finite() {
            return None;
        }
        let (time_to_send, msg) = self.queue.peek_earliest()?;
        if time_to_send >= now {
            return None;
        }
        if !(msg.is_system_message() || self.rate_limiter.consume(msg.byte_len())) {
            debug!(
                "[{}] Rate limited message {} ({} bytes)",
                self.name,
                msg.identifier().short(),
                msg.byte_len()
            );
            return None;
        }
        let id = msg.identifier().clone();
        let sendable = self.queue.dequeue(&id);
        self.refresh_gauges();
        sendable
    }

    /// The message was acknowledged after `rtt` seconds.
    pub fn message_delivered(&mut self, msg: &M, rtt: f64) {
        self.estimator.update(rtt);
        self.queue.dequeue(msg.identifier());
        self.refresh_gauges();
    }

    /// The message is presumed lost: back off and schedule it again as if it
    /// were new. `None` uses the wall clock.
    pub fn message_dropped(&mut self, msg: M, now: Option<f64>) -> Result<()> {
        let now = now.unwrap_or_else(wall_clock_seconds);
        if !now.is_finite() {
            return Err(scheduling_error!(
                "[{}] cannot reschedule dropped message {} at time {}",
                self.name,
                msg.identifier().short(),
                now
            ));
        }
        self.estimator.backoff();
        self.refresh_gauges();
        debug!(
            "[{}] Message {} dropped, rto now {:.3}",
            self.name,
            msg.identifier().short(),
            self.estimator.rto()
        );
        self.enqueue_message(msg, now)
    }

    pub fn reset_ticks(&mut self) {
        self.missed_ticks = 0;
    }

    pub fn bump_ticks(&mut self) {
        self.missed_ticks = self.missed_ticks.saturating_add(1);
    }

    /// Start collecting statistics for this peer relative to `local_name`.
    /// Calling it again replaces the previous collection.
    pub fn initialize_stats(&mut self, local_name: &str) {
        let mut stats = PeerStats::new(local_name, self.name.as_str());
        self.register_stats(&mut stats);
        self.stats = Some(stats);
    }

    pub fn stats(&self) -> Option<&PeerStats> {
        self.stats.as_ref()
    }

    /// Log the selected metrics (all when empty); a no-op before
    /// `initialize_stats`.
    pub fn dump_peer_stats(&self, batch_id: &str, metrics: &[&str]) {
        if let Some(stats) = &self.stats {
            stats.dump_stats(batch_id, metrics);
        }
    }

    pub fn reset_peer_stats(&mut self, metrics: &[&str]) {
        if let Some(stats) = &mut self.stats {
            stats.reset_stats(metrics);
        }
    }

    /// Register this peer's metrics with any sink. Samples stay live after
    /// registration.
    pub fn register_stats<S: StatsSink + ?Sized>(&self, sink: &mut S) {
        sink.add_value("Identifier", self.identifier().as_str().into());
        sink.add_value("Address", self.address().to_string().into());

        let gauges = self.gauges.clone();
        sink.add_sample(
            "Enabled",
            Box::new(move || MetricValue::Bool(gauges.enabled.load(Ordering::Relaxed))),
        );
        let gauges = self.gauges.clone();
        sink.add_sample(
            "MessageQueue",
            Box::new(move || MetricValue::Text(gauges.queue_summary())),
        );
        let gauges = self.gauges.clone();
        sink.add_sample(
            "MessageQueueLength",
            Box::new(move || MetricValue::from(gauges.queue_len.load(Ordering::Relaxed))),
        );
        let gauges = self.gauges.clone();
        sink.add_sample(
            "RoundTripEstimate",
            Box::new(move || MetricValue::Float(gauges.rto())),
        );
    }

    fn refresh_gauges(&self) {
        let gauges = &self.gauges;
        gauges.enabled.store(self.enabled, Ordering::Relaxed);
        gauges.queue_len.store(self.queue.len(), Ordering::Relaxed);
        gauges
            .rto_bits
            .store(self.estimator.rto().to_bits(), Ordering::Relaxed);
        let summary = self.queue.to_string();
        match gauges.queue_summary.write() {
            Ok(mut current) => *current = summary,
            Err(poisoned) => *poisoned.into_inner() = summary,
        }
    }
}

impl<M> fmt::Display for PeerNode<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl<M> fmt::Debug for PeerNode<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerNode")
            .field("identity", &self.identity)
            .field("enabled", &self.enabled)
            .field("missed_ticks", &self.missed_ticks)
            .field("rto", &self.estimator.rto())
            .field("queued", &self.queue.len())
            .field("delay", &self.delay)
            .field("stats", &self.stats.as_ref().map(PeerStats::len))
            .finish()
    }
}

fn wall_clock_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
