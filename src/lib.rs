//! Per-peer transmission scheduling for gossip networks.
//!
//! Each remote peer gets a [`peer::PeerNode`] that owns a lazily-pruned
//! [`transmission_queue::TransmissionQueue`] and a
//! [`estimator::RoundTripEstimator`], and draws send capacity from a shared
//! [`limiters::RateLimiter`].
pub mod cli;
pub mod error;
pub mod estimator;
pub mod limiters;
pub mod message;
pub mod peer;
pub mod settings;
pub mod simulation;
pub mod stats;
pub mod transmission_queue;

pub use error::{GossamerError, Result, SchedulingError};
pub use estimator::RoundTripEstimator;
pub use limiters::{RateLimiter, TokenBucket, Unlimited};
pub use message::{Message, MessageId, OutboundMessage};
pub use peer::{PeerAddress, PeerId, PeerIdentity, PeerNode, SendDelay};
pub use settings::Settings;
pub use stats::{MetricValue, PeerStats, StatsSink};
pub use transmission_queue::TransmissionQueue;
