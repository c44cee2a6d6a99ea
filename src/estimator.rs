//! Round-trip time estimation and retransmission timeout
//!
//! Jacobson/Karels style filter: the first sample after construction or a
//! backoff seeds the smoothed RTT directly, later samples are folded in with
//! fixed gains. Loss backs the timeout off multiplicatively up to a ceiling.
use tracing::{debug, warn};

use crate::settings::EstimatorSettings;

#[derive(Clone, Debug)]
pub struct RoundTripEstimator {
    settings: EstimatorSettings,
    rto: f64,
    srtt: f64,
    rttvar: f64,
}

impl Default for RoundTripEstimator {
    fn default() -> Self {
        Self::new(EstimatorSettings::default())
    }
}

impl RoundTripEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            rto: settings.minimum_rto,
            srtt: 0.0,
            rttvar: 0.0,
            settings,
        }
    }

    /// Current retransmission timeout in seconds
    pub fn rto(&self) -> f64 {
        self.rto
    }

    pub fn srtt(&self) -> f64 {
        self.srtt
    }

    pub fn rttvar(&self) -> f64 {
        self.rttvar
    }

    pub fn is_seeded(&self) -> bool {
        self.rttvar != 0.0
    }

    /// Fold a measured round trip (seconds) into the estimate.
    ///
    /// Negative or non-finite samples are discarded.
    pub fn update(&mut self, measured: f64) {
        if !(measured.is_finite() && measured >= 0.0) {
            warn!("Discarding invalid round-trip sample {}", measured);
            return;
        }

        let s = &self.settings;
        if self.is_seeded() {
            self.rttvar = (1.0 - s.beta) * self.rttvar + s.beta * (self.srtt - measured).abs();
            self.srtt = (1.0 - s.alpha) * self.srtt + s.alpha * measured;
        } else {
            self.srtt = measured;
            self.rttvar = measured * 0.5;
        }

        let rto = self.srtt + s.min_resolution.max(s.k * self.rttvar);
        self.rto = rto.clamp(s.minimum_rto, s.maximum_rto);
        debug!(
            "RTT sample {:.4}s -> srtt={:.4} rttvar={:.4} rto={:.4}",
            measured, self.srtt, self.rttvar, self.rto
        );
    }

    /// Presumed loss: forget history and grow the timeout.
    pub fn backoff(&mut self) {
        self.srtt = 0.0;
        self.rttvar = 0.0;
        self.rto = (self.rto * self.settings.backoff_rate).min(self.settings.maximum_rto);
        debug!("Backing off, rto={:.4}", self.rto);
    }
}
