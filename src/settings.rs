//! Gossamer scheduling settings
use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::Result;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_MINIMUM_RTO: f64 = 1.0;
pub const DEFAULT_MAXIMUM_RTO: f64 = 60.0;
pub const DEFAULT_BACKOFF_RATE: f64 = 2.0;
pub const DEFAULT_MIN_RESOLUTION: f64 = 0.025;
pub const DEFAULT_ALPHA: f64 = 0.125;
pub const DEFAULT_BETA: f64 = 0.25;
pub const DEFAULT_K: f64 = 4.0;

pub const DEFAULT_DELAY_RANGE: (f64, f64) = (0.1, 0.4);
pub const DEFAULT_DISTRIBUTION_LAMBDA: f64 = 10.0;

pub const DEFAULT_RATE_BYTES_PER_SECOND: f64 = 4096.0;
pub const DEFAULT_CAPACITY_BYTES: f64 = 8192.0;

/// Tuning for the round-trip estimator, all values in seconds except gains
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EstimatorSettings {
    pub minimum_rto: f64,
    pub maximum_rto: f64,
    pub backoff_rate: f64,
    pub min_resolution: f64,
    pub alpha: f64,
    pub beta: f64,
    pub k: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            minimum_rto: DEFAULT_MINIMUM_RTO,
            maximum_rto: DEFAULT_MAXIMUM_RTO,
            backoff_rate: DEFAULT_BACKOFF_RATE,
            min_resolution: DEFAULT_MIN_RESOLUTION,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            k: DEFAULT_K,
        }
    }
}

impl EstimatorSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.minimum_rto > 0.0 && self.minimum_rto <= self.maximum_rto) {
            return Err(config_error!(
                "RTO bounds must satisfy 0 < minimum ({}) <= maximum ({})",
                self.minimum_rto,
                self.maximum_rto
            ));
        }
        if self.backoff_rate.is_nan() || self.backoff_rate < 1.0 {
            return Err(config_error!(
                "backoff rate {} must be at least 1.0",
                self.backoff_rate
            ));
        }
        for (name, gain) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !(gain > 0.0 && gain <= 1.0) {
                return Err(config_error!("{} gain {} must be in (0, 1]", name, gain));
            }
        }
        if !(self.k >= 0.0 && self.min_resolution >= 0.0)
            || !(self.k.is_finite() && self.min_resolution.is_finite())
        {
            return Err(config_error!(
                "k ({}) and min_resolution ({}) must be finite and not negative",
                self.k,
                self.min_resolution
            ));
        }
        Ok(())
    }
}

/// How a peer spaces out non-system messages
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DelaySettings {
    /// Draw one fixed jitter per peer (true) or an exponential delay per call
    pub use_fixed_delay: bool,
    /// Floor and ceiling, in seconds, of the uniform fixed jitter
    pub delay_range: (f64, f64),
    /// Rate of the exponential distribution used for variable delays
    pub distribution_lambda: f64,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            use_fixed_delay: true,
            delay_range: DEFAULT_DELAY_RANGE,
            distribution_lambda: DEFAULT_DISTRIBUTION_LAMBDA,
        }
    }
}

impl DelaySettings {
    pub fn validate(&self) -> Result<()> {
        let (low, high) = self.delay_range;
        if !(low.is_finite() && high.is_finite() && 0.0 <= low && low <= high) {
            return Err(config_error!(
                "delay range [{}, {}] must be finite, non-negative and ordered",
                low,
                high
            ));
        }
        if !(self.distribution_lambda > 0.0 && self.distribution_lambda.is_finite()) {
            return Err(config_error!(
                "distribution lambda {} must be positive",
                self.distribution_lambda
            ));
        }
        Ok(())
    }
}

/// Token bucket sizing, expressed in message bytes
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Tokens (bytes) added per second
    pub rate: f64,
    /// Maximum tokens the bucket can hold
    pub capacity: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE_BYTES_PER_SECOND,
            capacity: DEFAULT_CAPACITY_BYTES,
        }
    }
}

impl RateLimitSettings {
    pub fn token_rate_seconds(&self) -> f64 {
        self.rate
    }

    pub fn token_rate_milliseconds(&self) -> f64 {
        self.token_rate_seconds() / 1000.0
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.rate >= 0.0 && self.capacity >= 0.0) {
            return Err(config_error!(
                "rate ({}) and capacity ({}) must not be negative",
                self.rate,
                self.capacity
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub estimator: EstimatorSettings,
    pub delay: DelaySettings,
    pub rate_limit: RateLimitSettings,
    // Fixed seed for the per-peer delay RNG; entropy-seeded when absent
    pub rng_seed: Option<u64>,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.estimator.validate()?;
        self.delay.validate()?;
        self.rate_limit.validate()
    }

    /// Load settings from a JSON document, filling missing fields with defaults
    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.estimator.minimum_rto, 1.0);
        assert_eq!(settings.estimator.maximum_rto, 60.0);
        assert_eq!(settings.delay.delay_range, (0.1, 0.4));
        assert!(settings.delay.use_fixed_delay);
        assert_eq!(settings.rng_seed, None);
    }

    #[test]
    fn inverted_delay_range_rejected() {
        let delay = DelaySettings {
            delay_range: (0.5, 0.1),
            ..DelaySettings::default()
        };
        assert!(delay.validate().is_err());
    }

    #[test]
    fn bad_rto_bounds_rejected() {
        let estimator = EstimatorSettings {
            minimum_rto: 10.0,
            maximum_rto: 5.0,
            ..EstimatorSettings::default()
        };
        let err = estimator.validate().unwrap_err();
        assert_eq!(err.error_type(), "configuration_error");
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings =
            Settings::from_json(r#"{"delay": {"use_fixed_delay": false}, "rng_seed": 7}"#)
                .unwrap();
        assert!(!settings.delay.use_fixed_delay);
        assert_eq!(settings.delay.distribution_lambda, 10.0);
        assert_eq!(settings.rng_seed, Some(7));
        assert_eq!(settings.rate_limit, RateLimitSettings::default());
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        let err = Settings::from_json("{not json").unwrap_err();
        assert_eq!(err.error_type(), "serialization_error");
    }

    #[test]
    fn nan_estimator_settings_rejected() {
        for settings in [
            EstimatorSettings {
                k: f64::NAN,
                ..EstimatorSettings::default()
            },
            EstimatorSettings {
                min_resolution: f64::NAN,
                ..EstimatorSettings::default()
            },
            EstimatorSettings {
                k: f64::INFINITY,
                ..EstimatorSettings::default()
            },
            EstimatorSettings {
                backoff_rate: f64::NAN,
                ..EstimatorSettings::default()
            },
        ] {
            let err = settings.validate().unwrap_err();
            assert_eq!(err.error_type(), "configuration_error");
        }
    }

    #[test]
    fn token_rate_conversion() {
        let settings = RateLimitSettings {
            rate: 2000.0,
            capacity: 100.0,
        };
        assert_eq!(settings.token_rate_seconds(), 2000.0);
        assert!((settings.token_rate_milliseconds() - 2.0).abs() < 1e-12);
    }
}
