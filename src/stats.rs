//! Named per-peer metrics
//!
//! Metrics are either static values recorded once, or samples: callables
//! evaluated every time the metric is read. The scheduler only registers
//! metrics; formatting and persistence belong to the sink.
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Count(u64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Bool(v) => write!(f, "{}", v),
            MetricValue::Count(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{:.3}", v),
            MetricValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl MetricValue {
    /// Zero value of the same kind
    pub fn zeroed(&self) -> Self {
        match self {
            MetricValue::Bool(_) => MetricValue::Bool(false),
            MetricValue::Count(_) => MetricValue::Count(0),
            MetricValue::Float(_) => MetricValue::Float(0.0),
            MetricValue::Text(_) => MetricValue::Text(String::new()),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Count(v as u64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

pub type Sampler = Box<dyn Fn() -> MetricValue + Send + Sync>;

/// Receiver for metric registrations
pub trait StatsSink {
    fn add_value(&mut self, name: &str, value: MetricValue);
    fn add_sample(&mut self, name: &str, sampler: Sampler);
}

pub enum Metric {
    Value(MetricValue),
    Sample(Sampler),
}

impl Metric {
    pub fn read(&self) -> MetricValue {
        match self {
            Metric::Value(value) => value.clone(),
            Metric::Sample(sampler) => sampler(),
        }
    }
}

impl std::fmt::Debug for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Metric::Sample(_) => f.write_str("Sample(..)"),
        }
    }
}

/// In-memory metrics for one remote peer as seen from the local node
#[derive(Debug)]
pub struct PeerStats {
    local_name: String,
    peer_name: String,
    // registration order is preserved for dumps
    metrics: Vec<(String, Metric)>,
}

impl PeerStats {
    pub fn new(local_name: impl Into<String>, peer_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            peer_name: peer_name.into(),
            metrics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|(name, _)| name.as_str())
    }

    /// Current value of a metric, evaluating samples
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, metric)| metric.read())
    }

    /// All metrics as a JSON object
    pub fn snapshot(&self) -> Value {
        let mut map = Map::new();
        for (name, metric) in &self.metrics {
            let value = serde_json::to_value(metric.read()).unwrap_or(Value::Null);
            map.insert(name.clone(), value);
        }
        Value::Object(map)
    }

    /// Log the selected metrics (all when `metrics` is empty) under a batch id
    pub fn dump_stats(&self, batch_id: &str, metrics: &[&str]) {
        for (name, metric) in &self.metrics {
            if !metrics.is_empty() && !metrics.contains(&name.as_str()) {
                continue;
            }
            info!(
                "[{}->{}] {} {}={}",
                self.local_name,
                self.peer_name,
                batch_id,
                name,
                metric.read()
            );
        }
    }

    /// Zero the selected recorded values (all when `metrics` is empty).
    /// Samples always reflect live state and are left alone.
    pub fn reset_stats(&mut self, metrics: &[&str]) {
        for (name, metric) in &mut self.metrics {
            if !metrics.is_empty() && !metrics.contains(&name.as_str()) {
                continue;
            }
            if let Metric::Value(value) = metric {
                *value = value.zeroed();
            }
        }
    }

    fn upsert(&mut self, name: &str, metric: Metric) {
        match self.metrics.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = metric,
            None => self.metrics.push((name.to_string(), metric)),
        }
    }
}

impl StatsSink for PeerStats {
    fn add_value(&mut self, name: &str, value: MetricValue) {
        self.upsert(name, Metric::Value(value));
    }

    fn add_sample(&mut self, name: &str, sampler: Sampler) {
        self.upsert(name, Metric::Sample(sampler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn values_and_samples() {
        let counter = Arc::new(AtomicU64::new(1));
        let mut stats = PeerStats::new("local", "remote");
        stats.add_value("Identifier", "abc".into());
        let c = counter.clone();
        stats.add_sample(
            "Counter",
            Box::new(move || MetricValue::Count(c.load(Ordering::Relaxed))),
        );

        assert_eq!(stats.get("Identifier"), Some(MetricValue::Text("abc".into())));
        assert_eq!(stats.get("Counter"), Some(MetricValue::Count(1)));
        counter.store(5, Ordering::Relaxed);
        assert_eq!(stats.get("Counter"), Some(MetricValue::Count(5)));
        assert_eq!(stats.get("Missing"), None);
    }

    #[test]
    fn re_registration_replaces() {
        let mut stats = PeerStats::new("local", "remote");
        stats.add_value("Enabled", false.into());
        stats.add_value("Enabled", true.into());
        assert_eq!(stats.len(), 1);
        assert_eq!(stats.get("Enabled"), Some(MetricValue::Bool(true)));
    }

    #[test]
    fn snapshot_is_json_object() {
        let mut stats = PeerStats::new("local", "remote");
        stats.add_value("Address", "10.0.0.1:8800".into());
        stats.add_value("MessageQueueLength", 3usize.into());
        stats.add_value("RoundTripEstimate", 1.5.into());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot["Address"], "10.0.0.1:8800");
        assert_eq!(snapshot["MessageQueueLength"], 3);
        assert_eq!(snapshot["RoundTripEstimate"], 1.5);
        assert_eq!(
            stats.names().collect::<Vec<_>>(),
            vec!["Address", "MessageQueueLength", "RoundTripEstimate"]
        );
    }

    #[test]
    fn reset_zeroes_values_only() {
        let mut stats = PeerStats::new("local", "remote");
        stats.add_value("Sent", 12usize.into());
        stats.add_value("Address", "10.0.0.1:8800".into());
        stats.add_sample("Live", Box::new(|| MetricValue::Count(3)));

        stats.reset_stats(&["Sent", "Live"]);
        assert_eq!(stats.get("Sent"), Some(MetricValue::Count(0)));
        assert_eq!(stats.get("Live"), Some(MetricValue::Count(3)));
        assert_eq!(
            stats.get("Address"),
            Some(MetricValue::Text("10.0.0.1:8800".into()))
        );

        stats.reset_stats(&[]);
        assert_eq!(stats.get("Address"), Some(MetricValue::Text(String::new())));
        assert_eq!(stats.len(), 3);
    }

    #[test]
    fn display_formats() {
        assert_eq!(MetricValue::Float(1.23456).to_string(), "1.235");
        assert_eq!(MetricValue::Count(7).to_string(), "7");
        assert_eq!(MetricValue::Text("[a, b]".into()).to_string(), "[a, b]");
    }
}
