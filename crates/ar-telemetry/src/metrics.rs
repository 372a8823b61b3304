use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A sorted `key=value` label set distinguishing series of one metric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, val)| (k.to_string(), val.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// `{key="value",...}` fragment for the text exposition, empty when
    /// there are no labels.
    fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Counter/gauge registry rendered as Prometheus text for
/// `/debug/metrics`. Deterministic output order via sorted maps.
#[derive(Debug)]
pub struct MetricsCollector {
    started_at: Instant,
    counters: Mutex<BTreeMap<(String, Labels), u64>>,
    gauges: Mutex<BTreeMap<(String, Labels), f64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: Mutex::new(BTreeMap::new()),
            gauges: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn inc(&self, name: &str) {
        self.inc_by(name, Labels::empty(), 1);
    }

    pub fn inc_labeled(&self, name: &str, labels: Labels) {
        self.inc_by(name, labels, 1);
    }

    pub fn inc_by(&self, name: &str, labels: Labels, amount: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        *counters.entry((name.to_string(), labels)).or_insert(0) += amount;
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut gauges = self.gauges.lock().unwrap_or_else(|p| p.into_inner());
        gauges.insert((name.to_string(), Labels::empty()), value);
    }

    pub fn counter_value(&self, name: &str, labels: Labels) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        counters
            .get(&(name.to_string(), labels))
            .copied()
            .unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Render the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# TYPE arcanos_uptime_seconds gauge\n");
        out.push_str(&format!("arcanos_uptime_seconds {}\n", self.uptime_seconds()));

        let counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        let mut last_name: Option<&str> = None;
        for ((name, labels), value) in counters.iter() {
            if last_name != Some(name.as_str()) {
                out.push_str(&format!("# TYPE {name} counter\n"));
                last_name = Some(name.as_str());
            }
            out.push_str(&format!("{name}{} {value}\n", labels.prometheus_str()));
        }
        drop(counters);

        let gauges = self.gauges.lock().unwrap_or_else(|p| p.into_inner());
        let mut last_name: Option<&str> = None;
        for ((name, labels), value) in gauges.iter() {
            if last_name != Some(name.as_str()) {
                out.push_str(&format!("# TYPE {name} gauge\n"));
                last_name = Some(name.as_str());
            }
            out.push_str(&format!("{name}{} {value}\n", labels.prometheus_str()));
        }

        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
