//! Renewal metrics and Prometheus exporter
//!
//! # Prometheus Metrics
//!
//! - `shardgate_renewals_applied_total{kind}` - Changes published
//! - `shardgate_renewals_unchanged_total{kind}` - Changes that matched current state
//! - `shardgate_renewals_rejected_total{kind}` - Changes rejected by validation
//! - `shardgate_pools_opened_total` - Data source pools opened
//! - `shardgate_pools_closed_total` - Data source pools closed

use crate::event::{ChangeKind, RenewalOutcome};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the renewal engine and pool lifecycle
#[derive(Debug, Default)]
pub struct RenewalMetrics {
    applied: [AtomicU64; 4],
    unchanged: [AtomicU64; 4],
    rejected: [AtomicU64; 4],
    pools_opened: AtomicU64,
    pools_closed: AtomicU64,
}

impl RenewalMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, kind: ChangeKind, outcome: RenewalOutcome) {
        let counters = match outcome {
            RenewalOutcome::Applied => &self.applied,
            RenewalOutcome::Unchanged => &self.unchanged,
        };
        counters[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, kind: ChangeKind) {
        self.rejected[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_opened(&self) {
        self.pools_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_closed(&self) {
        self.pools_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn applied(&self, kind: ChangeKind) -> u64 {
        self.applied[kind.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn unchanged(&self, kind: ChangeKind) -> u64 {
        self.unchanged[kind.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejected(&self, kind: ChangeKind) -> u64 {
        self.rejected[kind.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pools_opened(&self) -> u64 {
        self.pools_opened.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pools_closed(&self) -> u64 {
        self.pools_closed.load(Ordering::Relaxed)
    }

    /// Pools currently open
    #[must_use]
    pub fn pools_open(&self) -> u64 {
        self.pools_opened().saturating_sub(self.pools_closed())
    }
}

/// Prometheus text format exporter
#[derive(Debug)]
pub struct PrometheusExporter {
    /// Metrics prefix (e.g., "shardgate")
    prefix: String,
}

impl PrometheusExporter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Export metrics in Prometheus text format
    #[must_use]
    pub fn export(&self, metrics: &RenewalMetrics) -> String {
        let mut output = String::with_capacity(2048);

        let families: [(&str, &str, fn(&RenewalMetrics, ChangeKind) -> u64); 3] = [
            ("renewals_applied_total", "Configuration changes published", RenewalMetrics::applied),
            (
                "renewals_unchanged_total",
                "Configuration changes matching the current state",
                RenewalMetrics::unchanged,
            ),
            ("renewals_rejected_total", "Configuration changes rejected", RenewalMetrics::rejected),
        ];
        for (name, help, read) in families {
            self.write_help(&mut output, name, help);
            self.write_type(&mut output, name, "counter");
            for kind in ChangeKind::ALL {
                let kind_label = kind.to_string();
                self.write_metric_with_labels(&mut output, name, read(metrics, kind), &[("kind", kind_label.as_str())]);
            }
        }

        self.write_help(&mut output, "pools_opened_total", "Data source pools opened");
        self.write_type(&mut output, "pools_opened_total", "counter");
        self.write_metric(&mut output, "pools_opened_total", metrics.pools_opened());

        self.write_help(&mut output, "pools_closed_total", "Data source pools closed");
        self.write_type(&mut output, "pools_closed_total", "counter");
        self.write_metric(&mut output, "pools_closed_total", metrics.pools_closed());

        output
    }

    fn write_help(&self, output: &mut String, name: &str, help: &str) {
        let _ = writeln!(output, "# HELP {}_{} {}", self.prefix, name, help);
    }

    fn write_type(&self, output: &mut String, name: &str, metric_type: &str) {
        let _ = writeln!(output, "# TYPE {}_{} {}", self.prefix, name, metric_type);
    }

    fn write_metric(&self, output: &mut String, name: &str, value: u64) {
        let _ = writeln!(output, "{}_{} {}", self.prefix, name, value);
    }

    fn write_metric_with_labels(&self, output: &mut String, name: &str, value: u64, labels: &[(&str, &str)]) {
        let labels_str: Vec<String> = labels.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
        let _ = writeln!(
            output,
            "{}_{}{{{}}} {}",
            self.prefix,
            name,
            labels_str.join(","),
            value
        );
    }
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new("shardgate")
    }
}
