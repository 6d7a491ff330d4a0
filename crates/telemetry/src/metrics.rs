//! Prometheus metrics for the matchmaking service.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};

/// Metrics collector for the psyst matchmaking tool.
///
/// Every instance carries its own registry, so independent matchmaking
/// passes in one process never collide on metric registration.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    binaries_matched: IntCounter,
    neighbour_lookups: IntCounter,
    match_failures: IntCounter,
    db_latency: HistogramVec,
}

impl Metrics {
    /// Create a new metrics instance.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let binaries_matched = IntCounter::with_opts(Opts::new(
            "psyst_binaries_matched_total",
            "Total number of COMPAS binaries matched against the MESA grid",
        ))?;
        registry.register(Box::new(binaries_matched.clone()))?;

        let neighbour_lookups = IntCounter::with_opts(Opts::new(
            "psyst_neighbour_lookups_total",
            "Total number of grid neighbours resolved against the MESA database",
        ))?;
        registry.register(Box::new(neighbour_lookups.clone()))?;

        let match_failures = IntCounter::with_opts(Opts::new(
            "psyst_match_failures_total",
            "Total number of binaries that could not be matched",
        ))?;
        registry.register(Box::new(match_failures.clone()))?;

        let db_latency = HistogramVec::new(
            HistogramOpts::new(
                "psyst_db_latency_seconds",
                "Database query latency in seconds",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(db_latency.clone()))?;

        Ok(Self {
            registry,
            binaries_matched,
            neighbour_lookups,
            match_failures,
            db_latency,
        })
    }

    /// Increment the matched binaries counter.
    pub fn inc_binaries_matched(&self) {
        self.binaries_matched.inc();
    }

    /// Increment the neighbour lookup counter.
    pub fn inc_neighbour_lookups(&self, count: u64) {
        self.neighbour_lookups.inc_by(count);
    }

    /// Increment the match failure counter.
    pub fn inc_match_failures(&self) {
        self.match_failures.inc();
    }

    /// Record database query latency.
    pub fn observe_db_latency(&self, operation: &str, duration_secs: f64) {
        self.db_latency
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Get Prometheus metrics as a string.
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_register_independently() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.inc_binaries_matched();
        b.inc_match_failures();

        let text = a.gather().unwrap();
        assert!(text.contains("psyst_binaries_matched_total 1"));
        assert!(!text.contains("psyst_match_failures_total 1"));
    }
}
