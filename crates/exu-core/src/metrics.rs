//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

/// Metrics published by the update engine.
#[derive(Clone)]
pub struct UpdaterMetrics {
    checks: IntCounterVec,
    check_duration: Histogram,
    updates_available: IntGauge,
    item_updates: IntCounterVec,
    batches_finished: IntCounterVec,
    registry: Arc<Registry>,
}

impl UpdaterMetrics {
    /// Register all engine metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let checks = IntCounterVec::new(
            Opts::new(
                "exu_update_checks_total",
                "Total number of reconciliation queries by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(checks.clone()))?;

        let check_duration = Histogram::with_opts(
            HistogramOpts::new(
                "exu_update_check_duration_seconds",
                "Wall time spent waiting on the repository for a bulk query",
            )
            .buckets(prometheus::exponential_buckets(0.01, 2.0, 12)?),
        )?;
        registry.register(Box::new(check_duration.clone()))?;

        let updates_available = IntGauge::with_opts(Opts::new(
            "exu_updates_available",
            "Number of updates reported by the last successful reconciliation",
        ))?;
        registry.register(Box::new(updates_available.clone()))?;

        let item_updates = IntCounterVec::new(
            Opts::new(
                "exu_item_updates_total",
                "Per-component update attempts by terminal outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(item_updates.clone()))?;

        let batches_finished = IntCounterVec::new(
            Opts::new(
                "exu_batches_finished_total",
                "Completed update batches by aggregate outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(batches_finished.clone()))?;

        Ok(Self {
            checks,
            check_duration,
            updates_available,
            item_updates,
            batches_finished,
            registry,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Record a successful bulk query and the size of its result.
    pub fn record_check_succeeded(&self, available: usize, seconds: f64) {
        self.checks.with_label_values(&["ok"]).inc();
        self.check_duration.observe(seconds);
        self.updates_available
            .set(i64::try_from(available).unwrap_or(i64::MAX));
    }

    pub fn record_check_failed(&self, seconds: f64) {
        self.checks.with_label_values(&["failed"]).inc();
        self.check_duration.observe(seconds);
    }

    pub fn record_item_succeeded(&self) {
        self.item_updates.with_label_values(&["succeeded"]).inc();
    }

    pub fn record_item_failed(&self) {
        self.item_updates.with_label_values(&["failed"]).inc();
    }

    pub fn record_batch_finished(&self, all_succeeded: bool) {
        let outcome = if all_succeeded {
            "all_succeeded"
        } else {
            "some_failed"
        };
        self.batches_finished.with_label_values(&[outcome]).inc();
    }
}

impl std::fmt::Debug for UpdaterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(families: &[prometheus::proto::MetricFamily], name: &str) -> Vec<(String, u64)> {
        let mut outcomes: Vec<_> = families
            .iter()
            .filter(|f| f.get_name() == name)
            .flat_map(|f| f.get_metric())
            .map(|m| {
                let label = m
                    .get_label()
                    .iter()
                    .find(|l| l.get_name() == "outcome")
                    .map(|l| l.get_value().to_owned())
                    .unwrap_or_default();
                (label, m.get_counter().get_value() as u64)
            })
            .collect();
        outcomes.sort();
        outcomes
    }

    #[test]
    fn counters_are_exported() {
        let registry = Arc::new(Registry::new());
        let metrics = UpdaterMetrics::new(registry.clone()).unwrap();
        metrics.record_check_succeeded(2, 0.1);
        metrics.record_check_failed(0.2);
        metrics.record_item_succeeded();
        metrics.record_item_failed();
        metrics.record_item_failed();
        metrics.record_batch_finished(true);
        metrics.record_batch_finished(false);

        let families = registry.gather();
        assert_eq!(
            outcomes(&families, "exu_update_checks_total"),
            vec![("failed".to_owned(), 1), ("ok".to_owned(), 1)]
        );
        assert_eq!(
            outcomes(&families, "exu_item_updates_total"),
            vec![("failed".to_owned(), 2), ("succeeded".to_owned(), 1)]
        );
        assert_eq!(
            outcomes(&families, "exu_batches_finished_total"),
            vec![("all_succeeded".to_owned(), 1), ("some_failed".to_owned(), 1)]
        );
        let gauge = families
            .iter()
            .find(|f| f.get_name() == "exu_updates_available")
            .unwrap();
        assert_eq!(gauge.get_metric()[0].get_gauge().get_value(), 2.0);
    }

    #[test]
    fn double_registration_fails() {
        let registry = Arc::new(Registry::new());
        UpdaterMetrics::new(registry.clone()).unwrap();
        assert!(UpdaterMetrics::new(registry).is_err());
    }
}
