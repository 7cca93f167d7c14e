//! Prometheus metrics for training and prediction
//!
//! All handles share one process-wide set of metrics, registered on first
//! use into a dedicated registry that callers can render for scraping.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use tracing::warn;

/// Buckets for training and prediction durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance; `None` when registration failed
static GLOBAL_METRICS: OnceLock<Option<CostModelMetricsInner>> = OnceLock::new();

struct CostModelMetricsInner {
    registry: Registry,
    training_duration_seconds: Histogram,
    prediction_duration_seconds: Histogram,
    training_samples: IntGauge,
    workload_groups: IntGauge,
    trainings_total: IntCounter,
    skipped_candidates_total: IntCounter,
    boosting_rounds: IntGauge,
}

impl CostModelMetricsInner {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let training_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cost_model_training_duration_seconds",
                "Time spent retraining the booster",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let prediction_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cost_model_prediction_duration_seconds",
                "Time spent scoring one batch of candidates",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let training_samples = IntGauge::with_opts(Opts::new(
            "cost_model_training_samples",
            "Measured candidates held in the training set",
        ))?;
        let workload_groups = IntGauge::with_opts(Opts::new(
            "cost_model_workload_groups",
            "Distinct workloads in the training set",
        ))?;
        let trainings_total = IntCounter::with_opts(Opts::new(
            "cost_model_trainings_total",
            "Completed booster trainings",
        ))?;
        let skipped_candidates_total = IntCounter::with_opts(Opts::new(
            "cost_model_skipped_candidates_total",
            "Candidates dropped from training because their measurement failed",
        ))?;
        let boosting_rounds = IntGauge::with_opts(Opts::new(
            "cost_model_boosting_rounds",
            "Trees kept by the most recent training",
        ))?;

        registry.register(Box::new(training_duration_seconds.clone()))?;
        registry.register(Box::new(prediction_duration_seconds.clone()))?;
        registry.register(Box::new(training_samples.clone()))?;
        registry.register(Box::new(workload_groups.clone()))?;
        registry.register(Box::new(trainings_total.clone()))?;
        registry.register(Box::new(skipped_candidates_total.clone()))?;
        registry.register(Box::new(boosting_rounds.clone()))?;

        Ok(Self {
            registry,
            training_duration_seconds,
            prediction_duration_seconds,
            training_samples,
            workload_groups,
            trainings_total,
            skipped_candidates_total,
            boosting_rounds,
        })
    }
}

/// Cost model metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics. Every method is a no-op if registration failed.
#[derive(Clone)]
pub struct CostModelMetrics {
    _private: (),
}

impl Default for CostModelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CostModelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostModelMetrics").finish_non_exhaustive()
    }
}

impl CostModelMetrics {
    /// Create a handle, registering the metrics on first call
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match CostModelMetricsInner::new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register cost model metrics");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&CostModelMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_training_duration(&self, secs: f64) {
        if let Some(inner) = self.inner() {
            inner.training_duration_seconds.observe(secs);
            inner.trainings_total.inc();
        }
    }

    pub fn observe_prediction_duration(&self, secs: f64) {
        if let Some(inner) = self.inner() {
            inner.prediction_duration_seconds.observe(secs);
        }
    }

    /// Update training set size gauges
    pub fn set_training_set(&self, samples: usize, groups: usize) {
        if let Some(inner) = self.inner() {
            inner.training_samples.set(samples as i64);
            inner.workload_groups.set(groups as i64);
        }
    }

    pub fn inc_skipped_candidates(&self, count: usize) {
        if let Some(inner) = self.inner() {
            inner.skipped_candidates_total.inc_by(count as u64);
        }
    }

    pub fn set_boosting_rounds(&self, rounds: usize) {
        if let Some(inner) = self.inner() {
            inner.boosting_rounds.set(rounds as i64);
        }
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let Some(inner) = self.inner() else {
            return String::new();
        };
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&inner.registry.gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let metrics = CostModelMetrics::new();
        metrics.observe_training_duration(0.5);
        metrics.observe_prediction_duration(0.001);
        metrics.set_training_set(120, 2);
        metrics.inc_skipped_candidates(3);
        metrics.set_boosting_rounds(42);

        let text = metrics.render();
        assert!(text.contains("cost_model_training_duration_seconds"));
        assert!(text.contains("cost_model_skipped_candidates_total"));
        assert!(text.contains("cost_model_boosting_rounds"));
    }

    #[test]
    fn test_handles_share_state() {
        let a = CostModelMetrics::new();
        let b = a.clone();
        a.set_boosting_rounds(7);
        assert!(b.render().contains("cost_model_boosting_rounds"));
    }
}
