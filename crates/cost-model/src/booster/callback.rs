//! Per-iteration evaluation logging and early stopping

use crate::error::{Error, Result};
use tracing::{debug, info};

/// Tracks the focused metric across boosting rounds
///
/// Training stops once the focused metric has not improved for
/// `rounds` consecutive iterations.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    rounds: usize,
    /// Log every n-th iteration at debug level, 0 disables
    verbose_eval: usize,
    focused_metric: String,
    maximize: bool,
    best_score: f64,
    best_iteration: usize,
    best_msg: String,
}

impl EarlyStopping {
    pub fn new(
        rounds: usize,
        verbose_eval: usize,
        focused_metric: impl Into<String>,
        maximize: bool,
    ) -> Self {
        Self {
            rounds,
            verbose_eval,
            focused_metric: focused_metric.into(),
            maximize,
            best_score: if maximize {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            },
            best_iteration: 0,
            best_msg: String::new(),
        }
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn focused_metric(&self) -> &str {
        &self.focused_metric
    }

    /// Record one iteration's evaluation results; returns true to stop
    pub fn after_iteration(&mut self, epoch: usize, results: &[(String, f64)]) -> Result<bool> {
        let mut sorted: Vec<&(String, f64)> = results.iter().collect();
        let focused = self.focused_metric.as_str();
        sorted.sort_by(|a, b| sort_key(focused, &a.0).cmp(&sort_key(focused, &b.0)));
        let msg = format_results(&sorted);

        if self.verbose_eval > 0 && epoch % self.verbose_eval == 0 {
            debug!("XGB iter {:3}: {}", epoch, msg);
        }

        let score = results
            .iter()
            .find(|(name, _)| *name == self.focused_metric)
            .map(|(_, score)| *score)
            .ok_or_else(|| {
                Error::Training(format!(
                    "focused metric {} missing from evaluation results",
                    self.focused_metric
                ))
            })?;

        let improved = if self.maximize {
            score > self.best_score
        } else {
            score < self.best_score
        };

        if improved {
            self.best_score = score;
            self.best_iteration = epoch;
            self.best_msg = format!("[{}] {}", epoch, msg);
        } else if epoch - self.best_iteration >= self.rounds {
            info!(best = %self.best_msg, "XGB stopped early");
            return Ok(true);
        }
        Ok(false)
    }
}

fn sort_key<'a>(focused: &str, name: &'a str) -> (bool, &'a str) {
    (name != focused, name)
}

fn format_results(results: &[&(String, f64)]) -> String {
    results
        .iter()
        .map(|(name, score)| format!("{}: {:.6}", name, score))
        .collect::<Vec<_>>()
        .join("\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(rmse: f64) -> Vec<(String, f64)> {
        vec![
            ("tr-a-peak@32".to_string(), 0.5),
            ("tr-p-rmse".to_string(), rmse),
        ]
    }

    #[test]
    fn test_stops_after_patience_runs_out() {
        let mut stopper = EarlyStopping::new(2, 0, "tr-p-rmse", false);
        assert!(!stopper.after_iteration(0, &results(1.0)).unwrap());
        assert!(!stopper.after_iteration(1, &results(0.5)).unwrap());
        assert!(!stopper.after_iteration(2, &results(0.6)).unwrap());
        assert!(stopper.after_iteration(3, &results(0.5)).unwrap());
        assert_eq!(stopper.best_iteration(), 1);
        assert_eq!(stopper.best_score(), 0.5);
    }

    #[test]
    fn test_maximize() {
        let mut stopper = EarlyStopping::new(1, 0, "tr-a-peak@32", true);
        assert!(!stopper.after_iteration(0, &results(1.0)).unwrap());
        assert!(stopper.after_iteration(1, &results(1.0)).unwrap());
        assert_eq!(stopper.best_score(), 0.5);
    }

    #[test]
    fn test_missing_metric_is_error() {
        let mut stopper = EarlyStopping::new(1, 0, "tr-missing", false);
        assert!(stopper.after_iteration(0, &results(1.0)).is_err());
    }

    #[test]
    fn test_focused_metric_sorts_first() {
        let a = ("tr-p-rmse".to_string(), 0.1);
        let b = ("tr-a-peak@32".to_string(), 0.2);
        let mut sorted = vec![&b, &a];
        sorted.sort_by(|x, y| sort_key("tr-p-rmse", &x.0).cmp(&sort_key("tr-p-rmse", &y.0)));
        assert_eq!(format_results(&sorted), "tr-p-rmse: 0.100000\ttr-a-peak@32: 0.200000");
    }
}
