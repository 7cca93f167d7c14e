//! Gradient-boosted regression trees with custom objectives
//!
//! A small second-order boosting library: the caller supplies per-row
//! gradients through [`Objective`] and any number of evaluation metrics.
//! Training stops early once the focused metric stalls and the ensemble is
//! cut back to its best iteration.

mod callback;
mod tree;

pub use callback::EarlyStopping;
pub use tree::RegressionTree;

use crate::error::{Error, Result};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};
use tree::FeatureCuts;

/// Prefix of the native booster format
const MAGIC: &[u8; 6] = b"CMGBT\x01";

/// Supplies first and second order gradients for the current margins
pub trait Objective: Sync {
    fn gradients(&self, preds: &[f32]) -> Result<(Vec<f32>, Vec<f32>)>;
}

type MetricFn<'a> = Box<dyn Fn(&[f32]) -> Result<f64> + Sync + 'a>;

/// Named evaluation function over the current training margins
pub struct EvalMetric<'a> {
    name: String,
    maximize: bool,
    eval: MetricFn<'a>,
}

impl<'a> EvalMetric<'a> {
    pub fn new(
        name: impl Into<String>,
        maximize: bool,
        eval: impl Fn(&[f32]) -> Result<f64> + Sync + 'a,
    ) -> Self {
        Self {
            name: name.into(),
            maximize,
            eval: Box::new(eval),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn maximize(&self) -> bool {
        self.maximize
    }
}

/// Tree learning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    /// Maximum tree depth
    pub max_depth: usize,

    /// Minimum loss reduction required to split a node
    pub gamma: f64,

    /// Minimum hessian sum in each child
    pub min_child_weight: f64,

    /// Learning rate applied to every leaf
    pub eta: f64,

    /// L2 regularization on leaf weights
    pub lambda: f64,

    /// Histogram bins per feature
    pub max_bin: usize,

    /// Initial margin of every row
    pub base_score: f32,

    /// Threads used for split search; the global rayon pool when unset
    pub nthread: Option<usize>,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            gamma: 0.001,
            min_child_weight: 0.0,
            eta: 0.2,
            lambda: 1.0,
            max_bin: 256,
            base_score: 0.5,
            nthread: None,
        }
    }
}

impl BoosterParams {
    pub fn validate(&self) -> Result<()> {
        if !(2..=u16::MAX as usize).contains(&self.max_bin) {
            return Err(Error::InvalidConfig(format!(
                "max_bin must be in 2..=65535, got {}",
                self.max_bin
            )));
        }
        if !(self.eta.is_finite() && self.eta > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "eta must be positive, got {}",
                self.eta
            )));
        }
        for (name, value) in [
            ("gamma", self.gamma),
            ("lambda", self.lambda),
            ("min_child_weight", self.min_child_weight),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        if !self.base_score.is_finite() {
            return Err(Error::InvalidConfig("base_score must be finite".to_string()));
        }
        if self.nthread == Some(0) {
            return Err(Error::InvalidConfig("nthread must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Boosting loop options
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub num_boost_round: usize,
    /// Stop once the focused metric has not improved for this many rounds
    pub early_stopping_rounds: Option<usize>,
    /// Log evaluation results every n rounds, 0 disables
    pub verbose_eval: usize,
    /// Full metric name (`<eval_name>-<metric>`); defaults to the first metric
    pub focused_metric: Option<String>,
    pub eval_name: String,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            num_boost_round: 10000,
            early_stopping_rounds: Some(50),
            verbose_eval: 25,
            focused_metric: None,
            eval_name: "tr".to_string(),
        }
    }
}

/// Trained tree ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    num_features: usize,
    base_score: f32,
    trees: Vec<RegressionTree>,
    best_iteration: Option<usize>,
    best_score: Option<f64>,
}

impl Booster {
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    /// Margin for every row: base score plus every tree's output
    pub fn predict(&self, data: ArrayView2<f32>) -> Result<Vec<f32>> {
        if data.ncols() != self.num_features {
            return Err(Error::ShapeMismatch(format!(
                "booster expects {} features, got {}",
                self.num_features,
                data.ncols()
            )));
        }
        let preds = data
            .outer_iter()
            .map(|row| {
                let owned;
                let row = match row.as_slice() {
                    Some(slice) => slice,
                    None => {
                        owned = row.to_vec();
                        &owned
                    }
                };
                self.trees
                    .iter()
                    .fold(self.base_score, |acc, tree| acc + tree.predict_row(row))
            })
            .collect();
        Ok(preds)
    }

    /// Serialize into the native format
    pub fn save_raw(&self) -> Result<Vec<u8>> {
        let mut bytes = MAGIC.to_vec();
        bincode::serialize_into(&mut bytes, self)?;
        Ok(bytes)
    }

    /// Parse bytes produced by [`Booster::save_raw`]
    pub fn load_raw(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(&MAGIC[..])
            .ok_or_else(|| Error::Corrupt("missing booster header".to_string()))?;
        let booster: Booster =
            bincode::deserialize(body).map_err(|e| Error::Corrupt(e.to_string()))?;
        for (i, tree) in booster.trees.iter().enumerate() {
            if !tree.is_well_formed() {
                return Err(Error::Corrupt(format!("tree {} has invalid node links", i)));
            }
            if tree.max_feature().is_some_and(|f| f >= booster.num_features) {
                return Err(Error::Corrupt(format!(
                    "tree {} splits on a feature outside {} columns",
                    i, booster.num_features
                )));
            }
        }
        Ok(booster)
    }
}

/// Train a fresh ensemble on `data` (one row per training row)
pub fn train(
    params: &BoosterParams,
    data: ArrayView2<f32>,
    objective: &dyn Objective,
    metrics: &[EvalMetric<'_>],
    options: &TrainOptions,
) -> Result<Booster> {
    params.validate()?;
    if data.nrows() == 0 {
        return Err(Error::Training("training matrix has no rows".to_string()));
    }
    match params.nthread {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| Error::Training(format!("failed to build thread pool: {}", e)))?;
            pool.install(|| boost(params, data, objective, metrics, options))
        }
        None => boost(params, data, objective, metrics, options),
    }
}

fn boost(
    params: &BoosterParams,
    data: ArrayView2<f32>,
    objective: &dyn Objective,
    metrics: &[EvalMetric<'_>],
    options: &TrainOptions,
) -> Result<Booster> {
    let start = Instant::now();
    let rows = data.nrows();
    let cuts = FeatureCuts::build(data, params.max_bin);
    let binned = cuts.quantize(data);

    let mut stopper = match metrics.first() {
        Some(first) => {
            let focused = options
                .focused_metric
                .clone()
                .unwrap_or_else(|| format!("{}-{}", options.eval_name, first.name));
            let maximize = metrics
                .iter()
                .find(|m| format!("{}-{}", options.eval_name, m.name) == focused)
                .map(|m| m.maximize)
                .ok_or_else(|| {
                    Error::Training(format!("focused metric {} is not evaluated", focused))
                })?;
            Some(EarlyStopping::new(
                options.early_stopping_rounds.unwrap_or(usize::MAX),
                options.verbose_eval,
                focused,
                maximize,
            ))
        }
        None => None,
    };

    let mut margin = vec![params.base_score; rows];
    let mut trees = Vec::new();
    for epoch in 0..options.num_boost_round {
        let (grad, hess) = objective.gradients(&margin)?;
        if grad.len() != rows || hess.len() != rows {
            return Err(Error::LengthMismatch {
                what: "objective gradients",
                expected: rows,
                actual: grad.len().min(hess.len()),
            });
        }

        let (tree, delta) = RegressionTree::grow(&binned, &cuts, &grad, &hess, params);
        for (m, d) in margin.iter_mut().zip(&delta) {
            *m += d;
        }
        trees.push(tree);

        if let Some(stopper) = stopper.as_mut() {
            let results = metrics
                .iter()
                .map(|m| {
                    let score = (m.eval)(&margin)?;
                    Ok((format!("{}-{}", options.eval_name, m.name), score))
                })
                .collect::<Result<Vec<_>>>()?;
            if stopper.after_iteration(epoch, &results)? {
                break;
            }
        }
    }

    let (best_iteration, best_score) = match &stopper {
        Some(stopper) if options.early_stopping_rounds.is_some() && !trees.is_empty() => {
            trees.truncate(stopper.best_iteration() + 1);
            (Some(stopper.best_iteration()), Some(stopper.best_score()))
        }
        _ => (None, None),
    };

    info!(
        rows,
        features = data.ncols(),
        trees = trees.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Booster trained"
    );
    debug!(
        best_iteration = ?best_iteration,
        best_score = ?best_score,
        "Ensemble truncated to best iteration"
    );

    Ok(Booster {
        num_features: data.ncols(),
        base_score: params.base_score,
        trees,
        best_iteration,
        best_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    struct SquaredError {
        targets: Vec<f32>,
    }

    impl Objective for SquaredError {
        fn gradients(&self, preds: &[f32]) -> Result<(Vec<f32>, Vec<f32>)> {
            let grad = preds.iter().zip(&self.targets).map(|(p, y)| p - y).collect();
            Ok((grad, vec![1.0; preds.len()]))
        }
    }

    fn params() -> BoosterParams {
        BoosterParams {
            gamma: 0.0,
            ..Default::default()
        }
    }

    fn step_data() -> (Array2<f32>, Vec<f32>) {
        let data = Array2::from_shape_fn((20, 2), |(i, j)| if j == 0 { i as f32 } else { 0.0 });
        let targets = (0..20).map(|i| if i < 10 { 0.0 } else { 1.0 }).collect();
        (data, targets)
    }

    fn rmse_metric(targets: &[f32]) -> EvalMetric<'_> {
        EvalMetric::new("rmse", false, move |preds: &[f32]| {
            let sum: f64 = preds
                .iter()
                .zip(targets)
                .map(|(p, y)| ((p - y) as f64).powi(2))
                .sum();
            Ok((sum / preds.len() as f64).sqrt())
        })
    }

    #[test]
    fn test_fits_step_function() {
        let (data, targets) = step_data();
        let objective = SquaredError {
            targets: targets.clone(),
        };
        let options = TrainOptions {
            num_boost_round: 100,
            early_stopping_rounds: None,
            ..Default::default()
        };
        let booster = train(&params(), data.view(), &objective, &[], &options).unwrap();
        assert_eq!(booster.num_trees(), 100);

        let preds = booster.predict(data.view()).unwrap();
        for (p, y) in preds.iter().zip(&targets) {
            assert!((p - y).abs() < 0.01, "pred {} target {}", p, y);
        }
    }

    #[test]
    fn test_early_stopping_truncates() {
        let (data, targets) = step_data();
        let objective = SquaredError {
            targets: targets.clone(),
        };
        let metrics = [rmse_metric(&targets)];
        let options = TrainOptions {
            num_boost_round: 1000,
            early_stopping_rounds: Some(5),
            ..Default::default()
        };
        let booster = train(&params(), data.view(), &objective, &metrics, &options).unwrap();
        let best = booster.best_iteration().unwrap();
        assert!(booster.num_trees() < 1000);
        assert_eq!(booster.num_trees(), best + 1);
        assert!(booster.best_score().unwrap() < 0.01);
    }

    #[test]
    fn test_dedicated_pool_matches_global() {
        let (data, targets) = step_data();
        let objective = SquaredError { targets };
        let options = TrainOptions {
            num_boost_round: 10,
            early_stopping_rounds: None,
            ..Default::default()
        };
        let global = train(&params(), data.view(), &objective, &[], &options).unwrap();
        let pooled_params = BoosterParams {
            nthread: Some(2),
            ..params()
        };
        let pooled = train(&pooled_params, data.view(), &objective, &[], &options).unwrap();
        assert_eq!(global, pooled);
    }

    #[test]
    fn test_save_raw_roundtrip() {
        let (data, targets) = step_data();
        let objective = SquaredError { targets };
        let options = TrainOptions {
            num_boost_round: 5,
            early_stopping_rounds: None,
            ..Default::default()
        };
        let booster = train(&params(), data.view(), &objective, &[], &options).unwrap();
        let restored = Booster::load_raw(&booster.save_raw().unwrap()).unwrap();
        assert_eq!(
            booster.predict(data.view()).unwrap(),
            restored.predict(data.view()).unwrap()
        );
    }

    #[test]
    fn test_load_raw_rejects_garbage() {
        assert!(Booster::load_raw(b"nope").unwrap_err().is_integrity());
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[0xff; 3]);
        assert!(Booster::load_raw(&bytes).unwrap_err().is_integrity());
    }

    #[test]
    fn test_predict_checks_width() {
        let (data, targets) = step_data();
        let objective = SquaredError { targets };
        let options = TrainOptions {
            num_boost_round: 1,
            early_stopping_rounds: None,
            ..Default::default()
        };
        let booster = train(&params(), data.view(), &objective, &[], &options).unwrap();
        let narrow = Array2::<f32>::zeros((3, 1));
        assert!(matches!(
            booster.predict(narrow.view()),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_params_validation() {
        let bad = BoosterParams {
            max_bin: 1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = BoosterParams {
            eta: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(BoosterParams::default().validate().is_ok());
    }

    #[test]
    fn test_empty_training_matrix() {
        let data = Array2::<f32>::zeros((0, 3));
        let objective = SquaredError { targets: vec![] };
        let err = train(
            &params(),
            data.view(),
            &objective,
            &[],
            &TrainOptions::default(),
        );
        assert!(matches!(err, Err(Error::Training(_))));
    }
}
