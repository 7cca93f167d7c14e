//! Gradient-boosted cost model
//!
//! Measured candidates accumulate per workload. Once enough samples exist,
//! every update retrains a fresh booster over the whole training set with
//! the pack-sum objective, so candidates are scored by the sum of their
//! sub-unit rows and targets are normalized within each workload.

use super::{CostModel, PackSum, UNTRAINED_SCORE};
use crate::booster::{self, Booster, BoosterParams, EvalMetric, TrainOptions};
use crate::checkpoint::{self, CheckpointKind};
use crate::data::{DataStore, TrainingGroup};
use crate::error::{Error, Result};
use crate::extractor::{ExtractorState, FeatureExtractor};
use crate::models::{CostReduction, FeatureMatrix, MeasureCandidate, RunnerResult, TuneContext};
use crate::observability::CostModelMetrics;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Metric that drives early stopping
const FOCUSED_METRIC: &str = "p-rmse";

/// Evaluation set name prefixed to metric names
const EVAL_NAME: &str = "tr";

/// XGB model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XgbModelConfig {
    /// Tree learning parameters
    pub booster: BoosterParams,

    /// Training starts once this many samples are stored
    pub num_warmup_samples: usize,

    /// Rounds without improvement of `tr-p-rmse` before stopping, 0 disables
    pub early_stopping_rounds: usize,

    /// Log evaluation results every n rounds at debug level, 0 disables
    pub verbose_eval: usize,

    /// Upper bound on boosting rounds
    pub num_boost_round: usize,

    /// Window of the `a-peak@n` metric
    pub average_peak_n: usize,

    /// How repeated timings become one cost
    pub cost_reduction: CostReduction,
}

impl Default for XgbModelConfig {
    fn default() -> Self {
        Self {
            booster: BoosterParams::default(),
            num_warmup_samples: 100,
            early_stopping_rounds: 50,
            verbose_eval: 25,
            num_boost_round: 10000,
            average_peak_n: 32,
            cost_reduction: CostReduction::default(),
        }
    }
}

impl XgbModelConfig {
    pub fn validate(&self) -> Result<()> {
        self.booster.validate()?;
        if self.num_boost_round == 0 {
            return Err(Error::InvalidConfig(
                "num_boost_round must be at least 1".to_string(),
            ));
        }
        if self.average_peak_n == 0 {
            return Err(Error::InvalidConfig(
                "average_peak_n must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct XgbCheckpoint {
    booster: Option<Vec<u8>>,
    groups: Vec<TrainingGroup>,
    data_size: usize,
    extractor_state: ExtractorState,
}

/// Cost model backed by a boosted tree ensemble
pub struct XgbModel {
    config: XgbModelConfig,
    extractor: Box<dyn FeatureExtractor>,
    data: DataStore,
    booster: Option<Booster>,
    metrics: CostModelMetrics,
}

impl XgbModel {
    pub fn new(extractor: Box<dyn FeatureExtractor>, config: XgbModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            extractor,
            data: DataStore::new(),
            booster: None,
            metrics: CostModelMetrics::new(),
        })
    }

    /// Restore a model saved with [`CostModel::save`]
    pub fn from_checkpoint(
        extractor: Box<dyn FeatureExtractor>,
        config: XgbModelConfig,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let mut model = Self::new(extractor, config)?;
        model.load(path.as_ref())?;
        Ok(model)
    }

    pub fn config(&self) -> &XgbModelConfig {
        &self.config
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    /// Number of stored samples across all workloads
    pub fn data_size(&self) -> usize {
        self.data.data_size()
    }

    pub fn booster(&self) -> Option<&Booster> {
        self.booster.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.booster.is_some()
    }

    pub fn extractor(&self) -> &dyn FeatureExtractor {
        self.extractor.as_ref()
    }

    pub fn extractor_mut(&mut self) -> &mut dyn FeatureExtractor {
        self.extractor.as_mut()
    }

    fn extract(
        &mut self,
        context: &TuneContext,
        candidates: &[MeasureCandidate],
    ) -> Result<Vec<FeatureMatrix>> {
        let features = self.extractor.extract_from(context, candidates)?;
        if features.len() != candidates.len() {
            return Err(Error::Extractor(format!(
                "extractor returned {} feature matrices for {} candidates",
                features.len(),
                candidates.len()
            )));
        }
        Ok(features)
    }

    /// Log how the current booster does on a fresh batch of a known workload
    fn validate_batch(
        &self,
        booster: &Booster,
        min_cost: f64,
        features: &[FeatureMatrix],
        costs: &[f64],
    ) -> Result<()> {
        let targets: Vec<f64> = costs.iter().map(|c| min_cost / c).collect();
        let pack = PackSum::new(features, Some(&targets))?;
        let preds = booster.predict(pack.rows())?;
        let rmse = pack.rmse(&preds)?;
        let peak = pack.average_peak_score(&preds, self.config.average_peak_n)?;
        debug!(
            samples = costs.len(),
            p_rmse = rmse,
            a_peak = peak,
            n = self.config.average_peak_n,
            "Validation on new batch"
        );
        Ok(())
    }

    fn train(&mut self) -> Result<()> {
        let start = Instant::now();
        let (xs, ys) = self.data.training_set();
        let pack = PackSum::new(&xs, Some(&ys))?;
        let peak_n = self.config.average_peak_n;

        let pack_ref = &pack;
        let metrics = [
            EvalMetric::new(FOCUSED_METRIC, false, move |preds: &[f32]| pack_ref.rmse(preds)),
            EvalMetric::new(format!("a-peak@{}", peak_n), true, move |preds: &[f32]| {
                pack_ref.average_peak_score(preds, peak_n)
            }),
        ];
        let options = TrainOptions {
            num_boost_round: self.config.num_boost_round,
            early_stopping_rounds: match self.config.early_stopping_rounds {
                0 => None,
                rounds => Some(rounds),
            },
            verbose_eval: self.config.verbose_eval,
            focused_metric: Some(format!("{}-{}", EVAL_NAME, FOCUSED_METRIC)),
            eval_name: EVAL_NAME.to_string(),
        };

        let booster = booster::train(&self.config.booster, pack.rows(), &pack, &metrics, &options)?;
        let elapsed = start.elapsed();

        info!(
            samples = pack.len(),
            rows = pack.num_rows(),
            groups = self.data.num_groups(),
            trees = booster.num_trees(),
            best_score = ?booster.best_score(),
            elapsed_ms = elapsed.as_millis() as u64,
            "XGB model trained"
        );
        self.metrics.observe_training_duration(elapsed.as_secs_f64());
        self.metrics.set_boosting_rounds(booster.num_trees());
        self.booster = Some(booster);
        Ok(())
    }
}

impl CostModel for XgbModel {
    fn update(
        &mut self,
        context: &TuneContext,
        candidates: &[MeasureCandidate],
        results: &[RunnerResult],
    ) -> Result<()> {
        if candidates.len() != results.len() {
            return Err(Error::LengthMismatch {
                what: "runner results",
                expected: candidates.len(),
                actual: results.len(),
            });
        }
        if candidates.is_empty() {
            return Ok(());
        }

        let features = self.extract(context, candidates)?;
        let reduction = self.config.cost_reduction;
        let (mut kept_features, mut costs) = (Vec::new(), Vec::new());
        let (mut failed, mut empty) = (0usize, 0usize);
        for (matrix, result) in features.into_iter().zip(results) {
            match result.cost(reduction) {
                None => failed += 1,
                Some(_) if matrix.nrows() == 0 => empty += 1,
                Some(cost) => {
                    kept_features.push(matrix);
                    costs.push(cost);
                }
            }
        }
        if failed + empty > 0 {
            debug!(failed, empty, kept = costs.len(), "Dropped candidates from training batch");
            self.metrics.inc_skipped_candidates(failed + empty);
        }
        if costs.is_empty() {
            return Ok(());
        }

        let group_hash = context.workload_hash();
        if let (Some(booster), Some(group)) = (&self.booster, self.data.get(&group_hash)) {
            self.validate_batch(booster, group.min_cost(), &kept_features, &costs)?;
        }

        self.data.push(&group_hash, kept_features, costs)?;
        self.metrics
            .set_training_set(self.data.data_size(), self.data.num_groups());

        if self.data.data_size() < self.config.num_warmup_samples {
            debug!(
                data_size = self.data.data_size(),
                warmup = self.config.num_warmup_samples,
                "Skipping training until warm-up threshold is reached"
            );
            return Ok(());
        }
        self.train()
    }

    fn predict(
        &mut self,
        context: &TuneContext,
        candidates: &[MeasureCandidate],
    ) -> Result<Vec<f64>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let features = self.extract(context, candidates)?;

        let scores = match &self.booster {
            None => vec![UNTRAINED_SCORE; candidates.len()],
            Some(booster) => {
                let pack = PackSum::new(&features, None)?;
                let preds = booster.predict(pack.rows())?;
                pack.predict_with_score(&preds)?
            }
        };
        self.metrics
            .observe_prediction_duration(start.elapsed().as_secs_f64());
        Ok(scores)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let payload = XgbCheckpoint {
            booster: self.booster.as_ref().map(Booster::save_raw).transpose()?,
            groups: self.data.groups().cloned().collect(),
            data_size: self.data.data_size(),
            extractor_state: self.extractor.random_state(),
        };
        checkpoint::save(path, CheckpointKind::Xgb, &payload)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let payload: XgbCheckpoint = checkpoint::load(path, CheckpointKind::Xgb)?;

        let booster = payload
            .booster
            .as_deref()
            .map(Booster::load_raw)
            .transpose()
            .map_err(|e| Error::integrity(path, e.to_string()))?;
        let data = DataStore::from_groups(payload.groups)
            .map_err(|e| Error::integrity(path, e.to_string()))?;
        if data.data_size() != payload.data_size {
            return Err(Error::integrity(
                path,
                format!(
                    "recorded data size {} differs from stored samples {}",
                    payload.data_size,
                    data.data_size()
                ),
            ));
        }
        self.extractor
            .set_random_state(payload.extractor_state)
            .map_err(|e| Error::integrity(path, format!("extractor state: {}", e)))?;

        self.data = data;
        self.booster = booster;
        self.metrics
            .set_training_set(self.data.data_size(), self.data.num_groups());
        info!(
            path = %path.display(),
            data_size = self.data.data_size(),
            groups = self.data.num_groups(),
            trained = self.booster.is_some(),
            "XGB model restored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::RandomFeatureExtractor;
    use crate::models::{Schedule, Workload};

    fn model(warmup: usize) -> XgbModel {
        let config = XgbModelConfig {
            num_warmup_samples: warmup,
            num_boost_round: 50,
            ..Default::default()
        };
        XgbModel::new(Box::new(RandomFeatureExtractor::default()), config).unwrap()
    }

    fn batch(n: usize) -> (TuneContext, Vec<MeasureCandidate>, Vec<RunnerResult>) {
        let workload = Workload::matmul(64, 64, 64);
        let candidates = (0..n)
            .map(|_| MeasureCandidate::new(Schedule::new(workload.clone()), vec![]))
            .collect();
        let results = (0..n)
            .map(|i| RunnerResult::success(vec![0.1 + i as f64 * 0.01]))
            .collect();
        (TuneContext::new(workload), candidates, results)
    }

    #[test]
    fn test_untrained_predicts_neutral_scores() {
        let mut model = model(100);
        let (ctx, candidates, results) = batch(5);
        model.update(&ctx, &candidates, &results).unwrap();
        assert!(!model.is_trained());
        assert_eq!(model.data_size(), 5);
        assert_eq!(
            model.predict(&ctx, &candidates).unwrap(),
            vec![UNTRAINED_SCORE; 5]
        );
    }

    #[test]
    fn test_trains_after_warmup() {
        let mut model = model(10);
        let (ctx, candidates, results) = batch(10);
        model.update(&ctx, &candidates, &results).unwrap();
        assert!(model.is_trained());

        let scores = model.predict(&ctx, &candidates).unwrap();
        assert_eq!(scores.len(), 10);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_failed_results_are_dropped() {
        let mut model = model(100);
        let (ctx, candidates, mut results) = batch(4);
        results[1] = RunnerResult::error("build failed");
        results[3] = RunnerResult::success(vec![]);
        model.update(&ctx, &candidates, &results).unwrap();
        assert_eq!(model.data_size(), 2);
    }

    #[test]
    fn test_huge_timings_do_not_fail_batch() {
        for reduction in [CostReduction::Median, CostReduction::Mean] {
            let mut model = XgbModel::new(
                Box::new(RandomFeatureExtractor::default()),
                XgbModelConfig {
                    cost_reduction: reduction,
                    ..Default::default()
                },
            )
            .unwrap();
            let (ctx, candidates, mut results) = batch(2);
            results[0] = RunnerResult::success(vec![1e308, 1.7e308]);
            model.update(&ctx, &candidates, &results).unwrap();
            assert_eq!(model.data_size(), 2);
            let group = model.data().get(&ctx.workload_hash()).unwrap();
            assert!(group.costs().iter().all(|c| c.is_finite()));
            assert_eq!(group.min_cost(), 0.11);
        }
    }

    #[test]
    fn test_all_failed_is_noop() {
        let mut model = model(1);
        let (ctx, candidates, _) = batch(3);
        let results = vec![RunnerResult::error("timeout"); 3];
        model.update(&ctx, &candidates, &results).unwrap();
        assert!(model.data().is_empty());
        assert!(!model.is_trained());
    }

    #[test]
    fn test_length_mismatch() {
        let mut model = model(1);
        let (ctx, candidates, results) = batch(3);
        let err = model.update(&ctx, &candidates, &results[..2]).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { .. }));
        assert!(model.data().is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        let mut model = model(1);
        let ctx = TuneContext::default();
        model.update(&ctx, &[], &[]).unwrap();
        assert!(model.predict(&ctx, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_config_validation() {
        let config = XgbModelConfig {
            average_peak_n: 0,
            ..Default::default()
        };
        assert!(XgbModel::new(Box::new(RandomFeatureExtractor::default()), config).is_err());
    }
}
