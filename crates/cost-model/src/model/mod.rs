//! Cost models
//!
//! A cost model scores candidate schedules so the search can rank them
//! without measuring. Scores are only meaningful relative to other
//! candidates of the same workload: higher means predicted faster.

mod pack_sum;
mod random;
mod xgb;

pub use pack_sum::PackSum;
pub use random::{RandomModel, DEFAULT_MAX_RANGE};
pub use xgb::{XgbModel, XgbModelConfig};

use crate::config::{CostModelConfig, ModelKind};
use crate::error::Result;
use crate::extractor::RandomFeatureExtractor;
use crate::models::{MeasureCandidate, RunnerResult, TuneContext};
use std::path::Path;

/// Score returned for every candidate before the first training
pub const UNTRAINED_SCORE: f64 = 0.0;

/// Learned or baseline predictor of relative candidate quality
pub trait CostModel {
    /// Feed back measured results; `results[i]` belongs to `candidates[i]`
    fn update(
        &mut self,
        context: &TuneContext,
        candidates: &[MeasureCandidate],
        results: &[RunnerResult],
    ) -> Result<()>;

    /// One score per candidate, in input order
    fn predict(&mut self, context: &TuneContext, candidates: &[MeasureCandidate])
        -> Result<Vec<f64>>;

    /// Persist the complete model state
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace the model state with a saved one
    fn load(&mut self, path: &Path) -> Result<()>;
}

/// Cost model variant chosen at construction
pub enum AnyCostModel {
    Random(RandomModel),
    Xgb(XgbModel),
}

impl AnyCostModel {
    /// Build the configured model; the XGB model gets a random extractor
    pub fn from_config(config: &CostModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(match config.model {
            ModelKind::Random => {
                AnyCostModel::Random(RandomModel::new(config.seed, config.max_range)?)
            }
            ModelKind::Xgb => {
                let extractor = RandomFeatureExtractor::new(config.extractor.clone())?;
                AnyCostModel::Xgb(XgbModel::new(Box::new(extractor), config.xgb.clone())?)
            }
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            AnyCostModel::Random(_) => ModelKind::Random,
            AnyCostModel::Xgb(_) => ModelKind::Xgb,
        }
    }

    pub fn as_xgb(&self) -> Option<&XgbModel> {
        match self {
            AnyCostModel::Xgb(model) => Some(model),
            AnyCostModel::Random(_) => None,
        }
    }
}

impl CostModel for AnyCostModel {
    fn update(
        &mut self,
        context: &TuneContext,
        candidates: &[MeasureCandidate],
        results: &[RunnerResult],
    ) -> Result<()> {
        match self {
            AnyCostModel::Random(model) => model.update(context, candidates, results),
            AnyCostModel::Xgb(model) => model.update(context, candidates, results),
        }
    }

    fn predict(
        &mut self,
        context: &TuneContext,
        candidates: &[MeasureCandidate],
    ) -> Result<Vec<f64>> {
        match self {
            AnyCostModel::Random(model) => model.predict(context, candidates),
            AnyCostModel::Xgb(model) => model.predict(context, candidates),
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        match self {
            AnyCostModel::Random(model) => model.save(path),
            AnyCostModel::Xgb(model) => model.save(path),
        }
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        match self {
            AnyCostModel::Random(model) => model.load(path),
            AnyCostModel::Xgb(model) => model.load(path),
        }
    }
}

impl From<RandomModel> for AnyCostModel {
    fn from(model: RandomModel) -> Self {
        AnyCostModel::Random(model)
    }
}

impl From<XgbModel> for AnyCostModel {
    fn from(model: XgbModel) -> Self {
        AnyCostModel::Xgb(model)
    }
}
