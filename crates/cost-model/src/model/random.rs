//! Baseline model that scores candidates at random

use super::CostModel;
use crate::checkpoint::{self, CheckpointKind};
use crate::error::{Error, Result};
use crate::models::{MeasureCandidate, RunnerResult, TuneContext};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default upper bound of random scores
pub const DEFAULT_MAX_RANGE: f64 = 100.0;

#[derive(Serialize, Deserialize)]
struct RandomCheckpoint {
    max_range: f64,
    rng: ChaCha8Rng,
}

/// Uniform scores in `[0, max_range)`, independent of the candidates
#[derive(Debug, Clone)]
pub struct RandomModel {
    rng: ChaCha8Rng,
    max_range: f64,
}

impl RandomModel {
    /// `seed: None` draws the seed from OS entropy
    pub fn new(seed: Option<u64>, max_range: f64) -> Result<Self> {
        if !(max_range.is_finite() && max_range > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "max_range must be positive, got {}",
                max_range
            )));
        }
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self { rng, max_range })
    }

    /// Restore a model saved with [`CostModel::save`]
    pub fn from_checkpoint(path: impl AsRef<Path>) -> Result<Self> {
        let mut model = Self::new(Some(0), DEFAULT_MAX_RANGE)?;
        model.load(path.as_ref())?;
        Ok(model)
    }

    pub fn max_range(&self) -> f64 {
        self.max_range
    }
}

impl Default for RandomModel {
    fn default() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            max_range: DEFAULT_MAX_RANGE,
        }
    }
}

impl CostModel for RandomModel {
    fn update(
        &mut self,
        _context: &TuneContext,
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
        Ok(())
    }

    fn predict(
        &mut self,
        _context: &TuneContext,
        candidates: &[MeasureCandidate],
    ) -> Result<Vec<f64>> {
        Ok((0..candidates.len())
            .map(|_| self.rng.gen_range(0.0..self.max_range))
            .collect())
    }

    fn save(&self, path: &Path) -> Result<()> {
        checkpoint::save(
            path,
            CheckpointKind::Random,
            &RandomCheckpoint {
                max_range: self.max_range,
                rng: self.rng.clone(),
            },
        )
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let state: RandomCheckpoint = checkpoint::load(path, CheckpointKind::Random)?;
        if !(state.max_range.is_finite() && state.max_range > 0.0) {
            return Err(Error::integrity(path, "max_range must be positive"));
        }
        self.rng = state.rng;
        self.max_range = state.max_range;
        debug!(path = %path.display(), max_range = self.max_range, "Random model restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Schedule, Workload};
    use tempfile::TempDir;

    fn candidates(n: usize) -> Vec<MeasureCandidate> {
        (0..n)
            .map(|_| MeasureCandidate::new(Schedule::new(Workload::matmul(8, 8, 8)), vec![]))
            .collect()
    }

    #[test]
    fn test_same_seed_same_scores() {
        let ctx = TuneContext::default();
        let mut a = RandomModel::new(Some(100), DEFAULT_MAX_RANGE).unwrap();
        let mut b = RandomModel::new(Some(100), DEFAULT_MAX_RANGE).unwrap();
        assert_eq!(
            a.predict(&ctx, &candidates(10)).unwrap(),
            b.predict(&ctx, &candidates(10)).unwrap()
        );
    }

    #[test]
    fn test_scores_in_range() {
        let mut model = RandomModel::new(Some(3), 5.0).unwrap();
        let scores = model.predict(&TuneContext::default(), &candidates(500)).unwrap();
        assert!(scores.iter().all(|s| (0.0..5.0).contains(s)));
    }

    #[test]
    fn test_update_is_noop() {
        let ctx = TuneContext::default();
        let mut a = RandomModel::new(Some(1), DEFAULT_MAX_RANGE).unwrap();
        let mut b = a.clone();
        let results = [RunnerResult::success(vec![1.0]), RunnerResult::error("x")];
        a.update(&ctx, &candidates(2), &results).unwrap();
        assert_eq!(
            a.predict(&ctx, &candidates(3)).unwrap(),
            b.predict(&ctx, &candidates(3)).unwrap()
        );
        assert!(a.update(&ctx, &candidates(2), &[]).is_err());
    }

    #[test]
    fn test_checkpoint_restores_generator() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("random.ckpt");
        let ctx = TuneContext::default();

        let mut model = RandomModel::new(Some(42), 10.0).unwrap();
        model.predict(&ctx, &candidates(4)).unwrap();
        model.save(&path).unwrap();
        let expected = model.predict(&ctx, &candidates(8)).unwrap();

        let mut restored = RandomModel::from_checkpoint(&path).unwrap();
        assert_eq!(restored.max_range(), 10.0);
        assert_eq!(restored.predict(&ctx, &candidates(8)).unwrap(), expected);
    }

    #[test]
    fn test_rejects_bad_range() {
        assert!(RandomModel::new(Some(0), 0.0).is_err());
        assert!(RandomModel::new(Some(0), f64::NAN).is_err());
    }
}
