//! Random feature extractor
//!
//! Produces uniform random features with a random number of sub-units per
//! candidate. Used to exercise the training pipeline without a real program
//! analysis behind it.

use super::{ExtractorState, FeatureExtractor};
use crate::error::{Error, Result};
use crate::models::{FeatureMatrix, MeasureCandidate, TuneContext};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Default number of feature columns
pub const DEFAULT_FEATURE_SIZE: usize = 30;

/// Default upper bound on rows per candidate
pub const DEFAULT_MAX_BLOCK_NUM: usize = 5;

/// Configuration for [`RandomFeatureExtractor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomExtractorConfig {
    /// Width of every feature row
    pub feature_size: usize,
    /// Each candidate gets between 1 and this many rows
    pub max_block_num: usize,
    pub seed: u64,
}

impl Default for RandomExtractorConfig {
    fn default() -> Self {
        Self {
            feature_size: DEFAULT_FEATURE_SIZE,
            max_block_num: DEFAULT_MAX_BLOCK_NUM,
            seed: 0,
        }
    }
}

/// Extractor drawing features from a seeded generator
pub struct RandomFeatureExtractor {
    feature_size: usize,
    max_block_num: usize,
    rng: ChaCha8Rng,
}

impl RandomFeatureExtractor {
    pub fn new(config: RandomExtractorConfig) -> Result<Self> {
        if config.max_block_num < 1 {
            return Err(Error::InvalidConfig(format!(
                "max_block_num must be at least 1, got {}",
                config.max_block_num
            )));
        }
        if config.feature_size < 1 {
            return Err(Error::InvalidConfig(
                "feature_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            feature_size: config.feature_size,
            max_block_num: config.max_block_num,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
        })
    }

    pub fn feature_size(&self) -> usize {
        self.feature_size
    }

    pub fn max_block_num(&self) -> usize {
        self.max_block_num
    }
}

impl Default for RandomFeatureExtractor {
    fn default() -> Self {
        Self {
            feature_size: DEFAULT_FEATURE_SIZE,
            max_block_num: DEFAULT_MAX_BLOCK_NUM,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }
}

impl FeatureExtractor for RandomFeatureExtractor {
    fn extract_from(
        &mut self,
        _context: &TuneContext,
        candidates: &[MeasureCandidate],
    ) -> Result<Vec<FeatureMatrix>> {
        let mut matrices = Vec::with_capacity(candidates.len());
        for _ in candidates {
            let rows = self.rng.gen_range(1..=self.max_block_num);
            let rng = &mut self.rng;
            matrices.push(Array2::from_shape_fn((rows, self.feature_size), |_| {
                rng.gen::<f32>()
            }));
        }
        Ok(matrices)
    }

    fn random_state(&self) -> ExtractorState {
        // Serializing a ChaCha state into a Vec cannot fail
        ExtractorState(bincode::serialize(&self.rng).unwrap_or_default())
    }

    fn set_random_state(&mut self, state: ExtractorState) -> Result<()> {
        self.rng = bincode::deserialize(&state.0)?;
        Ok(())
    }
}
