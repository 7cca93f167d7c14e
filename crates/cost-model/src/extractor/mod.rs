//! Feature extraction contract
//!
//! The extractor turns candidates into fixed-width feature matrices. Its
//! internals belong to the tuning framework; the cost model only relies on
//! the contract below, including an explicit random state so checkpoints can
//! reproduce future extractions.

mod random;

pub use random::{RandomExtractorConfig, RandomFeatureExtractor};

use crate::error::Result;
use crate::models::{FeatureMatrix, MeasureCandidate, TuneContext};
use serde::{Deserialize, Serialize};

/// Serialized random state of an extractor
///
/// Deterministic extractors report an empty state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorState(pub Vec<u8>);

impl ExtractorState {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Maps candidates to one feature matrix each, in input order
pub trait FeatureExtractor: Send {
    /// Extract features for every candidate
    fn extract_from(
        &mut self,
        context: &TuneContext,
        candidates: &[MeasureCandidate],
    ) -> Result<Vec<FeatureMatrix>>;

    /// Snapshot of the internal random state
    fn random_state(&self) -> ExtractorState;

    /// Restore a snapshot taken with [`FeatureExtractor::random_state`]
    fn set_random_state(&mut self, state: ExtractorState) -> Result<()>;
}
