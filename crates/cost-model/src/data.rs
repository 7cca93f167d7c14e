//! Accumulated training data
//!
//! Measured candidates are grouped by workload hash. Costs are only
//! comparable within a group, so every group keeps its own best cost and
//! training targets are normalized against it.

use crate::error::{Error, Result};
use crate::models::FeatureMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Features and measured costs collected for one workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingGroup {
    pub group_hash: String,
    features: Vec<FeatureMatrix>,
    costs: Vec<f64>,
    min_cost: f64,
}

impl TrainingGroup {
    /// Create a group from its first batch; the batch must be nonempty
    pub fn new(group_hash: String, features: Vec<FeatureMatrix>, costs: Vec<f64>) -> Result<Self> {
        check_batch(&features, &costs)?;
        if costs.is_empty() {
            return Err(Error::LengthMismatch {
                what: "initial group costs",
                expected: 1,
                actual: 0,
            });
        }
        let min_cost = min_of(&costs);
        Ok(Self {
            group_hash,
            features,
            costs,
            min_cost,
        })
    }

    /// Append a batch; existing samples are never touched
    pub fn append(&mut self, features: Vec<FeatureMatrix>, costs: Vec<f64>) -> Result<()> {
        check_batch(&features, &costs)?;
        self.min_cost = self.min_cost.min(min_of(&costs));
        self.features.extend(features);
        self.costs.extend(costs);
        Ok(())
    }

    pub fn features(&self) -> &[FeatureMatrix] {
        &self.features
    }

    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    pub fn min_cost(&self) -> f64 {
        self.min_cost
    }

    /// Number of samples (measured candidates)
    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Total feature rows across all samples
    pub fn num_rows(&self) -> usize {
        self.features.iter().map(|f| f.nrows()).sum()
    }

    /// Training targets `min_cost / cost`, in (0, 1] with the best sample at 1
    pub fn normalized_targets(&self) -> Vec<f64> {
        self.costs.iter().map(|c| self.min_cost / c).collect()
    }
}

fn check_batch(features: &[FeatureMatrix], costs: &[f64]) -> Result<()> {
    if features.len() != costs.len() {
        return Err(Error::LengthMismatch {
            what: "costs",
            expected: features.len(),
            actual: costs.len(),
        });
    }
    if let Some(bad) = costs.iter().find(|c| !c.is_finite() || **c <= 0.0) {
        return Err(Error::InvalidData(format!(
            "costs must be finite and positive, got {}",
            bad
        )));
    }
    Ok(())
}

fn min_of(costs: &[f64]) -> f64 {
    costs.iter().copied().fold(f64::INFINITY, f64::min)
}

/// All training groups of a model, keyed by workload hash
///
/// Iteration order is the key order, which keeps training input identical
/// across save/load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataStore {
    groups: BTreeMap<String, TrainingGroup>,
    data_size: usize,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted groups, recomputing the sample count
    pub fn from_groups(groups: Vec<TrainingGroup>) -> Result<Self> {
        let mut store = Self::new();
        for group in groups {
            if group.features.len() != group.costs.len() {
                return Err(Error::LengthMismatch {
                    what: "persisted group costs",
                    expected: group.features.len(),
                    actual: group.costs.len(),
                });
            }
            store.data_size += group.len();
            if store.groups.insert(group.group_hash.clone(), group).is_some() {
                return Err(Error::InvalidData(
                    "duplicate group hash in persisted data".to_string(),
                ));
            }
        }
        Ok(store)
    }

    /// Add samples to the group for `group_hash`, creating it on first use
    pub fn push(
        &mut self,
        group_hash: &str,
        features: Vec<FeatureMatrix>,
        costs: Vec<f64>,
    ) -> Result<()> {
        let added = costs.len();
        if added == 0 {
            return Ok(());
        }
        let expected = self.num_features().or_else(|| features.first().map(|f| f.ncols()));
        if let (Some(expected), Some(bad)) = (
            expected,
            features.iter().find(|f| Some(f.ncols()) != expected),
        ) {
            return Err(Error::ShapeMismatch(format!(
                "feature matrix has {} columns, training data has {}",
                bad.ncols(),
                expected
            )));
        }
        match self.groups.get_mut(group_hash) {
            Some(group) => group.append(features, costs)?,
            None => {
                let group = TrainingGroup::new(group_hash.to_string(), features, costs)?;
                self.groups.insert(group_hash.to_string(), group);
            }
        }
        self.data_size += added;
        Ok(())
    }

    /// Feature width shared by every stored matrix, `None` while empty
    pub fn num_features(&self) -> Option<usize> {
        self.groups
            .values()
            .flat_map(|g| g.features.first())
            .map(|f| f.ncols())
            .next()
    }

    pub fn get(&self, group_hash: &str) -> Option<&TrainingGroup> {
        self.groups.get(group_hash)
    }

    pub fn groups(&self) -> impl Iterator<Item = &TrainingGroup> {
        self.groups.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TrainingGroup)> {
        self.groups.iter()
    }

    /// Total number of samples across all groups
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_rows(&self) -> usize {
        self.groups.values().map(TrainingGroup::num_rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Flatten every group into aligned (features, normalized targets)
    pub fn training_set(&self) -> (Vec<FeatureMatrix>, Vec<f64>) {
        let mut xs = Vec::with_capacity(self.data_size);
        let mut ys = Vec::with_capacity(self.data_size);
        for group in self.groups.values() {
            xs.extend(group.features.iter().cloned());
            ys.extend(group.normalized_targets());
        }
        (xs, ys)
    }

    pub(crate) fn into_groups(self) -> Vec<TrainingGroup> {
        self.groups.into_values().collect()
    }
}
