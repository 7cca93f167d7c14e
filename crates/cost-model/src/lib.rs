//! Learned cost model for schedule tuning
//!
//! This crate provides:
//! - The [`CostModel`] trait with a random baseline and a boosted-tree model
//! - Per-workload training data with cost normalization
//! - A gradient-boosting library with custom objectives and early stopping
//! - Checksummed checkpoints, configuration and Prometheus metrics

pub mod booster;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod extractor;
pub mod model;
pub mod models;
pub mod observability;

pub use config::{CostModelConfig, ModelKind};
pub use data::{DataStore, TrainingGroup};
pub use error::{Error, Result};
pub use extractor::{
    ExtractorState, FeatureExtractor, RandomExtractorConfig, RandomFeatureExtractor,
};
pub use model::{
    AnyCostModel, CostModel, PackSum, RandomModel, XgbModel, XgbModelConfig, UNTRAINED_SCORE,
};
pub use models::*;
pub use observability::CostModelMetrics;
