//! Cost model configuration
//!
//! Values come from an optional config file overlaid with `COST_MODEL__*`
//! environment variables, e.g. `COST_MODEL__XGB__NUM_WARMUP_SAMPLES=50`.

use crate::error::{Error, Result};
use crate::extractor::RandomExtractorConfig;
use crate::model::XgbModelConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which cost model to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Random,
    #[default]
    Xgb,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Random => write!(f, "random"),
            ModelKind::Xgb => write!(f, "xgb"),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModelConfig {
    /// Model variant
    #[serde(default)]
    pub model: ModelKind,

    /// Seed for the random model; OS entropy when unset
    #[serde(default)]
    pub seed: Option<u64>,

    /// Upper bound (exclusive) of random model scores
    #[serde(default = "default_max_range")]
    pub max_range: f64,

    /// Feature extractor used by the XGB model
    #[serde(default)]
    pub extractor: RandomExtractorConfig,

    /// XGB model settings
    #[serde(default)]
    pub xgb: XgbModelConfig,
}

fn default_max_range() -> f64 {
    100.0
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::default(),
            seed: None,
            max_range: default_max_range(),
            extractor: RandomExtractorConfig::default(),
            xgb: XgbModelConfig::default(),
        }
    }
}

impl CostModelConfig {
    /// Load from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("COST_MODEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_range.is_finite() && self.max_range > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "max_range must be positive, got {}",
                self.max_range
            )));
        }
        self.xgb.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CostModelConfig::default();
        assert_eq!(config.model, ModelKind::Xgb);
        assert_eq!(config.max_range, 100.0);
        assert_eq!(config.xgb.num_warmup_samples, 100);
        assert_eq!(config.xgb.booster.max_depth, 10);
        assert_eq!(config.extractor.feature_size, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "model = \"random\"\nseed = 7\nmax_range = 10.0\n\n\
             [xgb]\nnum_warmup_samples = 5\n\n\
             [xgb.booster]\neta = 0.3"
        )
        .unwrap();

        let config = CostModelConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.model, ModelKind::Random);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_range, 10.0);
        assert_eq!(config.xgb.num_warmup_samples, 5);
        assert_eq!(config.xgb.booster.eta, 0.3);
        assert_eq!(config.xgb.booster.max_depth, 10);
        assert_eq!(config.xgb.early_stopping_rounds, 50);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("COST_MODEL__XGB__AVERAGE_PEAK_N", "8");
        let config = CostModelConfig::load(None);
        std::env::remove_var("COST_MODEL__XGB__AVERAGE_PEAK_N");
        assert_eq!(config.unwrap().xgb.average_peak_n, 8);
    }

    #[test]
    fn test_rejects_bad_range() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_range = -1.0").unwrap();
        assert!(matches!(
            CostModelConfig::load(Some(file.path())),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = CostModelConfig::load(Some(Path::new("/nonexistent/cost-model.toml")));
        assert!(result.is_err());
    }
}
