//! Core data models shared by the cost models
//!
//! The tuning framework owns the real program and schedule representations;
//! the types here carry just enough of them for the extractor and for
//! grouping candidates by workload.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-candidate feature matrix: one row per sub-unit, fixed column width
pub type FeatureMatrix = Array2<f32>;

/// Structural description of the workload being tuned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    /// Ordered integer parameters (loop extents, tensor shapes, ...)
    pub params: Vec<(String, i64)>,
    /// Free-form body, e.g. the printed IR of the workload
    #[serde(default)]
    pub body: String,
}

impl Workload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: i64) -> Self {
        self.params.push((key.into(), value));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Dense `C[m, n] += A[m, k] * B[k, n]` in float32
    pub fn matmul(m: i64, n: i64, k: i64) -> Self {
        Self::new("matmul")
            .with_param("m", m)
            .with_param("n", n)
            .with_param("k", k)
            .with_body(format!(
                "for i, j, k in grid({m}, {n}, {k}): C[i, j] += A[i, k] * B[k, j]"
            ))
    }
}

/// Handle for the current tuning session
///
/// Opaque to the cost model apart from the workload, which decides the
/// training group a candidate lands in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuneContext {
    pub workload: Option<Workload>,
    pub target: Option<String>,
    pub task_name: Option<String>,
}

impl TuneContext {
    pub fn new(workload: Workload) -> Self {
        Self {
            workload: Some(workload),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Stable grouping key for candidates of this session
    ///
    /// Hex SHA-256 over the canonical JSON of the workload, so the same
    /// workload hashes identically across processes and checkpoints.
    pub fn workload_hash(&self) -> String {
        let canonical = match &self.workload {
            Some(workload) => serde_json::to_vec(workload).unwrap_or_default(),
            None => b"<none>".to_vec(),
        };
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

/// Schedule under evaluation: the workload plus the transformations applied to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub workload: Option<Workload>,
    pub trace: Vec<String>,
}

impl Schedule {
    pub fn new(workload: Workload) -> Self {
        Self {
            workload: Some(workload),
            trace: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.trace.push(step.into());
        self
    }
}

/// Argument description passed alongside a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgInfo {
    pub dtype: String,
    pub shape: Vec<i64>,
}

/// Candidate proposed by the search strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureCandidate {
    pub schedule: Schedule,
    pub args_info: Vec<ArgInfo>,
}

impl MeasureCandidate {
    pub fn new(schedule: Schedule, args_info: Vec<ArgInfo>) -> Self {
        Self {
            schedule,
            args_info,
        }
    }
}

/// Outcome of running one candidate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerResult {
    /// Repeated timing measurements in seconds
    pub run_secs: Option<Vec<f64>>,
    /// Set when the build or run failed
    pub error_msg: Option<String>,
}

impl RunnerResult {
    pub fn success(run_secs: Vec<f64>) -> Self {
        Self {
            run_secs: Some(run_secs),
            error_msg: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            run_secs: None,
            error_msg: Some(msg.into()),
        }
    }

    /// Timings usable for training: no error, nonempty, all finite and positive
    pub fn usable_secs(&self) -> Option<&[f64]> {
        if self.error_msg.is_some() {
            return None;
        }
        let secs = self.run_secs.as_deref()?;
        if secs.is_empty() || secs.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return None;
        }
        Some(secs)
    }

    /// Reduce the timings to one scalar cost, `None` for failed measurements
    /// or a cost that is not finite and positive
    pub fn cost(&self, reduction: CostReduction) -> Option<f64> {
        self.usable_secs()
            .map(|secs| reduction.reduce(secs))
            .filter(|cost| cost.is_finite() && *cost > 0.0)
    }
}

/// How a sequence of repeated timings becomes one cost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostReduction {
    Min,
    #[default]
    Median,
    Mean,
}

impl CostReduction {
    /// Reduce a nonempty slice
    pub fn reduce(self, secs: &[f64]) -> f64 {
        match self {
            CostReduction::Min => secs.iter().copied().fold(f64::INFINITY, f64::min),
            // Running mean; a plain sum overflows for timings near f64::MAX
            CostReduction::Mean => secs
                .iter()
                .enumerate()
                .fold(0.0, |mean, (i, s)| mean + (s - mean) / (i + 1) as f64),
            CostReduction::Median => {
                let mut sorted = secs.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    let (lo, hi) = (sorted[mid - 1], sorted[mid]);
                    lo + (hi - lo) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }
}
