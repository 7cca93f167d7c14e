//! Synthetic tuning loop
//!
//! Proposes random matmul schedules, scores them with the model, "measures"
//! them with a noisy analytic runner and feeds the results back.

use anyhow::{Context, Result};
use colored::Colorize;
use cost_model::{
    AnyCostModel, CostModel, CostModelConfig, MeasureCandidate, RunnerResult, Schedule,
    TuneContext, Workload,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tabled::Tabled;
use tracing::info;

use crate::output::{
    color_trained, format_secs, print_info, print_json, print_success, print_table, OutputFormat,
};

/// Share of synthetic measurements that fail
const FAILURE_RATE: f64 = 0.05;

/// Repeated timings per measurement
const REPEATS: usize = 3;

pub struct SimulateOptions {
    pub rounds: usize,
    pub batch: usize,
    pub predict: usize,
    pub checkpoint: Option<PathBuf>,
    pub seed: u64,
}

#[derive(Debug, Serialize)]
struct RoundSummary {
    round: usize,
    measured: usize,
    failed: usize,
    samples: Option<usize>,
    trained: bool,
    /// Measured cost of the candidate the model ranked first
    top_pick_secs: Option<f64>,
    best_secs: Option<f64>,
    elapsed_ms: u64,
}

#[derive(Tabled)]
struct RoundRow {
    #[tabled(rename = "Round")]
    round: usize,
    #[tabled(rename = "Measured")]
    measured: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Samples")]
    samples: String,
    #[tabled(rename = "Trained")]
    trained: String,
    #[tabled(rename = "Top Pick")]
    top_pick: String,
    #[tabled(rename = "Best So Far")]
    best: String,
    #[tabled(rename = "Elapsed")]
    elapsed: String,
}

impl From<&RoundSummary> for RoundRow {
    fn from(summary: &RoundSummary) -> Self {
        let secs = |v: Option<f64>| v.map(format_secs).unwrap_or_else(|| "-".to_string());
        Self {
            round: summary.round,
            measured: summary.measured,
            failed: summary.failed,
            samples: summary
                .samples
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            trained: color_trained(summary.trained),
            top_pick: secs(summary.top_pick_secs),
            best: secs(summary.best_secs).green().to_string(),
            elapsed: format!("{}ms", summary.elapsed_ms),
        }
    }
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    model: String,
    workload_hash: String,
    rounds: Vec<RoundSummary>,
    predictions: usize,
    finite_predictions: usize,
    checkpoint: Option<PathBuf>,
}

/// Noisy analytic runner over the tile/unroll knobs of a matmul schedule
struct SyntheticRunner {
    rng: ChaCha8Rng,
}

impl SyntheticRunner {
    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Propose a candidate; returns it with its ideal cost
    fn propose(&mut self, workload: &Workload) -> (MeasureCandidate, f64) {
        let tile: i64 = 1 << self.rng.gen_range(0..7u32);
        let unroll: i64 = 1 << self.rng.gen_range(0..3u32);
        let schedule = Schedule::new(workload.clone())
            .with_step(format!("split i by {}", tile))
            .with_step(format!("split j by {}", tile))
            .with_step(format!("unroll k by {}", unroll));
        let tile_penalty = (tile as f64).log2() - 4.0;
        let unroll_penalty = if unroll == 2 { 0.0 } else { 0.2 };
        let ideal = 0.01 * (1.0 + 0.3 * tile_penalty.abs() + unroll_penalty);
        (MeasureCandidate::new(schedule, vec![]), ideal)
    }

    fn measure(&mut self, ideal: f64) -> RunnerResult {
        if self.rng.gen_bool(FAILURE_RATE) {
            return RunnerResult::error("synthetic build failure");
        }
        let secs = (0..REPEATS)
            .map(|_| ideal * self.rng.gen_range(0.95..1.05))
            .collect();
        RunnerResult::success(secs)
    }
}

pub fn run(
    config: &CostModelConfig,
    options: &SimulateOptions,
    format: OutputFormat,
) -> Result<()> {
    let mut model = AnyCostModel::from_config(config).context("Failed to build cost model")?;
    let workload = Workload::matmul(1024, 1024, 1024);
    let context = TuneContext::new(workload.clone());
    let mut runner = SyntheticRunner::new(options.seed);

    info!(
        model = %model.kind(),
        rounds = options.rounds,
        batch = options.batch,
        "Starting simulation"
    );

    let mut summaries = Vec::with_capacity(options.rounds);
    let mut best: Option<f64> = None;
    for round in 0..options.rounds {
        let start = Instant::now();
        let (candidates, ideals): (Vec<_>, Vec<_>) =
            (0..options.batch).map(|_| runner.propose(&workload)).unzip();

        let scores = model
            .predict(&context, &candidates)
            .with_context(|| format!("Prediction failed in round {}", round))?;
        let results: Vec<RunnerResult> =
            ideals.iter().map(|ideal| runner.measure(*ideal)).collect();

        let top_pick_secs = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .and_then(|(i, _)| results[i].cost(config.xgb.cost_reduction));
        for cost in results.iter().filter_map(|r| r.cost(config.xgb.cost_reduction)) {
            best = Some(best.map_or(cost, |b| b.min(cost)));
        }

        model
            .update(&context, &candidates, &results)
            .with_context(|| format!("Update failed in round {}", round))?;

        let xgb = model.as_xgb();
        summaries.push(RoundSummary {
            round,
            measured: results.len(),
            failed: results.iter().filter(|r| r.usable_secs().is_none()).count(),
            samples: xgb.map(|m| m.data_size()),
            trained: xgb.map_or(false, |m| m.is_trained()),
            top_pick_secs,
            best_secs: best,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });
    }

    let (candidates, _): (Vec<_>, Vec<_>) =
        (0..options.predict).map(|_| runner.propose(&workload)).unzip();
    let scores = model
        .predict(&context, &candidates)
        .context("Final prediction failed")?;
    let finite = scores.iter().filter(|s| s.is_finite()).count();

    if let Some(path) = &options.checkpoint {
        model
            .save(path)
            .with_context(|| format!("Failed to save checkpoint to {:?}", path))?;
    }

    let report = SimulationReport {
        model: model.kind().to_string(),
        workload_hash: context.workload_hash(),
        rounds: summaries,
        predictions: scores.len(),
        finite_predictions: finite,
        checkpoint: options.checkpoint.clone(),
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("{}", "Simulation".bold());
            println!("{}", "=".repeat(50));
            println!("Model:                  {}", report.model.cyan());
            println!("Workload:               {}", "matmul 1024x1024x1024".cyan());
            println!();
            let rows: Vec<RoundRow> = report.rounds.iter().map(RoundRow::from).collect();
            print_table(&rows);
            println!();
            print_info(&format!(
                "Scored {} candidates, {} finite",
                report.predictions, report.finite_predictions
            ));
            if let Some(path) = &report.checkpoint {
                print_success(&format!("Checkpoint saved to {}", path.display()));
            }
        }
    }

    Ok(())
}
