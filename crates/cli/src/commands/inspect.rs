//! Checkpoint inspection

use anyhow::{Context, Result};
use colored::Colorize;
use cost_model::checkpoint::{self, CheckpointKind};
use cost_model::{CostModelConfig, RandomFeatureExtractor, RandomModel, XgbModel};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_trained, format_secs, print_json, print_table, print_warning, short_hash, OutputFormat,
};

#[derive(Debug, Serialize)]
struct GroupSummary {
    group_hash: String,
    samples: usize,
    rows: usize,
    min_cost_secs: f64,
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Workload")]
    hash: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Rows")]
    rows: usize,
    #[tabled(rename = "Min Cost")]
    min_cost: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum CheckpointSummary {
    Random {
        saved_at: String,
        checksum: String,
        max_range: f64,
    },
    Xgb {
        saved_at: String,
        checksum: String,
        data_size: usize,
        trained: bool,
        trees: Option<usize>,
        groups: Vec<GroupSummary>,
    },
}

pub fn run(config: &CostModelConfig, path: &Path, format: OutputFormat) -> Result<()> {
    let envelope = checkpoint::read_envelope(path)
        .with_context(|| format!("Failed to read checkpoint {:?}", path))?;
    let saved_at = envelope.saved_at.to_rfc3339();

    let summary = match envelope.kind {
        CheckpointKind::Random => {
            let model = RandomModel::from_checkpoint(path)?;
            CheckpointSummary::Random {
                saved_at,
                checksum: envelope.checksum,
                max_range: model.max_range(),
            }
        }
        CheckpointKind::Xgb => {
            // Loading restores the extractor state, so its configuration is irrelevant here
            let model = XgbModel::from_checkpoint(
                Box::new(RandomFeatureExtractor::default()),
                config.xgb.clone(),
                path,
            )?;
            let groups = model
                .data()
                .groups()
                .map(|g| GroupSummary {
                    group_hash: g.group_hash.clone(),
                    samples: g.len(),
                    rows: g.num_rows(),
                    min_cost_secs: g.min_cost(),
                })
                .collect();
            CheckpointSummary::Xgb {
                saved_at,
                checksum: envelope.checksum,
                data_size: model.data_size(),
                trained: model.is_trained(),
                trees: model.booster().map(|b| b.num_trees()),
                groups,
            }
        }
    };

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => print_summary(path, &summary),
    }
    Ok(())
}

fn print_summary(path: &Path, summary: &CheckpointSummary) {
    println!("{}", "Checkpoint".bold());
    println!("{}", "=".repeat(50));
    println!("Path:                   {}", path.display().to_string().cyan());

    match summary {
        CheckpointSummary::Random {
            saved_at,
            checksum,
            max_range,
        } => {
            println!("Kind:                   {}", "random".cyan());
            println!("Saved:                  {}", saved_at);
            println!("Checksum:               {}", short_hash(checksum));
            println!("Max range:              {}", max_range);
        }
        CheckpointSummary::Xgb {
            saved_at,
            checksum,
            data_size,
            trained,
            trees,
            groups,
        } => {
            println!("Kind:                   {}", "xgb".cyan());
            println!("Saved:                  {}", saved_at);
            println!("Checksum:               {}", short_hash(checksum));
            println!("Samples:                {}", data_size);
            println!("Trained:                {}", color_trained(*trained));
            if let Some(trees) = trees {
                println!("Trees:                  {}", trees);
            }
            println!();

            let rows: Vec<GroupRow> = groups
                .iter()
                .map(|g| GroupRow {
                    hash: short_hash(&g.group_hash).to_string(),
                    samples: g.samples,
                    rows: g.rows,
                    min_cost: format_secs(g.min_cost_secs),
                })
                .collect();
            print_table(&rows);

            if !trained {
                println!();
                print_warning(
                    "Model has not reached its warm-up threshold; predictions are neutral",
                );
            }
        }
    }
}
