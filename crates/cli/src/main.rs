//! Schedule cost model CLI
//!
//! A command-line tool for driving a cost model through a synthetic tuning
//! loop and inspecting saved checkpoints.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{inspect, simulate};
use cost_model::{CostModelConfig, ModelKind};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Schedule cost model CLI
#[derive(Parser)]
#[command(name = "cmodel")]
#[command(author, version, about = "CLI for the schedule tuning cost model", long_about = None)]
pub struct Cli {
    /// Config file (values can also be set via COST_MODEL__* env vars)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a synthetic tuning loop on a matmul workload
    Simulate {
        /// Number of measure-and-update rounds
        #[arg(long, default_value_t = 10)]
        rounds: usize,

        /// Candidates measured per round
        #[arg(long, default_value_t = 10)]
        batch: usize,

        /// Candidates scored after the last round
        #[arg(long, default_value_t = 100)]
        predict: usize,

        /// Save the model here when done
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Override the configured model variant
        #[arg(long, value_parser = parse_model_kind)]
        model: Option<ModelKind>,

        /// Override the number of samples required before training
        #[arg(long)]
        warmup: Option<usize>,

        /// Seed for the synthetic runner
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Show the contents of a saved checkpoint
    Inspect {
        /// Checkpoint file
        checkpoint: PathBuf,
    },
}

fn parse_model_kind(value: &str) -> std::result::Result<ModelKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "random" => Ok(ModelKind::Random),
        "xgb" => Ok(ModelKind::Xgb),
        other => Err(format!("unknown model '{}', expected random or xgb", other)),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config =
        CostModelConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Simulate {
            rounds,
            batch,
            predict,
            checkpoint,
            model,
            warmup,
            seed,
        } => {
            let mut config = config;
            if let Some(kind) = model {
                config.model = kind;
            }
            if let Some(warmup) = warmup {
                config.xgb.num_warmup_samples = warmup;
            }
            let options = simulate::SimulateOptions {
                rounds,
                batch,
                predict,
                checkpoint,
                seed,
            };
            simulate::run(&config, &options, cli.format)?;
        }
        Commands::Inspect { checkpoint } => {
            inspect::run(&config, &checkpoint, cli.format)?;
        }
    }

    Ok(())
}
