//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// HLOD streaming demo command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "hlod-demo", about = "HLOD streaming demo")]
pub struct CliArgs {
    /// Maximum loads dispatched to the provider at once.
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Request priority used by the controller (lower is sooner).
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i32>,

    /// Number of simulated nodes.
    #[arg(long)]
    pub nodes: Option<u32>,

    /// Number of simulation ticks.
    #[arg(long)]
    pub ticks: Option<u32>,

    /// Distance below which nodes switch to their high representation.
    #[arg(long)]
    pub switch_distance: Option<f32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(n) = args.max_in_flight {
            self.scheduler.max_in_flight = n;
        }
        if let Some(p) = args.priority {
            self.controller.priority = p;
        }
        if let Some(n) = args.nodes {
            self.demo.node_count = n;
        }
        if let Some(t) = args.ticks {
            self.demo.ticks = t;
        }
        if let Some(d) = args.switch_distance {
            self.demo.switch_distance = d;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
