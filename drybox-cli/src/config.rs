//! CLI configuration for the `drybox` runner.
//!
//! Usage:
//!   drybox --scenario scenarios/pingpong.yaml --out runs/smoke
//!   drybox --scenario s.yaml --left pingpong --right pingpong --out runs/a --seed 42 --no-ui

use std::path::PathBuf;

use clap::Parser;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "drybox", about = "DryBox deterministic peer test bench")]
pub struct Config {
    // ---
    /// YAML scenario path.
    #[arg(long)]
    pub scenario: PathBuf,

    /// Left adapter spec `name[:Class]`. Overrides the scenario's
    /// `left.adapter`; absent class defaults to `Adapter`.
    #[arg(long)]
    pub left: Option<String>,

    /// Right adapter spec `name[:Class]`. Overrides the scenario's
    /// `right.adapter`.
    #[arg(long)]
    pub right: Option<String>,

    /// Output directory for this run's artifacts.
    #[arg(long)]
    pub out: PathBuf,

    /// Logical tick override in milliseconds (default 20, from the
    /// scenario when present).
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Master seed override. Takes precedence over the scenario's seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Suppress the once-per-second progress lines.
    #[arg(long)]
    pub no_ui: bool,
}
