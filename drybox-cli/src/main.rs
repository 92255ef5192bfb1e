//! DryBox command-line runner.
//!
//! Couples two adapters through the simulated transport described by a
//! scenario file and writes the run's artifacts (metrics, events, capture,
//! resolved scenario, public keys) into the output directory.
//!
//! Exit codes: 0 success, 2 acceptance-check failure, 3 endpoint error,
//! 4 invalid scenario.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use drybox_adapters::resolve_adapter;
use drybox_domain::Result;

mod config;
mod scenario;

use config::Config;
use scenario::{load_scenario, Overrides};

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    // ---
    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    match execute(&cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn execute(cfg: &Config) -> Result<()> {
    // ---
    let overrides = Overrides {
        seed: cfg.seed,
        tick_ms: cfg.tick_ms,
        left: cfg.left.clone(),
        right: cfg.right.clone(),
    };
    let scenario = load_scenario(&cfg.scenario, &overrides)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?scenario.mode,
        seed = scenario.seed,
        duration_ms = scenario.duration_ms,
        tick_ms = scenario.tick_ms,
        "drybox starting",
    );

    let left = resolve_adapter(&scenario.left.adapter)?;
    let right = resolve_adapter(&scenario.right.adapter)?;

    drybox_kernel::run(&scenario, left, right, &cfg.out, !cfg.no_ui)?;

    info!(out = %cfg.out.display(), "run complete");
    Ok(())
}
