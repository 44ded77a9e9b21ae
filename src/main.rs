use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

use claude_statusline::app;
use claude_statusline::cli::{Cli, Commands};
use claude_statusline::config::StatusConfig;
use claude_statusline::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("claude-statusline error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let overrides = cli.render.overrides();

    match cli.command {
        Some(Commands::Doctor) => {
            let config = StatusConfig::load()?;
            app::doctor(config, &overrides)
        }
        None => {
            let config = StatusConfig::load().unwrap_or_else(|err| {
                warn!(error = %err, "config unusable; rendering with defaults");
                StatusConfig::from_env()
            });
            app::print_status_line(config, &overrides)?;
            Ok(0)
        }
    }
}
