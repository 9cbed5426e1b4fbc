//! Command-line harness for the cartography engine.

use clap::Parser;
use std::process;
use tracing::{error, Level};

mod backends;
mod cli;
mod commands;
mod config;
mod error;
mod output;

use cli::{Cli, Commands};
use config::CartctlConfig;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let log_level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(log_level).with_target(false).init();

    let config = match CartctlConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            process::exit(1);
        }
    };
    let config = config.with_overrides(&args);
    let format = args.format.unwrap_or_else(|| config.default_format.into());

    let result = run(args.command, &config, format).await;

    if let Err(e) = result {
        error!("command failed: {e}");
        process::exit(1);
    }
}

async fn run(command: Commands, config: &CartctlConfig, format: cli::OutputFormat) -> error::CliResult<()> {
    match command {
        Commands::Apply { map, context, out } => {
            let dispatcher = build_dispatcher(config)?;
            let orchestrator = cartography_engine::orchestrator::MapUpdateOrchestrator::new(dispatcher);
            commands::apply::handle_apply(&orchestrator, &map, &context, &out).await
        }
        Commands::Query { map, from, to } => commands::query::handle_query(&map, &from, &to, format),
        Commands::Inspect { map, node } => commands::inspect::handle_inspect(&map, node.as_deref(), format),
        Commands::Health => commands::health::handle_health(config),
    }
}

fn build_dispatcher(config: &CartctlConfig) -> error::CliResult<cartography_engine::Dispatcher> {
    let backends = backends::build_backends(&config.models)?;
    let rate_limiter = std::sync::Arc::new(cartography_engine::RateLimiter::new());
    Ok(cartography_engine::Dispatcher::new(backends, rate_limiter))
}
