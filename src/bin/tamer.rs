//! Tamer CLI Binary
//!
//! Command-line interface for batched structured-output transformation.

use clap::Parser;
use std::io::IsTerminal;
use std::process;
use tamer::batch::DEBUG_TARGET;
use tamer::cli::{render_error, Cli, Commands, RunContext};
use tamer::config::ConfigLoader;
use tamer::logging::{init_logging, LoggingConfig};
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();
    let color = std::io::stderr().is_terminal();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("Tamer CLI starting");

    let context = match RunContext::new(cli.workspace.clone(), cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            eprintln!("{}", render_error(&e, color));
            process::exit(1);
        }
    };

    match context.execute(&cli.command) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", render_error(&e, color));
            process::exit(1);
        }
    }
}

fn debug_requested(command: &Commands) -> bool {
    match command {
        Commands::Run(args) => args.generation.debug,
        Commands::Object(args) => args.generation.debug,
        Commands::Prompt(_) | Commands::Config { .. } => false,
    }
}

/// Build logging configuration from CLI args, environment, and config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let loaded = ConfigLoader::load_with_file(&cli.workspace, cli.config.as_deref()).ok();
    let config_debug = loaded.as_ref().map(|c| c.batch.debug).unwrap_or(false);
    let mut config = loaded.map(|c| c.logging).unwrap_or_default();

    if cli.quiet {
        config.enabled = false;
    }
    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    }
    if config_debug || debug_requested(&cli.command) {
        config
            .modules
            .insert(DEBUG_TARGET.to_string(), "debug".to_string());
    }

    config
}
