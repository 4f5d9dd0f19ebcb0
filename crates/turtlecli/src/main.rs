#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use tracing_subscriber::EnvFilter;
use turtlecli::cli::app::{Cli, Command, RuntimeArgs};
use turtlecli::cli::commands;
use turtlecli::config::{ConfigOverrides, RuntimeConfig};
use turtlecli::errors::{ConfigurationError, LookupError};

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_CONFIGURATION_ERROR: i32 = 2;
const EXIT_LOOKUP_ERROR: i32 = 3;
const EXIT_USAGE_ERROR: i32 = 64;

const LOG_FILTER_ENV: &str = "TURTLECLI_LOG";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    let verbose = cli.runtime.verbose;
    init_tracing(verbose);
    tracing::debug!(command = command_name(&cli.command), "starting");

    match execute(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(error) => {
            let exit_code = classify_runtime_error(&error);
            if verbose {
                eprintln!("turtlecli: {error:#}");
            } else {
                eprintln!("turtlecli: {error}");
            }
            exit_code
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::History(args) => {
            let config = resolve_runtime_config(&cli.runtime)?;
            commands::history::run(&args, &config)
        }
        Command::Report(args) => {
            let config = resolve_runtime_config(&cli.runtime)?;
            commands::report::run(&args, &config)
        }
        Command::Schema(args) => commands::schema::run(&args),
    }
}

fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ConfigurationError>().is_some() {
        EXIT_CONFIGURATION_ERROR
    } else if error.downcast_ref::<LookupError>().is_some() {
        EXIT_LOOKUP_ERROR
    } else {
        EXIT_RUNTIME_FAILURE
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::History(_) => "history",
        Command::Report(_) => "report",
        Command::Schema(_) => "schema",
    }
}

fn resolve_runtime_config(args: &RuntimeArgs) -> Result<RuntimeConfig> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    turtlecli::config::resolve_runtime_config(
        &home_dir,
        &cwd,
        &ConfigOverrides {
            database: args.database.as_deref(),
            science_data_root: args.science_data_root.as_deref(),
            test_data_root: args.test_data_root.as_deref(),
        },
    )
}
