use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{history::HistoryArgs, report::ReportArgs, schema::SchemaArgs};

#[derive(Debug, Parser)]
#[command(
    name = "turtlecli",
    version,
    about = "Query and report on telescope script execution history"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// History database to query (opened read-only).
    #[arg(long, global = true, env = "TURTLECLI_DATABASE", value_name = "PATH")]
    pub database: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    /// Archive searched for science project scan logs.
    #[arg(long, global = true, value_name = "PATH")]
    pub science_data_root: Option<PathBuf>,

    /// Archive searched for test project scan logs.
    #[arg(long, global = true, value_name = "PATH")]
    pub test_data_root: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search script execution history.
    History(Box<HistoryArgs>),
    /// Aggregate activity per observer and/or operator.
    Report(ReportArgs),
    /// Print the JSON Schema of exported execution records.
    Schema(SchemaArgs),
}
