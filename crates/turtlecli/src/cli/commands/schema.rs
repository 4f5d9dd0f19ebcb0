use anyhow::{Context, Result};
use clap::Args;

use crate::models::export_json_schema;

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    /// Print on one line instead of pretty-printed.
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

pub fn run(args: &SchemaArgs) -> Result<()> {
    let schema = export_json_schema();
    let encoded = if args.compact {
        serde_json::to_string(&schema)
    } else {
        serde_json::to_string_pretty(&schema)
    }
    .context("failed to encode export JSON schema")?;
    println!("{encoded}");
    Ok(())
}
