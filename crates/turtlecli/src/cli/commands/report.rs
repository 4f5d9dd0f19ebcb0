use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde_json::{Value, json};
use tracing::info;

use crate::config::RuntimeConfig;
use crate::errors::{ConfigurationError, EntityKind, LookupError};
use crate::models::ResultEnvelope;
use crate::query::SortDirection;
use crate::render;
use crate::report::{AggregateReport, ReportOptions, ReportSortField, build_report};
use crate::store::HistoryStore;
use crate::utils::time::parse_user_datetime;

const COMMAND_NAME: &str = "report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportTarget {
    Observer,
    Operator,
    #[default]
    Both,
}

impl ReportTarget {
    fn kinds(self) -> &'static [EntityKind] {
        match self {
            Self::Observer => &[EntityKind::Observer],
            Self::Operator => &[EntityKind::Operator],
            Self::Both => &[EntityKind::Observer, EntityKind::Operator],
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ReportArgs {
    #[arg(long, value_enum, default_value_t = ReportTarget::default())]
    pub kind: ReportTarget,

    /// Observers that must appear in the report; unknown names are an error.
    #[arg(short = 'o', long, num_args = 1.., value_name = "OBSERVER")]
    pub observers: Option<Vec<String>>,

    /// Operators that must appear in the report; unknown names are an error.
    #[arg(short = 'O', long, num_args = 1.., value_name = "OPERATOR")]
    pub operators: Option<Vec<String>>,

    /// Minimum (inclusive) number of executions.
    #[arg(long, visible_alias = "min-script-executions", value_name = "N")]
    pub min_total_runs: Option<u64>,

    /// Drop entities whose last execution is before this datetime.
    #[arg(long, visible_alias = "min-last-obs-date", value_name = "DATETIME")]
    pub min_last_run: Option<String>,

    #[arg(long, value_enum, default_value_t = ReportSortField::default())]
    pub sort_by: ReportSortField,

    #[arg(long, value_enum, default_value_t = SortDirection::default())]
    pub direction: SortDirection,

    /// Write each table to `<DIR>/{observer|operator}_results.txt`.
    #[arg(long, value_name = "DIR")]
    pub write_table: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl ReportArgs {
    fn options(&self, kind: EntityKind) -> Result<ReportOptions, ConfigurationError> {
        let min_last_run = self
            .min_last_run
            .as_deref()
            .map(|raw| {
                parse_user_datetime(raw).map_err(|error| {
                    ConfigurationError::new(format!(
                        "invalid --min-last-run value `{raw}`: {error}"
                    ))
                })
            })
            .transpose()?;
        let names = match kind {
            EntityKind::Observer => self.observers.clone(),
            EntityKind::Operator => self.operators.clone(),
        };

        Ok(ReportOptions {
            names,
            min_total_runs: self.min_total_runs,
            min_last_run,
            sort: self.sort_by,
            direction: self.direction,
        })
    }
}

pub fn run(args: &ReportArgs, config: &RuntimeConfig) -> Result<()> {
    let reports = match build_reports(args, config) {
        Ok(reports) => reports,
        Err(error) => {
            if let Some(envelope) = args.json.then(|| error_envelope(&error)).flatten() {
                print_envelope(&envelope)?;
            }
            return Err(error);
        }
    };

    if args.json {
        print_envelope(
            &ResultEnvelope::ok(
                COMMAND_NAME,
                Value::Array(reports.iter().map(report_json).collect()),
            )
            .with_meta("reports", json!(reports.len())),
        )?;
    } else {
        for report in &reports {
            println!("{}", render::report_table(report));
            println!();
        }
    }

    if let Some(directory) = &args.write_table {
        let directory = config.resolve_output_path(directory)?;
        std::fs::create_dir_all(&directory).with_context(|| {
            format!("failed to create report directory: {}", directory.display())
        })?;
        for report in &reports {
            let path = directory.join(format!("{}_results.txt", report.kind.as_str()));
            std::fs::write(&path, format!("{}\n", render::report_table(report)))
                .with_context(|| format!("failed to write report table: {}", path.display()))?;
            info!(path = %path.display(), "wrote report table");
        }
    }
    Ok(())
}

fn build_reports(args: &ReportArgs, config: &RuntimeConfig) -> Result<Vec<AggregateReport>> {
    let requests = args
        .kind
        .kinds()
        .iter()
        .map(|kind| Ok((*kind, args.options(*kind)?)))
        .collect::<Result<Vec<_>, ConfigurationError>>()?;

    let store = HistoryStore::open_read_only(&config.database)?;
    let mut reports = Vec::with_capacity(requests.len());
    for (kind, options) in &requests {
        let report = build_report(&store, *kind, options)?;
        info!(
            entity = %kind,
            rows = report.rows.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "aggregate report built"
        );
        reports.push(report);
    }
    Ok(reports)
}

/// Envelope for the failures `--json` callers can act on; other errors only reach stderr.
fn error_envelope(error: &anyhow::Error) -> Option<ResultEnvelope> {
    if let Some(lookup) = error.downcast_ref::<LookupError>() {
        return Some(
            ResultEnvelope::error(COMMAND_NAME, "lookup_error", lookup.to_string())
                .with_error_details(json!({
                    "entity_kind": lookup.entity_kind.as_str(),
                    "missing": lookup.missing,
                })),
        );
    }
    error
        .downcast_ref::<ConfigurationError>()
        .map(|config| ResultEnvelope::error(COMMAND_NAME, "configuration_error", config.to_string()))
}

fn print_envelope(envelope: &ResultEnvelope) -> Result<()> {
    let encoded =
        serde_json::to_string(envelope).context("failed to encode report result envelope")?;
    println!("{encoded}");
    Ok(())
}

fn report_json(report: &AggregateReport) -> Value {
    json!({
        "kind": report.kind.as_str(),
        "duration_ms": report.elapsed.as_millis() as u64,
        "rows": report.rows.iter().map(|row| row.to_json()).collect::<Vec<_>>(),
    })
}
