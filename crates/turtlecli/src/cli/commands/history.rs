use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use time::PrimitiveDateTime;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::errors::ConfigurationError;
use crate::models::{ExecutionState, ExportRecord, ResultEnvelope};
use crate::query::{
    FilterCriteria, MatchMode, QueryContext, QuerySpec, SortDirection, SortField,
    SortSpec, TimeOptions, TimeUnit,
};
use crate::render::{self, ReportKind};
use crate::scanlog::ArchiveScanLogSource;
use crate::store::{HistoryStore, QueryOutcome};
use crate::utils::time::{now_utc, parse_user_datetime};

const COMMAND_NAME: &str = "history";

#[derive(Debug, Clone, Args)]
pub struct HistoryArgs {
    /// Project name(s); with --fuzzy, loosely matched and narrowed to session times.
    #[arg(long, num_args = 1.., value_name = "PROJECT")]
    pub projects: Vec<String>,

    /// Script name(s). Script names are not unique across projects.
    #[arg(long, num_args = 1.., value_name = "SCRIPT")]
    pub scripts: Vec<String>,

    #[arg(long, num_args = 1.., value_name = "OBSERVER")]
    pub observers: Vec<String>,

    #[arg(long, num_args = 1.., value_name = "OPERATOR")]
    pub operators: Vec<String>,

    #[arg(long = "state", value_enum, num_args = 1.., value_name = "STATE")]
    pub states: Vec<ExecutionState>,

    /// Instant(s) to search around; see --buffer.
    #[arg(long = "time", num_args = 1.., value_name = "DATETIME")]
    pub times: Vec<String>,

    /// Half-width of the window around each --time, in --unit (default 15 minutes).
    #[arg(short = 'B', long, value_name = "N", allow_negative_numbers = true)]
    pub buffer: Option<f64>,

    /// Only executions within the last N --unit.
    #[arg(short = 'l', long, value_name = "N", allow_negative_numbers = true)]
    pub last: Option<f64>,

    #[arg(short = 'a', long, visible_alias = "start", value_name = "DATETIME")]
    pub after: Option<String>,

    #[arg(short = 'b', long, visible_alias = "end", value_name = "DATETIME")]
    pub before: Option<String>,

    #[arg(short = 'u', long, value_enum, default_value_t = TimeUnit::default())]
    pub unit: TimeUnit,

    /// Substring(s) searched for in executed scripts (regexes with --regex).
    #[arg(long, num_args = 1.., value_name = "TERM")]
    pub search_scripts: Vec<String>,

    /// Substring(s) searched for in execution logs (regexes with --regex).
    #[arg(long, num_args = 1.., value_name = "TERM")]
    pub search_logs: Vec<String>,

    /// `key=value` assignment(s) searched for in executed scripts; any may match.
    #[arg(long, num_args = 1.., value_name = "KEY=VALUE")]
    pub keywords: Vec<String>,

    /// Case-insensitive substring matching.
    #[arg(long, default_value_t = false)]
    pub fuzzy: bool,

    /// Case-insensitive regular expression matching.
    #[arg(long, default_value_t = false)]
    pub regex: bool,

    /// Case-insensitive whole-value matching (the default).
    #[arg(long, default_value_t = false)]
    pub exact: bool,

    #[arg(short = 'o', long, value_enum, default_value_t = SortField::default())]
    pub order_by: SortField,

    #[arg(long, value_enum, default_value_t = SortDirection::default())]
    pub direction: SortDirection,

    /// Maximum rows to return; 0 returns every match.
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    #[arg(long, default_value_t = false)]
    pub show_sql: bool,

    #[arg(
        long,
        default_value_t = false,
        conflicts_with_all = ["show_scripts", "show_logs", "show_diffs", "show_sql"]
    )]
    pub json: bool,

    #[arg(long, default_value_t = false)]
    pub show_scripts: bool,

    #[arg(long, visible_alias = "logs", default_value_t = false)]
    pub show_logs: bool,

    #[arg(long, visible_alias = "diff", default_value_t = false)]
    pub show_diffs: bool,

    #[arg(long, value_name = "DIR")]
    pub save_scripts: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub save_logs: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub save_diffs: Option<PathBuf>,

    /// Write the returned rows as JSON lines.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Replay the returned executions, oldest first, as commits in a git repository at DIR.
    #[arg(long, value_name = "DIR")]
    pub gitify: Option<PathBuf>,

    /// With --gitify, commit each execution's log next to its script.
    #[arg(long, requires = "gitify", default_value_t = false)]
    pub include_log: bool,
}

impl HistoryArgs {
    /// Converts flags to criteria; any invalid combination is a configuration error.
    pub fn criteria(&self) -> Result<FilterCriteria, ConfigurationError> {
        let mode = MatchMode::from_flags(self.exact, self.fuzzy, self.regex)?;
        let instants = self
            .times
            .iter()
            .map(|raw| parse_datetime_flag("--time", raw))
            .collect::<Result<Vec<_>, _>>()?;
        let after = self
            .after
            .as_deref()
            .map(|raw| parse_datetime_flag("--after", raw))
            .transpose()?;
        let before = self
            .before
            .as_deref()
            .map(|raw| parse_datetime_flag("--before", raw))
            .transpose()?;

        Ok(FilterCriteria {
            projects: self.projects.clone(),
            scripts: self.scripts.clone(),
            observers: self.observers.clone(),
            operators: self.operators.clone(),
            states: self.states.clone(),
            time: TimeOptions {
                instants,
                buffer: self.buffer,
                last: self.last,
                after,
                before,
                unit: self.unit,
            },
            search_scripts: self.search_scripts.clone(),
            search_logs: self.search_logs.clone(),
            keywords: self.keywords.clone(),
            mode,
            sort: SortSpec {
                field: self.order_by,
                direction: self.direction,
            },
            limit: self.limit,
        })
    }
}

fn parse_datetime_flag(flag: &str, raw: &str) -> Result<PrimitiveDateTime, ConfigurationError> {
    parse_user_datetime(raw)
        .map_err(|error| ConfigurationError::new(format!("invalid {flag} value `{raw}`: {error}")))
}

pub fn run(args: &HistoryArgs, config: &RuntimeConfig) -> Result<()> {
    let scan_logs = ArchiveScanLogSource::new(&config.science_data_root, &config.test_data_root);
    let context = QueryContext::new(&scan_logs, now_utc());

    // Every option error surfaces here, before the database is opened.
    let spec = match args
        .criteria()
        .and_then(|criteria| context.compose(&criteria))
    {
        Ok(spec) => spec,
        Err(error) => {
            if args.json {
                print_envelope(&ResultEnvelope::error(
                    COMMAND_NAME,
                    "configuration_error",
                    error.to_string(),
                ))?;
            }
            return Err(error.into());
        }
    };

    let store = HistoryStore::open_read_only(&config.database)?;
    let outcome = context.execute(&store, &spec)?;
    info!(
        matched = outcome.matched_count,
        returned = outcome.records.len(),
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "history query complete"
    );

    if args.json {
        print_envelope(&history_envelope(&spec, &outcome))?;
    } else {
        print_results(args, &spec, &outcome)?;
    }

    save_outputs(args, config, &outcome)
}

fn history_envelope(spec: &QuerySpec, outcome: &QueryOutcome) -> ResultEnvelope {
    let records = outcome
        .records
        .iter()
        .map(ExportRecord::from)
        .collect::<Vec<_>>();
    let mut envelope = ResultEnvelope::ok(
        COMMAND_NAME,
        json!({
            "description": spec.describe(),
            "records": records,
        }),
    )
    .with_meta("matched_count", json!(outcome.matched_count))
    .with_meta("row_count", json!(outcome.records.len()))
    .with_meta("limit", json!(spec.limit))
    .with_meta("duration_ms", json!(outcome.elapsed.as_millis() as u64))
    .with_meta("sql", json!(outcome.sql));

    if outcome.records.is_empty() {
        envelope = envelope.with_warning("no_results", format!("No scripts found {}", spec.describe()));
        if spec.mode != MatchMode::Fuzzy {
            envelope = envelope.with_warning_details(json!({
                "mode": spec.mode.as_str(),
                "hint": "retry with --fuzzy",
            }));
        }
    }
    envelope
}

fn print_envelope(envelope: &ResultEnvelope) -> Result<()> {
    let encoded =
        serde_json::to_string(envelope).context("failed to encode history result envelope")?;
    println!("{encoded}");
    Ok(())
}

fn print_results(args: &HistoryArgs, spec: &QuerySpec, outcome: &QueryOutcome) -> Result<()> {
    if args.show_sql {
        println!("Executing query:");
        println!("{}", outcome.sql.trim());
    }

    if outcome.records.is_empty() {
        println!("No scripts found {}", spec.describe());
        if spec.mode != MatchMode::Fuzzy {
            println!("Try again with --fuzzy for case-insensitive, partial matching");
        }
        println!();
        return Ok(());
    }

    println!("Displaying scripts {}", spec.describe());
    println!("{}", render::history_table(&outcome.records));
    println!(
        "{} of {} matching executions ({} ms)",
        outcome.records.len(),
        outcome.matched_count,
        outcome.elapsed.as_millis()
    );
    println!();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if args.show_scripts {
        render::print_report(&mut out, ReportKind::Script, &outcome.records)?;
    }
    if args.show_diffs {
        render::reports::warn_on_mixed_scripts(&outcome.records);
        render::print_report(&mut out, ReportKind::Diff, &outcome.records)?;
    }
    if args.show_logs {
        render::print_report(&mut out, ReportKind::Log, &outcome.records)?;
    }
    out.flush().context("failed to flush report output")
}

fn save_outputs(args: &HistoryArgs, config: &RuntimeConfig, outcome: &QueryOutcome) -> Result<()> {
    let saves = [
        (&args.save_scripts, ReportKind::Script),
        (&args.save_logs, ReportKind::Log),
        (&args.save_diffs, ReportKind::Diff),
    ];
    for (directory, kind) in saves {
        let Some(directory) = directory else {
            continue;
        };
        let directory = config.resolve_output_path(directory)?;
        if kind == ReportKind::Diff {
            render::reports::warn_on_mixed_scripts(&outcome.records);
        }
        let written = render::save_report(&directory, kind, &outcome.records)?;
        info!(
            report = kind.suffix(),
            files = written.len(),
            directory = %directory.display(),
            "saved reports"
        );
    }

    if let Some(path) = &args.export {
        let path = config.resolve_output_path(path)?;
        let rows = render::write_export_jsonl(&path, &outcome.records)?;
        info!(rows, path = %path.display(), "exported history rows");
    }

    if let Some(directory) = &args.gitify {
        let directory = config.resolve_output_path(directory)?;
        render::gitify(&directory, &outcome.records, args.include_log)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use time::macros::datetime;

    use crate::cli::app::{Cli, Command};
    use crate::models::ExecutionState;
    use crate::query::{MatchMode, SortDirection, SortField, TimeUnit};

    fn history_args(argv: &[&str]) -> super::HistoryArgs {
        let cli = Cli::try_parse_from(
            std::iter::once("turtlecli")
                .chain(std::iter::once("history"))
                .chain(argv.iter().copied()),
        )
        .expect("arguments should parse");
        match cli.command {
            Command::History(args) => *args,
            other => panic!("expected history command, got {other:?}"),
        }
    }

    #[test]
    fn flags_map_onto_criteria() {
        let args = history_args(&[
            "--projects",
            "AGBT19A_453",
            "GBT18B_001",
            "--state",
            "completed",
            "in_progress",
            "--after",
            "2019-01-01",
            "-u",
            "days",
            "--keywords",
            "foo=bar",
            "--fuzzy",
            "-o",
            "observer",
            "--direction",
            "ascending",
            "--limit",
            "5",
        ]);
        let criteria = args.criteria().expect("criteria should build");

        assert_eq!(criteria.projects.len(), 2);
        assert_eq!(
            criteria.states,
            vec![ExecutionState::Completed, ExecutionState::InProgress]
        );
        assert_eq!(criteria.time.after, Some(datetime!(2019-01-01 00:00:00)));
        assert_eq!(criteria.time.unit, TimeUnit::Days);
        assert_eq!(criteria.mode, MatchMode::Fuzzy);
        assert_eq!(criteria.sort.field, SortField::Observer);
        assert_eq!(criteria.sort.direction, SortDirection::Ascending);
        assert_eq!(criteria.limit, 5);
    }

    #[test]
    fn defaults_sort_by_datetime_descending_without_limit() {
        let criteria = history_args(&[]).criteria().expect("criteria should build");
        assert_eq!(criteria.mode, MatchMode::Exact);
        assert_eq!(criteria.sort.field, SortField::Datetime);
        assert_eq!(criteria.sort.direction, SortDirection::Descending);
        assert_eq!(criteria.limit, 0);
        assert!(criteria.time.is_empty());
    }

    #[test]
    fn unparseable_datetimes_are_configuration_errors() {
        let err = history_args(&["--time", "yesterday-ish"])
            .criteria()
            .expect_err("bad datetime must fail");
        assert!(err.message.contains("invalid --time value"));
    }

    #[test]
    fn fuzzy_and_regex_together_are_rejected() {
        let err = history_args(&["--fuzzy", "--regex"])
            .criteria()
            .expect_err("conflicting modes must fail");
        assert!(err.message.contains("mutually exclusive"));
    }

    #[test]
    fn json_output_conflicts_with_printed_reports() {
        let parsed = Cli::try_parse_from(["turtlecli", "history", "--json", "--show-logs"]);
        assert!(parsed.is_err());
    }
}
