use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::{Value, json};
use time::PrimitiveDateTime;
use tracing::debug;

use crate::errors::{EntityKind, LookupError};
use crate::query::SortDirection;
use crate::store::{EntityActivity, HistoryStore};
use crate::utils::time::{format_store_timestamp, parse_store_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum ReportSortField {
    Name,
    #[default]
    TotalRuns,
    RunsCompleted,
    UniqueScriptsRun,
    UniqueProjectsRun,
    FirstRun,
    LastRun,
    ActiveDays,
    RunsPerDay,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub name: String,
    pub total_runs: u64,
    pub runs_completed: u64,
    pub unique_scripts_run: u64,
    pub unique_projects_run: u64,
    pub first_run: Option<PrimitiveDateTime>,
    pub last_run: Option<PrimitiveDateTime>,
    /// Whole days between first and last run; `None` without runs.
    pub active_days: Option<i64>,
    /// `None` when `active_days` is zero or undefined.
    pub runs_per_day: Option<f64>,
}

impl AggregateRow {
    fn from_activity(activity: EntityActivity) -> Result<Self> {
        let parse = |raw: Option<String>, label: &str| -> Result<Option<PrimitiveDateTime>> {
            raw.map(|raw| {
                parse_store_timestamp(&raw)
                    .with_context(|| format!("{label} of `{}` is invalid", activity.name))
            })
            .transpose()
        };
        let first_run = parse(activity.first_run.clone(), "first run")?;
        let last_run = parse(activity.last_run.clone(), "last run")?;
        let total_runs = count(activity.total_runs);

        let active_days = match (first_run, last_run) {
            (Some(first), Some(last)) => Some((last - first).whole_days()),
            _ => None,
        };
        let runs_per_day = match active_days {
            Some(days) if days > 0 => Some(total_runs as f64 / days as f64),
            _ => None,
        };

        Ok(Self {
            name: activity.name,
            total_runs,
            runs_completed: count(activity.runs_completed),
            unique_scripts_run: count(activity.unique_scripts_run),
            unique_projects_run: count(activity.unique_projects_run),
            first_run,
            last_run,
            active_days,
            runs_per_day,
        })
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "total_runs": self.total_runs,
            "runs_completed": self.runs_completed,
            "unique_scripts_run": self.unique_scripts_run,
            "unique_projects_run": self.unique_projects_run,
            "first_run": self.first_run.map(format_store_timestamp),
            "last_run": self.last_run.map(format_store_timestamp),
            "active_days": self.active_days,
            "runs_per_day": self.runs_per_day,
        })
    }

    fn compare(&self, other: &Self, field: ReportSortField) -> Ordering {
        match field {
            ReportSortField::Name => self.name.cmp(&other.name),
            ReportSortField::TotalRuns => self.total_runs.cmp(&other.total_runs),
            ReportSortField::RunsCompleted => self.runs_completed.cmp(&other.runs_completed),
            ReportSortField::UniqueScriptsRun => {
                self.unique_scripts_run.cmp(&other.unique_scripts_run)
            }
            ReportSortField::UniqueProjectsRun => {
                self.unique_projects_run.cmp(&other.unique_projects_run)
            }
            ReportSortField::FirstRun => self.first_run.cmp(&other.first_run),
            ReportSortField::LastRun => self.last_run.cmp(&other.last_run),
            ReportSortField::ActiveDays => self.active_days.cmp(&other.active_days),
            ReportSortField::RunsPerDay => match (self.runs_per_day, other.runs_per_day) {
                (Some(left), Some(right)) => left.total_cmp(&right),
                (left, right) => left.is_some().cmp(&right.is_some()),
            },
        }
    }
}

fn count(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Exact names; every one must exist.
    pub names: Option<Vec<String>>,
    pub min_total_runs: Option<u64>,
    pub min_last_run: Option<PrimitiveDateTime>,
    pub sort: ReportSortField,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReport {
    pub kind: EntityKind,
    pub rows: Vec<AggregateRow>,
    pub elapsed: Duration,
}

/// Per-observer or per-operator statistics over the whole history store.
pub fn build_report(
    store: &HistoryStore,
    kind: EntityKind,
    options: &ReportOptions,
) -> Result<AggregateReport> {
    let (activity, elapsed) = store.entity_activity(kind, options.names.as_deref())?;

    if let Some(names) = &options.names {
        let found = activity
            .iter()
            .map(|entity| entity.name.as_str())
            .collect::<BTreeSet<_>>();
        let mut seen = BTreeSet::new();
        let missing = names
            .iter()
            .filter(|name| !found.contains(name.as_str()) && seen.insert(name.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(LookupError {
                entity_kind: kind,
                missing,
            }
            .into());
        }
    }

    let mut rows = activity
        .into_iter()
        .map(AggregateRow::from_activity)
        .collect::<Result<Vec<_>>>()?;
    let before_filters = rows.len();

    if let Some(min_total_runs) = options.min_total_runs {
        rows.retain(|row| row.total_runs >= min_total_runs);
    }
    if let Some(min_last_run) = options.min_last_run {
        rows.retain(|row| row.last_run.is_some_and(|last| last >= min_last_run));
    }

    rows.sort_by(|left, right| {
        let ordering = left.compare(right, options.sort);
        let ordering = match options.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        ordering.then_with(|| left.name.cmp(&right.name))
    });

    debug!(
        entity = %kind,
        entities = before_filters,
        reported = rows.len(),
        "built aggregate report"
    );

    Ok(AggregateReport {
        kind,
        rows,
        elapsed,
    })
}
