pub mod export;
pub mod gitify;
pub mod reports;

use comfy_table::{ContentArrangement, Table};

use crate::models::ExecutionRecord;
use crate::report::AggregateReport;
use crate::utils::time::format_store_timestamp;

pub use export::write_export_jsonl;
pub use gitify::{GitifySummary, gitify};
pub use reports::{ReportItem, ReportKind, diff_scripts, print_report, save_report};

pub const HISTORY_TABLE_HEADERS: [&str; 6] = [
    "Executed",
    "Project Name",
    "Script Name",
    "Observer",
    "Operator",
    "State",
];

pub const REPORT_TABLE_HEADERS: [&str; 9] = [
    "name",
    "total_runs",
    "runs_completed",
    "unique_scripts_run",
    "unique_projects_run",
    "first_run",
    "last_run",
    "active_days",
    "runs_per_day",
];

#[must_use]
pub fn history_table(records: &[ExecutionRecord]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(HISTORY_TABLE_HEADERS);
    for record in records {
        table.add_row(vec![
            format_store_timestamp(record.executed_at),
            record.project_name.clone(),
            record.script_name.clone(),
            record.observer_name.clone(),
            record.operator_name.clone(),
            record.executed_state.store_key().to_string(),
        ]);
    }
    table
}

#[must_use]
pub fn report_table(report: &AggregateReport) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(REPORT_TABLE_HEADERS);
    let missing = || "-".to_string();
    for row in &report.rows {
        table.add_row(vec![
            row.name.clone(),
            row.total_runs.to_string(),
            row.runs_completed.to_string(),
            row.unique_scripts_run.to_string(),
            row.unique_projects_run.to_string(),
            row.first_run.map_or_else(missing, format_store_timestamp),
            row.last_run.map_or_else(missing, format_store_timestamp),
            row.active_days
                .map_or_else(missing, |days| days.to_string()),
            row.runs_per_day
                .map_or_else(missing, |rate| format!("{rate:.2}")),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;

    use super::{history_table, report_table};
    use crate::errors::EntityKind;
    use crate::models::{ExecutionRecord, ExecutionState};
    use crate::report::{AggregateReport, AggregateRow};

    #[test]
    fn history_table_shows_store_state_keys() {
        let rendered = history_table(&[ExecutionRecord {
            id: 1,
            project_name: "AGBT19A_453".to_string(),
            script_name: "track".to_string(),
            observer_name: "Alice".to_string(),
            operator_name: "Oscar".to_string(),
            executed_at: datetime!(2019-03-05 04:05:06),
            version: String::new(),
            executed_script: String::new(),
            executed_state: ExecutionState::Aborted,
            log: String::new(),
        }])
        .to_string();
        assert!(rendered.contains("Project Name"));
        assert!(rendered.contains("2019-03-05 04:05:06"));
        assert!(rendered.contains("obs_aborted"));
    }

    #[test]
    fn report_table_marks_undefined_rates() {
        let rendered = report_table(&AggregateReport {
            kind: EntityKind::Observer,
            rows: vec![AggregateRow {
                name: "Idle".to_string(),
                total_runs: 0,
                runs_completed: 0,
                unique_scripts_run: 0,
                unique_projects_run: 0,
                first_run: None,
                last_run: None,
                active_days: None,
                runs_per_day: None,
            }],
            elapsed: Duration::ZERO,
        })
        .to_string();
        assert!(rendered.contains("Idle"));
        assert!(rendered.contains("runs_per_day"));
        assert!(rendered.contains('-'));
    }
}
