use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use similar::TextDiff;
use tracing::{debug, warn};

use crate::models::ExecutionRecord;
use crate::utils::time::format_store_timestamp;

const DIVIDER_WIDTH: usize = 80;

/// The per-record reports the history command can print or save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Log,
    Script,
    /// Unified diff between consecutive results.
    Diff,
}

/// What a report is about: one execution, or two neighbouring ones for a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportItem<'a> {
    Single(&'a ExecutionRecord),
    Pair(&'a ExecutionRecord, &'a ExecutionRecord),
}

impl<'a> ReportItem<'a> {
    fn first(self) -> &'a ExecutionRecord {
        match self {
            Self::Single(record) | Self::Pair(record, _) => record,
        }
    }
}

impl ReportKind {
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Log => "Showing logs for all above results",
            Self::Script => "Showing scripts for all above results",
            Self::Diff => "Showing diffs for all above results",
        }
    }

    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Script => "script",
            Self::Diff => "diff",
        }
    }

    #[must_use]
    pub fn items(self, records: &[ExecutionRecord]) -> Vec<ReportItem<'_>> {
        match self {
            Self::Log | Self::Script => records.iter().map(ReportItem::Single).collect(),
            Self::Diff => records
                .windows(2)
                .map(|pair| ReportItem::Pair(&pair[0], &pair[1]))
                .collect(),
        }
    }

    #[must_use]
    pub fn header(self, item: ReportItem<'_>) -> String {
        match (self, item) {
            (Self::Diff, ReportItem::Pair(a, b)) => format!(
                "Differences between scripts A (executed {}) and B (executed {})",
                format_store_timestamp(a.executed_at),
                format_store_timestamp(b.executed_at)
            ),
            (Self::Log, _) => {
                let record = item.first();
                format!(
                    "Logs for script {}, executed at {} by observer {}",
                    record.script_name,
                    format_store_timestamp(record.executed_at),
                    record.observer_name
                )
            }
            (Self::Script | Self::Diff, _) => format!(
                "Contents of scripts executed at {}",
                format_store_timestamp(item.first().executed_at)
            ),
        }
    }

    #[must_use]
    pub fn body(self, item: ReportItem<'_>) -> String {
        match (self, item) {
            (Self::Diff, ReportItem::Pair(a, b)) => diff_scripts(&a.executed_script, &b.executed_script),
            (Self::Log, _) => item.first().log.clone(),
            (Self::Script | Self::Diff, _) => item.first().executed_script.clone(),
        }
    }

    /// `{project}.{script}.{executed}.{observer}.{suffix}.txt`, path-safe.
    #[must_use]
    pub fn filename(self, item: ReportItem<'_>) -> String {
        let record = item.first();
        let executed = match item {
            ReportItem::Single(_) => format_store_timestamp(record.executed_at),
            ReportItem::Pair(a, b) => format!(
                "{}.{}",
                format_store_timestamp(a.executed_at),
                format_store_timestamp(b.executed_at)
            ),
        };
        let name = format!(
            "{}.{}.{}.{}.{}.txt",
            record.project_name,
            record.script_name,
            executed,
            record.observer_name,
            self.suffix()
        );
        path_safe(&name)
    }
}

/// Replaces spaces and path separators so `name` stays one path component.
#[must_use]
pub fn path_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

#[must_use]
pub fn diff_scripts(script_a: &str, script_b: &str) -> String {
    TextDiff::from_lines(script_a, script_b)
        .unified_diff()
        .context_radius(3)
        .header("A", "B")
        .to_string()
}

/// Warns when a diff would compare different scripts.
pub fn warn_on_mixed_scripts(records: &[ExecutionRecord]) {
    let names = records
        .iter()
        .map(|record| record.script_name.as_str())
        .collect::<BTreeSet<_>>();
    if names.len() > 1 {
        warn!(
            scripts = names.len(),
            "multiple script names detected; diffs may not make much sense"
        );
    }
}

pub fn print_report(
    out: &mut dyn Write,
    kind: ReportKind,
    records: &[ExecutionRecord],
) -> Result<()> {
    let divider = "-".repeat(DIVIDER_WIDTH);
    writeln!(out, "{}\n{divider}", kind.title()).context("failed to write report title")?;
    for item in kind.items(records) {
        writeln!(out, "{}\n{divider}", kind.header(item)).context("failed to write report header")?;
        writeln!(out, "{}\n{divider}", kind.body(item)).context("failed to write report body")?;
    }
    Ok(())
}

/// Writes one file per item into `directory`; returns the written paths.
pub fn save_report(
    directory: &Path,
    kind: ReportKind,
    records: &[ExecutionRecord],
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(directory).with_context(|| {
        format!(
            "failed to create report directory: {}",
            directory.display()
        )
    })?;

    let mut written = Vec::new();
    for item in kind.items(records) {
        let path = directory.join(kind.filename(item));
        std::fs::write(&path, kind.body(item))
            .with_context(|| format!("failed to write report file: {}", path.display()))?;
        debug!(path = %path.display(), report = kind.suffix(), "saved report");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{ReportItem, ReportKind, diff_scripts, print_report};
    use crate::models::{ExecutionRecord, ExecutionState};

    fn record(id: i64, script: &str, minute: u8) -> ExecutionRecord {
        ExecutionRecord {
            id,
            project_name: "AGBT19A_453".to_string(),
            script_name: "track".to_string(),
            observer_name: "Jane Doe".to_string(),
            operator_name: "Oscar".to_string(),
            executed_at: datetime!(2019-03-05 04:00:00)
                .replace_minute(minute)
                .expect("minute should be valid"),
            version: "1.0".to_string(),
            executed_script: script.to_string(),
            executed_state: ExecutionState::Completed,
            log: format!("log {id}"),
        }
    }

    #[test]
    fn filename_replaces_spaces_and_separators() {
        let record = record(1, "Track()\n", 5);
        assert_eq!(
            ReportKind::Log.filename(ReportItem::Single(&record)),
            "AGBT19A_453.track.2019-03-05_04:05:00.Jane_Doe.log.txt"
        );
        assert_eq!(
            ReportKind::Script.filename(ReportItem::Single(&record)),
            "AGBT19A_453.track.2019-03-05_04:05:00.Jane_Doe.script.txt"
        );
    }

    #[test]
    fn diff_pairs_consecutive_records() {
        let records = vec![
            record(1, "a\nb\n", 1),
            record(2, "a\nc\n", 2),
            record(3, "a\nc\n", 3),
        ];
        let items = ReportKind::Diff.items(&records);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], ReportItem::Pair(&records[0], &records[1]));
        assert_eq!(items[1], ReportItem::Pair(&records[1], &records[2]));

        let body = ReportKind::Diff.body(items[0]);
        assert!(body.contains("-b"));
        assert!(body.contains("+c"));
        assert!(ReportKind::Diff.body(items[1]).is_empty());
        assert!(
            ReportKind::Diff
                .header(items[0])
                .starts_with("Differences between scripts A (executed 2019-03-05 04:01:00)")
        );
    }

    #[test]
    fn unified_diff_carries_headers() {
        let diff = diff_scripts("x = 1\n", "x = 2\n");
        assert!(diff.starts_with("--- A\n+++ B\n"));
    }

    #[test]
    fn printed_report_lists_every_record() {
        let records = vec![record(1, "one", 1), record(2, "two", 2)];
        let mut out = Vec::new();
        print_report(&mut out, ReportKind::Log, &records).expect("report should print");
        let text = String::from_utf8(out).expect("report should be utf-8");
        assert!(text.starts_with("Showing logs for all above results\n"));
        assert!(text.contains("Logs for script track, executed at 2019-03-05 04:01:00 by observer Jane Doe"));
        assert!(text.contains("log 2"));
    }
}
