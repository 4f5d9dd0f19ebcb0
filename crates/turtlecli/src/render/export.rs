use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::{ExecutionRecord, ExportRecord};

/// Writes one `ExportRecord` JSON object per line; returns the row count.
pub fn write_export_jsonl(path: &Path, records: &[ExecutionRecord]) -> Result<usize> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("failed to create export directory")?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create export file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, &ExportRecord::from(record))
            .context("failed to encode export jsonl row")?;
        writer
            .write_all(b"\n")
            .context("failed to write export newline")?;
    }
    writer
        .flush()
        .context("failed to flush export writer")?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use time::macros::datetime;

    use super::write_export_jsonl;
    use crate::models::{EXPORT_SCHEMA_VERSION, ExecutionRecord, ExecutionState, ExportRecord};

    #[test]
    fn writes_one_json_object_per_line() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir()
            .join(format!("turtlecli-export-{nanos}"))
            .join("rows.jsonl");

        let record = ExecutionRecord {
            id: 7,
            project_name: "AGBT19A_453".to_string(),
            script_name: "track".to_string(),
            observer_name: "Alice".to_string(),
            operator_name: "Oscar".to_string(),
            executed_at: datetime!(2019-03-05 04:05:06),
            version: "1.0".to_string(),
            executed_script: "Track()\n".to_string(),
            executed_state: ExecutionState::InProgress,
            log: String::new(),
        };
        let written = write_export_jsonl(&path, &[record.clone(), record])
            .expect("export should be written");
        assert_eq!(written, 2);

        let raw = std::fs::read_to_string(&path).expect("export should be readable");
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let decoded: ExportRecord =
            serde_json::from_str(lines[0]).expect("line should decode as an export record");
        assert_eq!(decoded.schema_version, EXPORT_SCHEMA_VERSION);
        assert_eq!(decoded.executed_at, "2019-03-05 04:05:06");
        assert_eq!(decoded.executed_state, ExecutionState::InProgress);

        let _ = std::fs::remove_dir_all(path.parent().expect("export has a parent"));
    }
}
