use anyhow::{Result, bail};
use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::PrimitiveDateTime;

use crate::utils::time::format_store_timestamp;

pub const EXPORT_SCHEMA_VERSION: &str = "turtlecli.execution.v1";

/// Outcome of one script execution, as recorded in `History.executed_state`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Aborted,
    Completed,
    #[value(name = "in_progress")]
    InProgress,
}

impl ExecutionState {
    #[must_use]
    pub const fn store_key(self) -> &'static str {
        match self {
            Self::Aborted => "obs_aborted",
            Self::Completed => "obs_completed",
            Self::InProgress => "obs_in_progress",
        }
    }

    pub fn from_store_key(raw: &str) -> Result<Self> {
        match raw {
            "obs_aborted" => Ok(Self::Aborted),
            "obs_completed" => Ok(Self::Completed),
            "obs_in_progress" => Ok(Self::InProgress),
            other => bail!("unknown executed_state value `{other}`"),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::Completed => "completed",
            Self::InProgress => "in_progress",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureState {
    NotCompleted,
    Completed,
    Saved,
}

impl ProcedureState {
    #[must_use]
    pub const fn store_key(self) -> &'static str {
        match self {
            Self::NotCompleted => "NotCompleted",
            Self::Completed => "Completed",
            Self::Saved => "Saved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidityStatus {
    Blank,
    Illicit,
    Unknown,
    Valid,
}

impl ValidityStatus {
    #[must_use]
    pub const fn store_key(self) -> &'static str {
        match self {
            Self::Blank => "Blank",
            Self::Illicit => "Illicit",
            Self::Unknown => "Unknown",
            Self::Valid => "Valid",
        }
    }
}

/// One `History` row joined with its procedure, project, observer and operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub id: i64,
    pub project_name: String,
    pub script_name: String,
    pub observer_name: String,
    pub operator_name: String,
    pub executed_at: PrimitiveDateTime,
    pub version: String,
    pub executed_script: String,
    pub executed_state: ExecutionState,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExportRecord {
    pub schema_version: String,
    pub id: i64,
    pub project_name: String,
    pub script_name: String,
    pub observer_name: String,
    pub operator_name: String,

    /// `YYYY-MM-DD HH:MM:SS`, as stored.
    pub executed_at: String,
    pub version: String,
    pub executed_state: ExecutionState,
    pub executed_script: String,
    pub log: String,
}

impl From<&ExecutionRecord> for ExportRecord {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            schema_version: EXPORT_SCHEMA_VERSION.to_string(),
            id: record.id,
            project_name: record.project_name.clone(),
            script_name: record.script_name.clone(),
            observer_name: record.observer_name.clone(),
            operator_name: record.operator_name.clone(),
            executed_at: format_store_timestamp(record.executed_at),
            version: record.version.clone(),
            executed_state: record.executed_state,
            executed_script: record.executed_script.clone(),
            log: record.log.clone(),
        }
    }
}

#[must_use]
pub fn export_json_schema() -> Value {
    let schema = schemars::schema_for!(ExportRecord);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated export schema: {error}");
        }
    }
}
