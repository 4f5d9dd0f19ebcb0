pub mod seed;

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use regex::{Regex, RegexBuilder};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tracing::debug;

use crate::errors::EntityKind;
use crate::models::{ExecutionRecord, ExecutionState};
use crate::query::{MatchMode, Predicate, QuerySpec};
use crate::utils::time::{format_store_timestamp, parse_store_timestamp};

pub const HISTORY_TABLE: &str = "History";
pub const PROCEDURE_TABLE: &str = "ObsProcedure";
pub const PROJECT_TABLE: &str = "ObsProjectRef";
pub const OBSERVER_TABLE: &str = "Observer";
pub const OPERATOR_TABLE: &str = "Operator";

const CREATE_OBSERVER_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS Observer (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
"#;

const CREATE_OPERATOR_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS Operator (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
"#;

const CREATE_PROJECT_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ObsProjectRef (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    primary_observer_id INTEGER REFERENCES Observer (id),
    session TEXT NOT NULL DEFAULT ''
);
"#;

const CREATE_PROCEDURE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ObsProcedure (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    session TEXT NOT NULL DEFAULT '',
    script TEXT NOT NULL DEFAULT '',
    obsprojectref_id INTEGER NOT NULL REFERENCES ObsProjectRef (id),
    operator_id INTEGER REFERENCES Operator (id),
    observer_id INTEGER REFERENCES Observer (id),
    state TEXT NOT NULL,
    status TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    CHECK (state IN ('NotCompleted', 'Completed', 'Saved')),
    CHECK (status IN ('Blank', 'Illicit', 'Unknown', 'Valid'))
);
"#;

const CREATE_HISTORY_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS History (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    obsprocedure_id INTEGER NOT NULL REFERENCES ObsProcedure (id),
    observer_id INTEGER NOT NULL REFERENCES Observer (id),
    operator_id INTEGER NOT NULL REFERENCES Operator (id),
    datetime TEXT NOT NULL,
    version TEXT NOT NULL DEFAULT '',
    executed_script TEXT NOT NULL DEFAULT '',
    executed_state TEXT NOT NULL,
    log TEXT NOT NULL DEFAULT '',
    CHECK (executed_state IN ('obs_completed', 'obs_in_progress', 'obs_aborted'))
);
"#;

const CREATE_INDEX_HISTORY_DATETIME_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_history_datetime
ON History (datetime, id);
"#;

const CREATE_INDEX_HISTORY_OBSERVER_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_history_observer
ON History (observer_id, datetime);
"#;

const CREATE_INDEX_HISTORY_OPERATOR_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_history_operator
ON History (operator_id, datetime);
"#;

const CREATE_INDEX_HISTORY_PROCEDURE_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_history_procedure
ON History (obsprocedure_id);
"#;

const HISTORY_SELECT_SQL: &str = r#"
SELECT
    h.id,
    pr.name,
    p.name,
    obs.name,
    op.name,
    h.datetime,
    h.version,
    h.executed_script,
    h.executed_state,
    h.log,
    COUNT(*) OVER () AS matched_count
FROM History h
JOIN ObsProcedure p ON p.id = h.obsprocedure_id
JOIN ObsProjectRef pr ON pr.id = p.obsprojectref_id
JOIN Observer obs ON obs.id = h.observer_id
JOIN Operator op ON op.id = h.operator_id"#;

#[must_use]
pub fn schema_statements() -> &'static [&'static str] {
    &[
        CREATE_OBSERVER_TABLE_SQL,
        CREATE_OPERATOR_TABLE_SQL,
        CREATE_PROJECT_TABLE_SQL,
        CREATE_PROCEDURE_TABLE_SQL,
        CREATE_HISTORY_TABLE_SQL,
        CREATE_INDEX_HISTORY_DATETIME_SQL,
        CREATE_INDEX_HISTORY_OBSERVER_SQL,
        CREATE_INDEX_HISTORY_OPERATOR_SQL,
        CREATE_INDEX_HISTORY_PROCEDURE_SQL,
    ]
}

#[must_use]
pub fn create_schema_sql() -> String {
    schema_statements().join("\n")
}

pub fn ensure_history_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .context("failed to create history schema")
}

/// Installs `regexp(pattern, text)` so `text REGEXP pattern` works.
///
/// Matching is case-insensitive and unanchored; NULL text never matches.
/// Compiled patterns are cached per statement.
pub fn register_regexp_function(connection: &Connection) -> Result<()> {
    connection
        .create_scalar_function(
            "regexp",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let regex = ctx.get_or_create_aux(0, |pattern| -> Result<Regex, BoxedError> {
                    Ok(RegexBuilder::new(pattern.as_str()?)
                        .case_insensitive(true)
                        .build()?)
                })?;
                let text = ctx
                    .get_raw(1)
                    .as_str_or_null()
                    .map_err(|error| rusqlite::Error::UserFunctionError(error.into()))?;
                Ok(text.is_some_and(|text| regex.is_match(text)))
            },
        )
        .context("failed to register sqlite regexp function")
}

/// Installs `casefold(text)`, a Unicode-aware lowercase. SQLite's `LOWER`
/// only folds ASCII letters; NULL stays NULL.
pub fn register_casefold_function(connection: &Connection) -> Result<()> {
    connection
        .create_scalar_function(
            "casefold",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text = ctx
                    .get_raw(0)
                    .as_str_or_null()
                    .map_err(|error| rusqlite::Error::UserFunctionError(error.into()))?;
                Ok(text.map(str::to_lowercase))
            },
        )
        .context("failed to register sqlite casefold function")
}

/// Installs every scalar function the rendered predicates rely on.
pub fn register_match_functions(connection: &Connection) -> Result<()> {
    register_regexp_function(connection)?;
    register_casefold_function(connection)
}

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Renders a predicate to a SQL boolean expression, appending bound values in order.
pub fn render_predicate(predicate: &Predicate, params: &mut Vec<SqlValue>) -> String {
    match predicate {
        Predicate::Match { field, mode, value } => {
            params.push(SqlValue::Text(value.clone()));
            let column = field.column();
            match mode {
                MatchMode::Exact => format!("casefold({column}) = casefold(?)"),
                MatchMode::Fuzzy => format!("INSTR(casefold({column}), casefold(?)) > 0"),
                MatchMode::Regex => format!("{column} REGEXP ?"),
            }
        }
        Predicate::Equals { field, value } => {
            params.push(SqlValue::Text(value.clone()));
            format!("{} = ?", field.column())
        }
        Predicate::AtLeast { field, value } => {
            params.push(SqlValue::Text(format_store_timestamp(*value)));
            format!("{} >= ?", field.column())
        }
        Predicate::AtMost { field, value } => {
            params.push(SqlValue::Text(format_store_timestamp(*value)));
            format!("{} <= ?", field.column())
        }
        Predicate::Any(inner) => render_group(inner, " OR ", "0", params),
        Predicate::All(inner) => render_group(inner, " AND ", "1", params),
    }
}

fn render_group(
    inner: &[Predicate],
    separator: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> String {
    match inner {
        [] => empty.to_string(),
        [single] => render_predicate(single, params),
        many => {
            let parts = many
                .iter()
                .map(|predicate| render_predicate(predicate, params))
                .collect::<Vec<_>>();
            format!("({})", parts.join(separator))
        }
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[must_use]
pub fn render_history_query(spec: &QuerySpec) -> RenderedQuery {
    let mut params = Vec::new();
    let condition = render_predicate(&spec.predicate, &mut params);
    let direction = spec.sort.direction.sql();
    let mut sql = format!(
        "{HISTORY_SELECT_SQL}\nWHERE {condition}\nORDER BY {} {direction}, h.id {direction}",
        spec.sort.field.field().column()
    );
    if spec.limit > 0 {
        sql.push_str("\nLIMIT ?");
        params.push(SqlValue::Integer(
            i64::try_from(spec.limit).unwrap_or(i64::MAX),
        ));
    }
    RenderedQuery { sql, params }
}

/// Result of one history fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Rows matching the predicate before the limit.
    pub matched_count: usize,
    /// Sorted rows after the limit.
    pub records: Vec<ExecutionRecord>,
    pub elapsed: Duration,
    pub sql: String,
}

/// Unaggregated per-entity activity, straight from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityActivity {
    pub name: String,
    pub total_runs: i64,
    pub runs_completed: i64,
    pub unique_scripts_run: i64,
    pub unique_projects_run: i64,
    pub first_run: Option<String>,
    pub last_run: Option<String>,
}

struct RawHistoryRow {
    id: i64,
    project_name: String,
    script_name: String,
    observer_name: String,
    operator_name: String,
    datetime: String,
    version: Option<String>,
    executed_script: Option<String>,
    executed_state: String,
    log: Option<String>,
    matched_count: i64,
}

pub struct HistoryStore {
    connection: Connection,
}

impl HistoryStore {
    /// Opens an existing database without write access.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("history database not found: {}", path.display());
        }
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open history database: {}", path.display()))?;
        Self::from_connection(connection)
    }

    /// Opens (creating if needed) a writable database with the history schema.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create history database parent directory: {}",
                    parent.display()
                )
            })?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open history database: {}", path.display()))?;
        ensure_history_schema(&connection)?;
        Self::from_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory history database")?;
        ensure_history_schema(&connection)?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        register_match_functions(&connection)?;
        Ok(Self { connection })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Runs a composed query: full match count and sorted, limited rows in one statement.
    pub fn fetch(&self, spec: &QuerySpec) -> Result<QueryOutcome> {
        let RenderedQuery { sql, params } = render_history_query(spec);
        debug!(sql = %sql, params = params.len(), "executing history query");

        let started = Instant::now();
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare history query")?;
        let rows = statement
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(RawHistoryRow {
                    id: row.get(0)?,
                    project_name: row.get(1)?,
                    script_name: row.get(2)?,
                    observer_name: row.get(3)?,
                    operator_name: row.get(4)?,
                    datetime: row.get(5)?,
                    version: row.get(6)?,
                    executed_script: row.get(7)?,
                    executed_state: row.get(8)?,
                    log: row.get(9)?,
                    matched_count: row.get(10)?,
                })
            })
            .context("failed to execute history query")?;

        let mut matched_count = 0;
        let mut records = Vec::new();
        for row in rows {
            let row = row.context("failed to decode history row")?;
            matched_count = usize::try_from(row.matched_count).unwrap_or_default();
            records.push(decode_history_row(row)?);
        }
        let elapsed = started.elapsed();

        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            matched = matched_count,
            rows = records.len(),
            "history query finished"
        );

        Ok(QueryOutcome {
            matched_count,
            records,
            elapsed,
            sql,
        })
    }

    /// Per-entity run counts and first/last execution, one row per entity.
    ///
    /// With `names`, only entities whose name is listed are returned; entities
    /// without executions are still present with zero counts.
    pub fn entity_activity(
        &self,
        kind: EntityKind,
        names: Option<&[String]>,
    ) -> Result<(Vec<EntityActivity>, Duration)> {
        let mut params = vec![SqlValue::Text(
            ExecutionState::Completed.store_key().to_string(),
        )];
        let filter = match names {
            Some(names) if !names.is_empty() => {
                params.extend(names.iter().cloned().map(SqlValue::Text));
                format!(
                    "WHERE e.name IN ({})",
                    vec!["?"; names.len()].join(", ")
                )
            }
            Some(_) => "WHERE 0".to_string(),
            None => String::new(),
        };
        let sql = format!(
            r#"
SELECT
    e.name,
    COUNT(h.id),
    COALESCE(SUM(CASE WHEN h.executed_state = ? THEN 1 ELSE 0 END), 0),
    COUNT(DISTINCT h.obsprocedure_id),
    COUNT(DISTINCT p.obsprojectref_id),
    MIN(h.datetime),
    MAX(h.datetime)
FROM {table} e
LEFT JOIN History h ON h.{column} = e.id
LEFT JOIN ObsProcedure p ON p.id = h.obsprocedure_id
{filter}
GROUP BY e.id, e.name
ORDER BY e.name, e.id"#,
            table = kind.table(),
            column = kind.history_column(),
        );
        debug!(entity = %kind, sql = %sql, "executing activity query");

        let started = Instant::now();
        let mut statement = self
            .connection
            .prepare(&sql)
            .with_context(|| format!("failed to prepare {kind} activity query"))?;
        let rows = statement
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(EntityActivity {
                    name: row.get(0)?,
                    total_runs: row.get(1)?,
                    runs_completed: row.get(2)?,
                    unique_scripts_run: row.get(3)?,
                    unique_projects_run: row.get(4)?,
                    first_run: row.get(5)?,
                    last_run: row.get(6)?,
                })
            })
            .with_context(|| format!("failed to execute {kind} activity query"))?;

        let mut activity = Vec::new();
        for row in rows {
            activity.push(row.with_context(|| format!("failed to decode {kind} activity row"))?);
        }
        Ok((activity, started.elapsed()))
    }
}

fn decode_history_row(row: RawHistoryRow) -> Result<ExecutionRecord> {
    let executed_at = parse_store_timestamp(&row.datetime)
        .with_context(|| format!("history row {} has an invalid datetime", row.id))?;
    let executed_state = ExecutionState::from_store_key(&row.executed_state)
        .with_context(|| format!("history row {} has an invalid executed_state", row.id))?;
    Ok(ExecutionRecord {
        id: row.id,
        project_name: row.project_name,
        script_name: row.script_name,
        observer_name: row.observer_name,
        operator_name: row.operator_name,
        executed_at,
        version: row.version.unwrap_or_default(),
        executed_script: row.executed_script.unwrap_or_default(),
        executed_state,
        log: row.log.unwrap_or_default(),
    })
}
