//! Write helpers for building fixture stores. The CLI itself never writes.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::params;
use time::PrimitiveDateTime;

use crate::models::{ExecutionState, ProcedureState, ValidityStatus};
use crate::store::{
    HISTORY_TABLE, HistoryStore, OBSERVER_TABLE, OPERATOR_TABLE, PROCEDURE_TABLE, PROJECT_TABLE,
};
use crate::utils::time::format_store_timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProcedure<'a> {
    pub name: &'a str,
    pub project_id: i64,
    pub observer_id: Option<i64>,
    pub operator_id: Option<i64>,
    pub session: &'a str,
    pub script: &'a str,
    pub state: ProcedureState,
    pub status: ValidityStatus,
    pub last_modified: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExecution<'a> {
    pub procedure_id: i64,
    pub observer_id: i64,
    pub operator_id: i64,
    pub executed_at: PrimitiveDateTime,
    pub version: &'a str,
    pub executed_script: &'a str,
    pub executed_state: ExecutionState,
    pub log: &'a str,
}

impl HistoryStore {
    pub fn insert_observer(&self, name: &str) -> Result<i64> {
        self.insert_named(OBSERVER_TABLE, name)
    }

    pub fn insert_operator(&self, name: &str) -> Result<i64> {
        self.insert_named(OPERATOR_TABLE, name)
    }

    fn insert_named(&self, table: &str, name: &str) -> Result<i64> {
        self.connection()
            .execute(&format!("INSERT INTO {table} (name) VALUES (?1)"), [name])
            .with_context(|| format!("failed to insert {table} `{name}`"))?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn insert_project(
        &self,
        name: &str,
        primary_observer_id: Option<i64>,
        session: &str,
    ) -> Result<i64> {
        self.connection()
            .execute(
                &format!(
                    "INSERT INTO {PROJECT_TABLE} (name, primary_observer_id, session) VALUES (?1, ?2, ?3)"
                ),
                params![name, primary_observer_id, session],
            )
            .with_context(|| format!("failed to insert project `{name}`"))?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn insert_procedure(&self, procedure: &NewProcedure<'_>) -> Result<i64> {
        self.connection()
            .execute(
                &format!(
                    "INSERT INTO {PROCEDURE_TABLE}
                     (name, session, script, obsprojectref_id, operator_id, observer_id, state, status, last_modified)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    procedure.name,
                    procedure.session,
                    procedure.script,
                    procedure.project_id,
                    procedure.operator_id,
                    procedure.observer_id,
                    procedure.state.store_key(),
                    procedure.status.store_key(),
                    format_store_timestamp(procedure.last_modified),
                ],
            )
            .with_context(|| format!("failed to insert procedure `{}`", procedure.name))?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn insert_execution(&self, execution: &NewExecution<'_>) -> Result<i64> {
        self.connection()
            .execute(
                &format!(
                    "INSERT INTO {HISTORY_TABLE}
                     (obsprocedure_id, observer_id, operator_id, datetime, version, executed_script, executed_state, log)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    execution.procedure_id,
                    execution.observer_id,
                    execution.operator_id,
                    format_store_timestamp(execution.executed_at),
                    execution.version,
                    execution.executed_script,
                    execution.executed_state.store_key(),
                    execution.log,
                ],
            )
            .with_context(|| {
                format!(
                    "failed to insert execution of procedure {}",
                    execution.procedure_id
                )
            })?;
        Ok(self.connection().last_insert_rowid())
    }
}

/// One execution described by names; the fixture creates referenced rows on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureExecution<'a> {
    pub project: &'a str,
    pub script: &'a str,
    pub observer: &'a str,
    pub operator: &'a str,
    pub executed_at: PrimitiveDateTime,
    pub state: ExecutionState,
    pub executed_script: &'a str,
    pub log: &'a str,
}

/// Name-keyed seeding over a writable store.
pub struct HistoryFixture<'a> {
    store: &'a HistoryStore,
    observers: BTreeMap<String, i64>,
    operators: BTreeMap<String, i64>,
    projects: BTreeMap<String, i64>,
    procedures: BTreeMap<(String, String), i64>,
}

impl<'a> HistoryFixture<'a> {
    #[must_use]
    pub fn new(store: &'a HistoryStore) -> Self {
        Self {
            store,
            observers: BTreeMap::new(),
            operators: BTreeMap::new(),
            projects: BTreeMap::new(),
            procedures: BTreeMap::new(),
        }
    }

    pub fn observer(&mut self, name: &str) -> Result<i64> {
        if let Some(id) = self.observers.get(name) {
            return Ok(*id);
        }
        let id = self.store.insert_observer(name)?;
        self.observers.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn operator(&mut self, name: &str) -> Result<i64> {
        if let Some(id) = self.operators.get(name) {
            return Ok(*id);
        }
        let id = self.store.insert_operator(name)?;
        self.operators.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn project(&mut self, name: &str) -> Result<i64> {
        if let Some(id) = self.projects.get(name) {
            return Ok(*id);
        }
        let id = self.store.insert_project(name, None, "")?;
        self.projects.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn procedure(&mut self, project: &str, script: &str, last_modified: PrimitiveDateTime) -> Result<i64> {
        let key = (project.to_string(), script.to_string());
        if let Some(id) = self.procedures.get(&key) {
            return Ok(*id);
        }
        let project_id = self.project(project)?;
        let id = self.store.insert_procedure(&NewProcedure {
            name: script,
            project_id,
            observer_id: None,
            operator_id: None,
            session: "",
            script: "",
            state: ProcedureState::Saved,
            status: ValidityStatus::Valid,
            last_modified,
        })?;
        self.procedures.insert(key, id);
        Ok(id)
    }

    pub fn record(&mut self, execution: &FixtureExecution<'_>) -> Result<i64> {
        let procedure_id =
            self.procedure(execution.project, execution.script, execution.executed_at)?;
        let observer_id = self.observer(execution.observer)?;
        let operator_id = self.operator(execution.operator)?;
        self.store.insert_execution(&NewExecution {
            procedure_id,
            observer_id,
            operator_id,
            executed_at: execution.executed_at,
            version: "1.0",
            executed_script: execution.executed_script,
            executed_state: execution.state,
            log: execution.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{FixtureExecution, HistoryFixture};
    use crate::models::ExecutionState;
    use crate::store::HistoryStore;

    #[test]
    fn fixture_reuses_named_rows() {
        let store = HistoryStore::open_in_memory().expect("store should open");
        let mut fixture = HistoryFixture::new(&store);
        let execution = FixtureExecution {
            project: "AGBT19A_453",
            script: "track",
            observer: "Alice",
            operator: "Oscar",
            executed_at: datetime!(2019-03-05 04:00:00),
            state: ExecutionState::Completed,
            executed_script: "Track()",
            log: "done",
        };
        fixture.record(&execution).expect("first record should insert");
        fixture
            .record(&FixtureExecution {
                executed_at: datetime!(2019-03-06 04:00:00),
                ..execution
            })
            .expect("second record should insert");

        let counts: (i64, i64, i64) = store
            .connection()
            .query_row(
                "SELECT (SELECT COUNT(*) FROM History), (SELECT COUNT(*) FROM Observer), (SELECT COUNT(*) FROM ObsProcedure)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("counts should be queryable");
        assert_eq!(counts, (2, 1, 1));
    }
}
