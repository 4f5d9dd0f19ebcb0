pub mod compose;
pub mod predicate;
pub mod project;
pub mod window;

use anyhow::Result;
use time::PrimitiveDateTime;

use crate::errors::ConfigurationError;
use crate::scanlog::ScanLogSource;
use crate::store::{HistoryStore, QueryOutcome};

pub use compose::{
    FilterCriteria, QueryComposer, QuerySpec, SortDirection, SortField, SortSpec, keyword_pattern,
};
pub use predicate::{Field, MatchMode, Predicate, build_field_predicate};
pub use project::{NormalizedProject, ParsedProjectName, ProjectNameNormalizer};
pub use window::{TimeOptions, TimeSpan, TimeUnit, TimeWindow, resolve_time_windows};

/// Per-invocation collaborators, built once and passed explicitly.
///
/// Composition needs only the scan-log source and the clock, so every option
/// error is reported before a store is opened.
pub struct QueryContext<'a> {
    pub scan_logs: &'a dyn ScanLogSource,
    pub now: PrimitiveDateTime,
}

impl<'a> QueryContext<'a> {
    #[must_use]
    pub fn new(scan_logs: &'a dyn ScanLogSource, now: PrimitiveDateTime) -> Self {
        Self { scan_logs, now }
    }

    /// Validates and composes the criteria.
    pub fn compose(&self, criteria: &FilterCriteria) -> Result<QuerySpec, ConfigurationError> {
        QueryComposer::new(self.scan_logs, self.now).compose(criteria)
    }

    /// Full match count and sorted, limited rows in one store round trip.
    pub fn execute(&self, store: &HistoryStore, spec: &QuerySpec) -> Result<QueryOutcome> {
        store.fetch(spec)
    }
}
