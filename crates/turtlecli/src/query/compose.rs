use clap::ValueEnum;
use time::PrimitiveDateTime;
use tracing::debug;

use crate::errors::ConfigurationError;
use crate::models::ExecutionState;
use crate::query::predicate::{Field, MatchMode, Predicate, build_field_predicate, validate_regex};
use crate::query::project::ProjectNameNormalizer;
use crate::query::window::{TimeOptions, TimeWindow, resolve_time_windows};
use crate::scanlog::ScanLogSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum SortField {
    Id,
    /// Procedure (script) name.
    Obsprocedure,
    Observer,
    Operator,
    #[default]
    Datetime,
}

impl SortField {
    #[must_use]
    pub const fn field(self) -> Field {
        match self {
            Self::Id => Field::Id,
            Self::Obsprocedure => Field::ScriptName,
            Self::Observer => Field::ObserverName,
            Self::Operator => Field::OperatorName,
            Self::Datetime => Field::ExecutedAt,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Obsprocedure => "obsprocedure",
            Self::Observer => "observer",
            Self::Operator => "operator",
            Self::Datetime => "datetime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }

    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

/// Every filter the history command accepts. Empty lists are inactive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub projects: Vec<String>,
    pub scripts: Vec<String>,
    pub observers: Vec<String>,
    pub operators: Vec<String>,
    pub states: Vec<ExecutionState>,
    pub time: TimeOptions,
    pub search_scripts: Vec<String>,
    pub search_logs: Vec<String>,
    pub keywords: Vec<String>,
    pub mode: MatchMode,
    pub sort: SortSpec,
    /// Zero means unlimited.
    pub limit: usize,
}

/// A fully composed, not yet executed, history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub predicate: Predicate,
    pub sort: SortSpec,
    pub limit: usize,
    pub mode: MatchMode,
    pub description: Vec<String>,
}

impl QuerySpec {
    /// Human-readable summary of the active filters, comma separated.
    #[must_use]
    pub fn describe(&self) -> String {
        self.description.join(", ")
    }
}

/// Builds a [`QuerySpec`] from criteria. All validation happens here, so a
/// failing composition never reaches the store.
pub struct QueryComposer<'a> {
    normalizer: ProjectNameNormalizer<'a>,
    now: PrimitiveDateTime,
}

impl<'a> QueryComposer<'a> {
    #[must_use]
    pub fn new(scan_logs: &'a dyn ScanLogSource, now: PrimitiveDateTime) -> Self {
        Self {
            normalizer: ProjectNameNormalizer::new(scan_logs),
            now,
        }
    }

    pub fn compose(&self, criteria: &FilterCriteria) -> Result<QuerySpec, ConfigurationError> {
        // Cheap validation first so option errors win over scan-log I/O.
        let time = resolve_time_windows(&criteria.time, self.now)?;
        let keywords = criteria
            .keywords
            .iter()
            .map(|pair| keyword_predicate(pair))
            .collect::<Result<Vec<_>, _>>()?;

        let mode = criteria.mode;
        let mut predicates = Vec::new();
        let mut description = Vec::new();

        if !criteria.projects.is_empty() {
            description.push(format!(
                "for project{} {:?}",
                plural(criteria.projects.len()),
                criteria.projects
            ));
            predicates.push(self.project_predicate(&criteria.projects, mode)?);
        }

        let named = [
            (&criteria.scripts, Field::ScriptName, "for script"),
            (&criteria.observers, Field::ObserverName, "by observer"),
            (&criteria.operators, Field::OperatorName, "with operator"),
        ];
        for (values, field, label) in named {
            if values.is_empty() {
                continue;
            }
            debug!(field = field.label(), mode = mode.as_str(), values = ?values, "adding name filter");
            description.push(format!("{label}{} {values:?}", plural(values.len())));
            predicates.push(build_field_predicate(field, values, mode)?);
        }

        if !criteria.states.is_empty() {
            let keys = criteria
                .states
                .iter()
                .map(|state| state.store_key())
                .collect::<Vec<_>>();
            debug!(states = ?keys, "adding state filter");
            description.push(format!("with state {}", keys.join(" or ")));
            predicates.push(Predicate::any(keys.iter().map(|key| Predicate::Equals {
                field: Field::ExecutedState,
                value: (*key).to_string(),
            })));
        }

        if !time.windows.is_empty() {
            debug!(windows = time.windows.len(), "adding time filter");
            description.extend(time.description);
            predicates.push(Predicate::within_any(Field::ExecutedAt, &time.windows));
        }

        // Content is searched by substring unless the user asked for regexes.
        let content_mode = match mode {
            MatchMode::Regex => MatchMode::Regex,
            MatchMode::Exact | MatchMode::Fuzzy => MatchMode::Fuzzy,
        };
        let content = [
            (&criteria.search_scripts, Field::ExecutedScript, "with scripts containing"),
            (&criteria.search_logs, Field::Log, "with logs containing"),
        ];
        for (terms, field, label) in content {
            if terms.is_empty() {
                continue;
            }
            debug!(field = field.label(), mode = content_mode.as_str(), terms = ?terms, "adding content search");
            description.push(format!("{label} {terms:?}"));
            predicates.push(build_field_predicate(field, terms, content_mode)?);
        }

        if !keywords.is_empty() {
            debug!(pairs = ?criteria.keywords, "adding keyword search");
            description.push(format!("with script keywords {:?}", criteria.keywords));
            // Pairs are alternatives, not requirements.
            predicates.push(Predicate::any(keywords));
        }

        description.push(format!(
            "ordered by {} ({})",
            criteria.sort.field.as_str(),
            criteria.sort.direction.as_str()
        ));

        Ok(QuerySpec {
            predicate: Predicate::all(predicates),
            sort: criteria.sort,
            limit: criteria.limit,
            mode,
            description,
        })
    }

    fn project_predicate(
        &self,
        projects: &[String],
        mode: MatchMode,
    ) -> Result<Predicate, ConfigurationError> {
        if mode != MatchMode::Fuzzy {
            debug!(mode = mode.as_str(), projects = ?projects, "adding project filter");
            return build_field_predicate(Field::ProjectName, projects, mode);
        }

        let mut alternatives = Vec::with_capacity(projects.len());
        let mut session_windows: Vec<TimeWindow> = Vec::new();
        let mut any_session = false;
        for project in projects {
            let normalized = self.normalizer.normalize(project);
            alternatives.push(Predicate::Match {
                field: Field::ProjectName,
                mode: MatchMode::Exact,
                value: project.clone(),
            });
            if normalized.parsed.is_some() {
                alternatives.push(Predicate::Match {
                    field: Field::ProjectName,
                    mode: MatchMode::Regex,
                    value: normalized.core_pattern,
                });
            }
            if let Some(windows) = normalized.session_windows {
                any_session = true;
                session_windows.extend(windows);
            }
        }

        let names = Predicate::any(alternatives);
        if !any_session {
            return Ok(names);
        }
        debug!(windows = session_windows.len(), "restricting projects to session windows");
        Ok(names.and(Predicate::within_any(Field::ExecutedAt, &session_windows)))
    }
}

/// `key=value` → regex over script text: `key`, `=`, then the value in matching quotes.
pub fn keyword_pattern(key: &str, value: &str) -> String {
    let key = regex::escape(key);
    let value = regex::escape(value);
    format!(r#"{key}\s*=\s*(?:"{value}"|'{value}')"#)
}

fn keyword_predicate(pair: &str) -> Result<Predicate, ConfigurationError> {
    let Some((key, value)) = pair.split_once('=') else {
        return Err(ConfigurationError::new(format!(
            "keyword `{pair}` must have the form key=value"
        )));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigurationError::new(format!(
            "keyword `{pair}` has an empty key"
        )));
    }

    let pattern = keyword_pattern(key, value.trim());
    validate_regex(&pattern)?;
    Ok(Predicate::Match {
        field: Field::ExecutedScript,
        mode: MatchMode::Regex,
        value: pattern,
    })
}

fn plural(count: usize) -> &'static str {
    if count > 1 { "s" } else { "" }
}

#[cfg(test)]
mod tests {
    use regex::RegexBuilder;
    use time::PrimitiveDateTime;
    use time::macros::datetime;

    use super::{FilterCriteria, QueryComposer, SortDirection, SortField, SortSpec, keyword_pattern};
    use crate::models::ExecutionState;
    use crate::query::predicate::{Field, MatchMode, Predicate};
    use crate::query::window::TimeOptions;
    use crate::scanlog::{NoScanLogs, ScanLogKey, ScanLogSource, ScanLogUnavailable};

    const NOW: PrimitiveDateTime = datetime!(2021-06-15 12:00:00);

    struct OneScan;

    impl ScanLogSource for OneScan {
        fn execution_times(
            &self,
            _key: &ScanLogKey,
        ) -> Result<Vec<PrimitiveDateTime>, ScanLogUnavailable> {
            Ok(vec![datetime!(2019-03-05 04:00:00)])
        }
    }

    #[test]
    fn keyword_pattern_escapes_and_accepts_either_quote() {
        insta::assert_snapshot!(
            keyword_pattern("obs.type", "a+b"),
            @r#"obs\.type\s*=\s*(?:"a\+b"|'a\+b')"#
        );

        let regex = RegexBuilder::new(&keyword_pattern("foo", "bar"))
            .case_insensitive(true)
            .build()
            .expect("keyword pattern should compile");
        assert!(regex.is_match(r#"foo = "bar""#));
        assert!(regex.is_match("x; foo='bar'"));
        assert!(!regex.is_match(r#"foo="baz""#));
        assert!(!regex.is_match(r#"foo="bar'"#));
    }

    #[test]
    fn no_filters_compose_to_always_with_default_sort() {
        let spec = QueryComposer::new(&NoScanLogs, NOW)
            .compose(&FilterCriteria::default())
            .expect("empty criteria should compose");
        assert!(spec.predicate.is_always());
        assert_eq!(spec.sort.field, SortField::Datetime);
        assert_eq!(spec.sort.direction, SortDirection::Descending);
        assert_eq!(spec.describe(), "ordered by datetime (descending)");
    }

    #[test]
    fn categories_are_conjoined() {
        let spec = QueryComposer::new(&NoScanLogs, NOW)
            .compose(&FilterCriteria {
                projects: vec!["AGBT19A_453".to_string()],
                observers: vec!["Alice".to_string(), "Bob".to_string()],
                states: vec![ExecutionState::Completed],
                sort: SortSpec {
                    field: SortField::Id,
                    direction: SortDirection::Ascending,
                },
                ..FilterCriteria::default()
            })
            .expect("criteria should compose");

        let Predicate::All(parts) = &spec.predicate else {
            panic!("expected a conjunction, got {:?}", spec.predicate);
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[1], Predicate::Any(ref alternatives) if alternatives.len() == 2));
        assert_eq!(
            parts[2],
            Predicate::Equals {
                field: Field::ExecutedState,
                value: "obs_completed".to_string(),
            }
        );
        assert_eq!(
            spec.describe(),
            "for project [\"AGBT19A_453\"], by observers [\"Alice\", \"Bob\"], \
             with state obs_completed, ordered by id (ascending)"
        );
    }

    #[test]
    fn time_errors_surface_before_any_scan_log_lookup() {
        struct Exploding;
        impl ScanLogSource for Exploding {
            fn execution_times(
                &self,
                _key: &ScanLogKey,
            ) -> Result<Vec<PrimitiveDateTime>, ScanLogUnavailable> {
                panic!("scan logs must not be consulted");
            }
        }

        let err = QueryComposer::new(&Exploding, NOW)
            .compose(&FilterCriteria {
                projects: vec!["AGBT19A_453_01".to_string()],
                mode: MatchMode::Fuzzy,
                time: TimeOptions {
                    last: Some(2.0),
                    after: Some(datetime!(2020-01-01 00:00:00)),
                    ..TimeOptions::default()
                },
                ..FilterCriteria::default()
            })
            .expect_err("conflicting time options must fail");
        assert!(err.message.contains("only one of"));
    }

    #[test]
    fn fuzzy_projects_include_loose_pattern_and_session_window() {
        let spec = QueryComposer::new(&OneScan, NOW)
            .compose(&FilterCriteria {
                projects: vec!["AGBT19A_453_01".to_string()],
                mode: MatchMode::Fuzzy,
                ..FilterCriteria::default()
            })
            .expect("fuzzy project should compose");

        let Predicate::All(parts) = &spec.predicate else {
            panic!("expected names AND session window, got {:?}", spec.predicate);
        };
        assert!(matches!(
            &parts[0],
            Predicate::Any(names) if names.len() == 2
        ));
        assert_eq!(
            parts[1],
            Predicate::AtLeast {
                field: Field::ExecutedAt,
                value: datetime!(2019-03-05 03:45:00),
            }
        );
        assert_eq!(
            parts[2],
            Predicate::AtMost {
                field: Field::ExecutedAt,
                value: datetime!(2019-03-05 04:15:00),
            }
        );
    }

    #[test]
    fn content_search_is_substring_unless_regex() {
        let fuzzy = QueryComposer::new(&NoScanLogs, NOW)
            .compose(&FilterCriteria {
                search_logs: vec!["error".to_string()],
                ..FilterCriteria::default()
            })
            .expect("log search should compose");
        assert!(matches!(
            fuzzy.predicate,
            Predicate::Match {
                field: Field::Log,
                mode: MatchMode::Fuzzy,
                ..
            }
        ));

        let regex = QueryComposer::new(&NoScanLogs, NOW)
            .compose(&FilterCriteria {
                search_scripts: vec!["Slew\\(".to_string()],
                mode: MatchMode::Regex,
                ..FilterCriteria::default()
            })
            .expect("script regex search should compose");
        assert!(matches!(
            regex.predicate,
            Predicate::Match {
                field: Field::ExecutedScript,
                mode: MatchMode::Regex,
                ..
            }
        ));
    }

    #[test]
    fn malformed_keyword_is_rejected() {
        let err = QueryComposer::new(&NoScanLogs, NOW)
            .compose(&FilterCriteria {
                keywords: vec!["receiver".to_string()],
                ..FilterCriteria::default()
            })
            .expect_err("keyword without = must fail");
        assert!(err.message.contains("key=value"));
    }
}
