use regex::RegexBuilder;
use time::PrimitiveDateTime;

use crate::errors::ConfigurationError;
use crate::query::window::TimeWindow;

/// A column reachable from a `History` row through the fixed join graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    ProjectName,
    ScriptName,
    ObserverName,
    OperatorName,
    ExecutedAt,
    ExecutedState,
    ExecutedScript,
    Log,
}

impl Field {
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Id => "h.id",
            Self::ProjectName => "pr.name",
            Self::ScriptName => "p.name",
            Self::ObserverName => "obs.name",
            Self::OperatorName => "op.name",
            Self::ExecutedAt => "h.datetime",
            Self::ExecutedState => "h.executed_state",
            Self::ExecutedScript => "h.executed_script",
            Self::Log => "h.log",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::ProjectName => "project",
            Self::ScriptName => "script",
            Self::ObserverName => "observer",
            Self::OperatorName => "operator",
            Self::ExecutedAt => "datetime",
            Self::ExecutedState => "state",
            Self::ExecutedScript => "script content",
            Self::Log => "log content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchMode {
    /// Case-insensitive equality.
    #[default]
    Exact,
    /// Case-insensitive substring containment.
    Fuzzy,
    /// Case-insensitive, unanchored regular expression.
    Regex,
}

impl MatchMode {
    /// Resolves the mutually exclusive `--exact`/`--fuzzy`/`--regex` flags.
    pub fn from_flags(exact: bool, fuzzy: bool, regex: bool) -> Result<Self, ConfigurationError> {
        match (exact, fuzzy, regex) {
            (_, true, true) => Err(ConfigurationError::new(
                "--fuzzy and --regex are mutually exclusive",
            )),
            (true, true, false) => Err(ConfigurationError::new(
                "--exact and --fuzzy are mutually exclusive",
            )),
            (true, false, true) => Err(ConfigurationError::new(
                "--exact and --regex are mutually exclusive",
            )),
            (_, true, false) => Ok(Self::Fuzzy),
            (_, false, true) => Ok(Self::Regex),
            (_, false, false) => Ok(Self::Exact),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Regex => "regex",
        }
    }
}

/// Composed filter tree. Nothing here touches the store; rendering to SQL
/// happens once, when a [`crate::query::QuerySpec`] is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Match {
        field: Field,
        mode: MatchMode,
        value: String,
    },
    /// Exact, case-sensitive equality against a stored key.
    Equals { field: Field, value: String },
    AtLeast {
        field: Field,
        value: PrimitiveDateTime,
    },
    AtMost {
        field: Field,
        value: PrimitiveDateTime,
    },
    Any(Vec<Predicate>),
    All(Vec<Predicate>),
}

impl Predicate {
    #[must_use]
    pub const fn always() -> Self {
        Self::All(Vec::new())
    }

    #[must_use]
    pub const fn never() -> Self {
        Self::Any(Vec::new())
    }

    #[must_use]
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flattened = Vec::new();
        for predicate in predicates {
            match predicate {
                Self::All(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }
        if flattened.len() == 1 {
            return flattened.remove(0);
        }
        Self::All(flattened)
    }

    #[must_use]
    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flattened = Vec::new();
        for predicate in predicates {
            match predicate {
                Self::Any(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }
        if flattened.len() == 1 {
            return flattened.remove(0);
        }
        Self::Any(flattened)
    }

    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        Self::all([self, other])
    }

    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        Self::any([self, other])
    }

    /// Inclusive range over `field`; an unbounded side contributes nothing.
    #[must_use]
    pub fn within(field: Field, window: &TimeWindow) -> Self {
        let mut bounds = Vec::with_capacity(2);
        if let Some(start) = window.start {
            bounds.push(Self::AtLeast {
                field,
                value: start,
            });
        }
        if let Some(end) = window.end {
            bounds.push(Self::AtMost { field, value: end });
        }
        Self::all(bounds)
    }

    /// Union of several windows over the same field.
    #[must_use]
    pub fn within_any(field: Field, windows: &[TimeWindow]) -> Self {
        Self::any(windows.iter().map(|window| Self::within(field, window)))
    }

    #[must_use]
    pub fn is_always(&self) -> bool {
        matches!(self, Self::All(inner) if inner.is_empty())
    }
}

/// One field, many acceptable values, OR-combined under a single match mode.
pub fn build_field_predicate<S: AsRef<str>>(
    field: Field,
    values: &[S],
    mode: MatchMode,
) -> Result<Predicate, ConfigurationError> {
    if values.is_empty() {
        return Err(ConfigurationError::new(format!(
            "at least one {} value is required",
            field.label()
        )));
    }

    let mut alternatives = Vec::with_capacity(values.len());
    for value in values {
        let value = value.as_ref();
        if mode == MatchMode::Regex {
            validate_regex(value)?;
        }
        alternatives.push(Predicate::Match {
            field,
            mode,
            value: value.to_string(),
        });
    }

    Ok(Predicate::any(alternatives))
}

pub(crate) fn validate_regex(pattern: &str) -> Result<(), ConfigurationError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|_| ())
        .map_err(|error| {
            ConfigurationError::new(format!(
                "invalid regular expression `{pattern}`: {}",
                error.to_string().lines().last().unwrap_or("parse error")
            ))
        })
}
