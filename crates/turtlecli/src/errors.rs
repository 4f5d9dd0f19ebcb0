use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Mutually exclusive or otherwise invalid options. Raised before any store access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Observer,
    Operator,
}

impl EntityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Operator => "operator",
        }
    }

    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Observer => "Observer",
            Self::Operator => "Operator",
        }
    }

    #[must_use]
    pub const fn history_column(self) -> &'static str {
        match self {
            Self::Observer => "observer_id",
            Self::Operator => "operator_id",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicitly named observers/operators that do not exist in the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("given {entity_kind} names not found: {}", missing.join(", "))]
pub struct LookupError {
    pub entity_kind: EntityKind,
    pub missing: Vec<String>,
}
