use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use time::{Duration, PrimitiveDateTime};
use tracing::{debug, info};

use crate::query::window::TimeWindow;
use crate::scanlog::{ArchiveKind, ScanLogKey, ScanLogSource};
use crate::utils::time::format_store_timestamp;

/// Scan-log timestamps below this count each get their own window.
pub const DISCRETE_SESSION_LIMIT: usize = 100;

/// Tolerance between the history store clock and the scan-log clock.
pub const SESSION_CUSHION: Duration = Duration::minutes(15);

fn project_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        RegexBuilder::new(
            r"(?P<prefix>(?P<type>[AT])?\w*?)(?P<year>\d{2,4})(?P<semester>[ABC])[_\s\-]?(?P<code>\d{0,10})[_\s\-]?(?P<session>\d+)?",
        )
        .case_insensitive(true)
        .build()
        .expect("project name regex should compile")
    })
}

/// Structural parts of a project identifier such as `AGBT19A_453_01`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedProjectName {
    pub type_flag: Option<char>,
    pub prefix: String,
    pub year: String,
    pub semester: String,
    pub code: String,
    pub session: Option<String>,
}

impl ParsedProjectName {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = project_name_regex().captures(raw)?;
        let text = |name: &str| {
            captures
                .name(name)
                .map(|matched| matched.as_str().to_string())
                .unwrap_or_default()
        };

        Some(Self {
            type_flag: captures
                .name("type")
                .and_then(|matched| matched.as_str().chars().next()),
            prefix: text("prefix"),
            year: text("year"),
            semester: text("semester"),
            code: text("code"),
            session: captures
                .name("session")
                .map(|matched| matched.as_str().to_string()),
        })
    }

    /// `[type]?rest year .* semester .* code`, every literal part escaped.
    ///
    /// The type letter is optional so that `GBT19A453` still finds `AGBT19A_453`.
    #[must_use]
    pub fn loose_pattern(&self) -> String {
        let (type_part, rest) = match self.type_flag {
            Some(flag) => (
                format!("{}?", regex::escape(&flag.to_string())),
                self.prefix.get(flag.len_utf8()..).unwrap_or_default(),
            ),
            None => (String::new(), self.prefix.as_str()),
        };
        format!(
            "{type_part}{}{}.*{}.*{}",
            regex::escape(rest),
            regex::escape(&self.year),
            regex::escape(&self.semester),
            regex::escape(&self.code)
        )
    }

    #[must_use]
    pub fn archive(&self) -> ArchiveKind {
        match self.type_flag {
            Some(flag) if flag.eq_ignore_ascii_case(&'t') => ArchiveKind::Test,
            _ => ArchiveKind::Science,
        }
    }

    /// Only names with a session number can be looked up.
    #[must_use]
    pub fn scan_log_key(&self) -> Option<ScanLogKey> {
        let session = self.session.clone()?;
        Some(ScanLogKey {
            archive: self.archive(),
            year: self.year.clone(),
            semester: self.semester.clone(),
            code: self.code.clone(),
            session,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedProject {
    pub raw: String,
    pub parsed: Option<ParsedProjectName>,
    /// Case-insensitive, unanchored pattern for the project name column.
    pub core_pattern: String,
    /// OR-combined execution windows recovered from the scan log.
    pub session_windows: Option<Vec<TimeWindow>>,
}

pub struct ProjectNameNormalizer<'a> {
    scan_logs: &'a dyn ScanLogSource,
}

impl<'a> ProjectNameNormalizer<'a> {
    #[must_use]
    pub fn new(scan_logs: &'a dyn ScanLogSource) -> Self {
        Self { scan_logs }
    }

    #[must_use]
    pub fn normalize(&self, raw: &str) -> NormalizedProject {
        let Some(parsed) = ParsedProjectName::parse(raw) else {
            debug!(project = raw, "project name is unstructured; matching it literally");
            return NormalizedProject {
                raw: raw.to_string(),
                parsed: None,
                core_pattern: format!("^{}$", regex::escape(raw)),
                session_windows: None,
            };
        };

        let core_pattern = parsed.loose_pattern();
        debug!(project = raw, pattern = %core_pattern, "derived loose project-name pattern");

        let session_windows = parsed
            .scan_log_key()
            .and_then(|key| self.resolve_session(raw, &key));

        NormalizedProject {
            raw: raw.to_string(),
            parsed: Some(parsed),
            core_pattern,
            session_windows,
        }
    }

    fn resolve_session(&self, raw: &str, key: &ScanLogKey) -> Option<Vec<TimeWindow>> {
        let times = match self.scan_logs.execution_times(key) {
            Ok(times) => times,
            Err(reason) => {
                info!(
                    project = raw,
                    session = %key,
                    %reason,
                    "session scan log unavailable; ignoring the session identifier"
                );
                return None;
            }
        };

        let (first, last) = (times.first()?, times.last()?);
        let windows = session_windows(&times);
        if times.len() < DISCRETE_SESSION_LIMIT {
            info!(
                project = raw,
                session = %key,
                scans = times.len(),
                first = %format_store_timestamp(*first),
                last = %format_store_timestamp(*last),
                "restricting project to windows around each scan"
            );
        } else {
            info!(
                project = raw,
                session = %key,
                scans = times.len(),
                first = %format_store_timestamp(*first),
                last = %format_store_timestamp(*last),
                "too many scans for discrete windows; restricting project to the session span"
            );
        }
        Some(windows)
    }
}

/// Windows for sorted scan timestamps: one per scan below the discrete limit,
/// otherwise a single window spanning first to last, each widened by the cushion.
#[must_use]
pub fn session_windows(times: &[PrimitiveDateTime]) -> Vec<TimeWindow> {
    let cushioned = |start: PrimitiveDateTime, end: PrimitiveDateTime| {
        TimeWindow::between(
            start.saturating_sub(SESSION_CUSHION),
            end.saturating_add(SESSION_CUSHION),
        )
    };

    if times.len() < DISCRETE_SESSION_LIMIT {
        return times.iter().map(|time| cushioned(*time, *time)).collect();
    }
    match (times.first(), times.last()) {
        (Some(first), Some(last)) => vec![cushioned(*first, *last)],
        _ => Vec::new(),
    }
}
