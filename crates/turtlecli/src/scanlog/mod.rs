pub mod fits;

use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::PrimitiveDateTime;
use tracing::debug;
use walkdir::WalkDir;

pub const SCAN_LOG_FILE_NAME: &str = "ScanLog.fits";

/// Archive flavour, selected by the optional type letter of a project name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Science,
    Test,
}

impl ArchiveKind {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Science => "AGBT",
            Self::Test => "TGBT",
        }
    }
}

/// Identifies one project session in the scan-log archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanLogKey {
    pub archive: ArchiveKind,
    pub year: String,
    pub semester: String,
    pub code: String,
    pub session: String,
}

impl ScanLogKey {
    /// Session directory name, e.g. `AGBT19A_453_01`.
    #[must_use]
    pub fn directory_name(&self) -> String {
        format!(
            "{}{}{}_{}_{}",
            self.archive.prefix(),
            self.year,
            self.semester.to_ascii_uppercase(),
            self.code,
            self.session
        )
    }
}

impl Display for ScanLogKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.directory_name())
    }
}

/// Why a scan-log lookup produced nothing. Always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanLogUnavailable {
    #[error("no {directory}/ScanLog.fits under {}", root.display())]
    NotFound { directory: String, root: PathBuf },
    #[error("{count} candidate {directory}/ScanLog.fits files under {}", root.display())]
    Ambiguous {
        directory: String,
        root: PathBuf,
        count: usize,
    },
    #[error("{} could not be read: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },
    #[error("{} contains no scan timestamps", path.display())]
    Empty { path: PathBuf },
}

/// Best-effort source of execution timestamps for a project session.
pub trait ScanLogSource {
    fn execution_times(
        &self,
        key: &ScanLogKey,
    ) -> Result<Vec<PrimitiveDateTime>, ScanLogUnavailable>;
}

/// Searches the on-disk science and test archives for `<session>/ScanLog.fits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveScanLogSource {
    science_root: PathBuf,
    test_root: PathBuf,
}

impl ArchiveScanLogSource {
    #[must_use]
    pub fn new(science_root: impl Into<PathBuf>, test_root: impl Into<PathBuf>) -> Self {
        Self {
            science_root: science_root.into(),
            test_root: test_root.into(),
        }
    }

    fn root_for(&self, archive: ArchiveKind) -> &Path {
        match archive {
            ArchiveKind::Science => &self.science_root,
            ArchiveKind::Test => &self.test_root,
        }
    }

    fn locate(&self, key: &ScanLogKey) -> Result<PathBuf, ScanLogUnavailable> {
        let root = self.root_for(key.archive);
        let directory = key.directory_name();

        let mut candidates = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_type().is_dir() && entry.file_name().to_str() == Some(directory.as_str())
            })
            .map(|entry| entry.path().join(SCAN_LOG_FILE_NAME))
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();

        debug!(
            root = %root.display(),
            directory = %directory,
            candidates = candidates.len(),
            "searched scan-log archive"
        );

        match candidates.len() {
            0 => Err(ScanLogUnavailable::NotFound {
                directory,
                root: root.to_path_buf(),
            }),
            1 => Ok(candidates.remove(0)),
            count => Err(ScanLogUnavailable::Ambiguous {
                directory,
                root: root.to_path_buf(),
                count,
            }),
        }
    }
}

impl ScanLogSource for ArchiveScanLogSource {
    fn execution_times(
        &self,
        key: &ScanLogKey,
    ) -> Result<Vec<PrimitiveDateTime>, ScanLogUnavailable> {
        let path = self.locate(key)?;
        let bytes = fs::read(&path).map_err(|error| ScanLogUnavailable::Unreadable {
            path: path.clone(),
            reason: error.to_string(),
        })?;
        let times =
            fits::read_scan_times(&bytes).map_err(|error| ScanLogUnavailable::Unreadable {
                path: path.clone(),
                reason: format!("{error:#}"),
            })?;
        if times.is_empty() {
            return Err(ScanLogUnavailable::Empty { path });
        }
        Ok(times)
    }
}

/// Source used when no archive is reachable; every lookup is `NotFound`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScanLogs;

impl ScanLogSource for NoScanLogs {
    fn execution_times(
        &self,
        key: &ScanLogKey,
    ) -> Result<Vec<PrimitiveDateTime>, ScanLogUnavailable> {
        Err(ScanLogUnavailable::NotFound {
            directory: key.directory_name(),
            root: PathBuf::new(),
        })
    }
}
