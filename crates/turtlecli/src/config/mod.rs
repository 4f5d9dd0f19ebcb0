use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};

pub const DEFAULT_SCIENCE_DATA_ROOT: &str = "/home/archive/science-data";
pub const DEFAULT_TEST_DATA_ROOT: &str = "/home/archive/test-data";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides<'a> {
    pub database: Option<&'a Path>,
    pub science_data_root: Option<&'a Path>,
    pub test_data_root: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub database: PathBuf,
    pub science_data_root: PathBuf,
    pub test_data_root: PathBuf,
}

pub fn resolve_runtime_config(
    home_dir: &Path,
    cwd: &Path,
    overrides: &ConfigOverrides<'_>,
) -> Result<RuntimeConfig> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let resolve = |path: Option<&Path>, default: PathBuf| -> Result<PathBuf> {
        match path {
            Some(path) => resolve_user_path(path, &home_dir, &cwd),
            None => Ok(normalize_lexical(&default)),
        }
    };

    let database = resolve(
        overrides.database,
        home_dir.join(".turtlecli").join("turtle.sqlite"),
    )?;
    let science_data_root = resolve(
        overrides.science_data_root,
        PathBuf::from(DEFAULT_SCIENCE_DATA_ROOT),
    )?;
    let test_data_root = resolve(overrides.test_data_root, PathBuf::from(DEFAULT_TEST_DATA_ROOT))?;

    Ok(RuntimeConfig {
        home_dir,
        cwd,
        database,
        science_data_root,
        test_data_root,
    })
}

impl RuntimeConfig {
    /// Resolves an output path given on the command line.
    pub fn resolve_output_path(&self, path: &Path) -> Result<PathBuf> {
        resolve_user_path(path, &self.home_dir, &self.cwd)
    }
}

fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            bail!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}
