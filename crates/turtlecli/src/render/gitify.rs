//! Replays executions as a git history: one commit per execution that changed
//! the script (or log), dated to when the execution ran.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::models::ExecutionRecord;
use crate::render::reports::path_safe;
use crate::utils::time::format_store_timestamp;

pub const COMMIT_MESSAGE: &str = "Commit created by turtlecli";
const COMMITTER_NAME: &str = "turtlecli";
const COMMITTER_EMAIL: &str = "turtlecli@localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GitifySummary {
    pub commits: usize,
    /// Executions whose files matched the previous commit.
    pub unchanged: usize,
}

#[must_use]
pub fn script_file_name(record: &ExecutionRecord) -> String {
    path_safe(&format!(
        "{}.{}.script.py",
        record.project_name, record.script_name
    ))
}

#[must_use]
pub fn log_file_name(record: &ExecutionRecord) -> String {
    path_safe(&format!("{}.{}.log.py", record.project_name, record.script_name))
}

/// Commits every execution, oldest first, into the repository at `directory`,
/// initializing it when needed.
pub fn gitify(
    directory: &Path,
    records: &[ExecutionRecord],
    include_log: bool,
) -> Result<GitifySummary> {
    std::fs::create_dir_all(directory).with_context(|| {
        format!("failed to create gitify directory: {}", directory.display())
    })?;
    let init = ["init", "--quiet"];
    ensure_success(directory, &init, &git(directory, &init)?)?;

    let mut ordered = records.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|record| (record.executed_at, record.id));

    let mut summary = GitifySummary::default();
    for record in ordered {
        if commit_execution(directory, record, include_log)? {
            summary.commits += 1;
        } else {
            summary.unchanged += 1;
        }
    }

    info!(
        directory = %directory.display(),
        commits = summary.commits,
        unchanged = summary.unchanged,
        "gitified history rows"
    );
    Ok(summary)
}

fn commit_execution(directory: &Path, record: &ExecutionRecord, include_log: bool) -> Result<bool> {
    let mut files = vec![(script_file_name(record), record.executed_script.as_str())];
    if include_log {
        files.push((log_file_name(record), record.log.as_str()));
    }
    for (name, contents) in &files {
        let path = directory.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let mut add = vec!["add", "--"];
    add.extend(files.iter().map(|(name, _)| name.as_str()));
    ensure_success(directory, &add, &git(directory, &add)?)?;

    // Exit status 1 means the index differs from HEAD.
    let diff = ["diff", "--cached", "--quiet"];
    let staged = git(directory, &diff)?;
    match staged.status.code() {
        Some(0) => {
            debug!(id = record.id, "execution left files unchanged");
            return Ok(false);
        }
        Some(1) => {}
        _ => {
            ensure_success(directory, &diff, &staged)?;
            bail!("git diff --cached --quiet exited unexpectedly in {}", directory.display());
        }
    }

    let date = format!("{} +0000", format_store_timestamp(record.executed_at));
    let author = match record.observer_name.trim() {
        "" => COMMITTER_NAME,
        name => name,
    };
    let commit = [
        "-c",
        "commit.gpgsign=false",
        "commit",
        "--quiet",
        "--no-verify",
        "-m",
        COMMIT_MESSAGE,
    ];
    let output = git_command(directory, &commit)
        .env("GIT_AUTHOR_NAME", author)
        .env("GIT_AUTHOR_EMAIL", COMMITTER_EMAIL)
        .env("GIT_AUTHOR_DATE", &date)
        .env("GIT_COMMITTER_NAME", COMMITTER_NAME)
        .env("GIT_COMMITTER_EMAIL", COMMITTER_EMAIL)
        .env("GIT_COMMITTER_DATE", &date)
        .output()
        .context("failed to execute git commit")?;
    ensure_success(directory, &commit, &output)?;
    debug!(id = record.id, date = %date, "committed execution");
    Ok(true)
}

fn git_command(directory: &Path, args: &[&str]) -> Command {
    let mut command = Command::new("git");
    command
        .args(args)
        .current_dir(directory)
        .env("GIT_TERMINAL_PROMPT", "0");
    command
}

fn git(directory: &Path, args: &[&str]) -> Result<Output> {
    git_command(directory, args)
        .output()
        .with_context(|| format!("failed to execute git {}", args.join(" ")))
}

fn ensure_success(directory: &Path, args: &[&str], output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    bail!(
        "git {} failed in {} (exit {}): {}",
        args.join(" "),
        directory.display(),
        output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string()),
        String::from_utf8_lossy(&output.stderr).trim()
    );
}
