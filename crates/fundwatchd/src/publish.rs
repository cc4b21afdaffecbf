use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use chrono::NaiveDate;
use fundwatch_config::PublishConfig;
use fundwatch_core::{ChangeReport, GitContext, Secret, Snapshot, SnapshotStats};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no push credential in {0} and no publish.remote_url configured")]
    MissingCredential(String),
    #[error("no publish target: set publish.repo or publish.remote_url")]
    MissingTarget,
    #[error("{0} is not inside a git work tree")]
    NotARepository(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },
}

/// Mirrors the durable snapshot into version control.
#[derive(Debug, Clone)]
pub struct Publisher {
    config: PublishConfig,
    token: Option<Secret>,
}

impl Publisher {
    pub fn new(config: PublishConfig) -> Self {
        let token = Secret::from_env(&config.token_env);
        Self { config, token }
    }

    pub fn with_token(mut self, token: Option<Secret>) -> Self {
        self.token = token;
        self
    }

    /// Commits and pushes `snapshot_path` when it differs materially from `HEAD`.
    ///
    /// An unchanged snapshot still pushes `HEAD` when an earlier push never
    /// reached the target branch. `Ok(false)` means there was nothing to publish.
    pub fn publish(
        &self,
        snapshot_path: &Path,
        stats: &SnapshotStats,
        changes: &ChangeReport,
        date: NaiveDate,
    ) -> Result<bool, PublishError> {
        if !self.config.enabled {
            tracing::debug!("publishing disabled");
            return Ok(false);
        }

        let parent = snapshot_path.parent().unwrap_or(Path::new("."));
        let context = GitContext::open(parent)
            .ok_or_else(|| PublishError::NotARepository(snapshot_path.to_path_buf()))?;
        let workdir = context
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| PublishError::NotARepository(snapshot_path.to_path_buf()))?;

        let current = fs::read(snapshot_path).map_err(|source| PublishError::Read {
            path: snapshot_path.to_path_buf(),
            source,
        })?;
        if let Some(committed) = context.committed_file(snapshot_path)
            && materially_equal(&committed, &current)
        {
            let push_url = self.push_url()?;
            if !self.target_is_behind(&workdir, &push_url)? {
                tracing::info!(path = %snapshot_path.display(), "snapshot unchanged since last commit");
                return Ok(false);
            }
            tracing::warn!(branch = %self.config.branch, "pushing commit left unpublished by an earlier run");
            self.push(&workdir, &push_url)?;
            return Ok(true);
        }

        let push_url = self.push_url()?;
        let pathspec = fs::canonicalize(snapshot_path)
            .map_err(|source| PublishError::Read {
                path: snapshot_path.to_path_buf(),
                source,
            })?
            .to_string_lossy()
            .into_owned();
        let message = commit_message(stats, changes, date);
        let author_name = format!("user.name={}", self.config.author_name);
        let author_email = format!("user.email={}", self.config.author_email);

        self.git(&workdir, &["add", "--", &pathspec])?;
        self.git(
            &workdir,
            &[
                "-c",
                &author_name,
                "-c",
                &author_email,
                "commit",
                "--quiet",
                "-m",
                &message,
                "--",
                &pathspec,
            ],
        )?;
        tracing::info!(branch = %self.config.branch, "committed snapshot, pushing");
        self.push(&workdir, &push_url)?;

        Ok(true)
    }

    fn push(&self, workdir: &Path, push_url: &Secret) -> Result<(), PublishError> {
        let refspec = format!("HEAD:{}", self.config.branch);
        self.git(workdir, &["push", "--quiet", push_url.expose(), &refspec])?;
        Ok(())
    }

    /// True when the target branch is missing or a strict ancestor of `HEAD`.
    fn target_is_behind(&self, workdir: &Path, push_url: &Secret) -> Result<bool, PublishError> {
        let head = self.git(workdir, &["rev-parse", "HEAD"])?;
        let branch_ref = format!("refs/heads/{}", self.config.branch);
        let listing = self.git(workdir, &["ls-remote", push_url.expose(), &branch_ref])?;

        let Some(remote_head) = listing.split_whitespace().next() else {
            return Ok(true);
        };
        if remote_head == head {
            return Ok(false);
        }
        // Unknown or diverged remote heads are left alone.
        self.git_succeeds(workdir, &["merge-base", "--is-ancestor", remote_head, "HEAD"])
    }

    fn push_url(&self) -> Result<Secret, PublishError> {
        if let Some(remote_url) = &self.config.remote_url {
            return Ok(Secret::new(remote_url.clone()));
        }

        let repo = self.config.repo.as_deref().ok_or(PublishError::MissingTarget)?;
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| PublishError::MissingCredential(self.config.token_env.clone()))?;
        Ok(Secret::new(format!(
            "https://x-access-token:{}@github.com/{repo}.git",
            token.expose()
        )))
    }

    fn git(&self, workdir: &Path, args: &[&str]) -> Result<String, PublishError> {
        let (command, output) = self.run_git(workdir, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PublishError::Git {
                command,
                stderr: self.redact(stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    fn git_succeeds(&self, workdir: &Path, args: &[&str]) -> Result<bool, PublishError> {
        let (_, output) = self.run_git(workdir, args)?;
        Ok(output.status.success())
    }

    fn run_git(&self, workdir: &Path, args: &[&str]) -> Result<(String, Output), PublishError> {
        let command = args
            .iter()
            .find(|arg| !arg.starts_with('-') && !arg.contains('='))
            .copied()
            .unwrap_or("git")
            .to_owned();

        let output = Command::new("git")
            .args(args)
            .current_dir(workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|source| PublishError::Spawn {
                command: command.clone(),
                source,
            })?;
        Ok((command, output))
    }

    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) => token.redact(text),
            None => text.to_owned(),
        }
    }
}

/// Byte equality, or equal content once the generation timestamp is ignored.
fn materially_equal(committed: &[u8], current: &[u8]) -> bool {
    if committed == current {
        return true;
    }
    match (
        serde_json::from_slice::<Snapshot>(committed),
        serde_json::from_slice::<Snapshot>(current),
    ) {
        (Ok(committed), Ok(current)) => committed.same_content(&current),
        _ => false,
    }
}

pub fn commit_message(stats: &SnapshotStats, changes: &ChangeReport, date: NaiveDate) -> String {
    let mut message = format!(
        "Auto-update: funding data ({})\n\nStats:\n- Regions: {}\n- Records: {}\n- Total: ${}\n",
        date.format("%Y-%m-%d"),
        stats.region_count,
        stats.record_count,
        format_dollars(stats.total_amount)
    );

    let mut details = Vec::new();
    if !changes.new_records.is_empty() {
        details.push(format!("Added: {} records", changes.new_records.len()));
    }
    if !changes.removed_records.is_empty() {
        details.push(format!("Removed: {} records", changes.removed_records.len()));
    }
    if !changes.amount_changes.is_empty() {
        let sign = if changes.total_delta < 0 { "-" } else { "+" };
        details.push(format!(
            "Funding changes: {} regions (net {sign}${})",
            changes.amount_changes.len(),
            format_dollars(changes.total_delta.unsigned_abs())
        ));
    }
    if !details.is_empty() {
        message.push('\n');
        for line in details {
            message.push_str(&line);
            message.push('\n');
        }
    }

    message
}

fn format_dollars(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}
