//! Git metadata for the project repository.
//!
//! Only a handful of read-only facts are needed: branch, remote URL, latest
//! commit and latest tag. [`GitCommand`] shells out to `git -C <repo>`.
use crate::error::{FairError, FairResult};
use std::path::Path;
use std::process::Command;
use tracing::{debug, error};

pub trait GitMetadata {
    fn active_branch(&self, repo: &Path) -> FairResult<String>;

    fn remote_url(&self, repo: &Path, label: &str) -> FairResult<String>;

    /// Hash of `HEAD`, suffixed with `-dirty` when uncommitted changes exist
    /// and `allow_dirty` is set.
    fn latest_commit(&self, repo: &Path, allow_dirty: bool) -> FairResult<String>;

    /// Most recently created tag, if any.
    fn latest_tag(&self, repo: &Path) -> FairResult<Option<String>>;
}

/// [`GitMetadata`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCommand {
    program: String,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, repo: &Path, args: &[&str]) -> FairResult<String> {
        debug!(repo = %repo.display(), ?args, "running git");
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(repo)
            .args(args)
            .output()
            .map_err(|err| {
                FairError::repository(
                    format!("Failed to run '{} {}': {err}", self.program, args.join(" ")),
                    Some("Is git installed and on PATH?"),
                )
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FairError::repository(
                format!(
                    "Location '{}' is not a valid git repository: {}",
                    repo.display(),
                    stderr.trim()
                ),
                None,
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitMetadata for GitCommand {
    fn active_branch(&self, repo: &Path) -> FairResult<String> {
        self.run(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn remote_url(&self, repo: &Path, label: &str) -> FairResult<String> {
        self.run(repo, &["remote", "get-url", label]).map_err(|_| {
            FairError::cli_config(format!("Failed to retrieve URL for git remote '{label}'"))
        })
    }

    fn latest_commit(&self, repo: &Path, allow_dirty: bool) -> FairResult<String> {
        debug!(allow_dirty, "retrieving latest commit SHA");
        let head = self.run(repo, &["rev-parse", "HEAD"]).map_err(|_| {
            FairError::repository(
                format!(
                    "Failed to retrieve latest commit for local repository '{}'",
                    repo.display()
                ),
                Some("Have any changes been committed in the project repository?"),
            )
        })?;
        let status = self.run(repo, &["status", "--porcelain", "--untracked-files=no"])?;
        if status.is_empty() {
            return Ok(head);
        }
        if !allow_dirty {
            let changes: Vec<&str> = status
                .lines()
                .filter_map(|line| line.get(3..))
                .collect();
            error!(
                "Cannot retrieve latest commit for repository with allow_dirty=false, \
                 the following files have uncommitted changes:\n\t- {}",
                changes.join("\n\t- ")
            );
            return Err(FairError::repository(
                "Cannot retrieve latest commit, repository contains uncommitted changes",
                Some("Commit the changes or rerun with --allow-dirty"),
            ));
        }
        Ok(format!("{head}-dirty"))
    }

    fn latest_tag(&self, repo: &Path) -> FairResult<Option<String>> {
        let tags = self.run(repo, &["tag", "--sort=-creatordate"])?;
        Ok(tags.lines().next().map(str::to_string))
    }
}
