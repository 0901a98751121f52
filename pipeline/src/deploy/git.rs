//! Git checkout

use std::path::Path;

use async_trait::async_trait;
use shipyard_domain::CommitInfo;
use tokio::process::Command;
use tracing::{debug, error, info};
use url::Url;

use crate::deploy::source::SourceFetcher;
use crate::errors::ShipyardError;

/// User name git hosts accept alongside an access token
const TOKEN_USER: &str = "x-access-token";

/// Fetches repositories with the `git` binary
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git_bin: String,
}

impl GitFetcher {
    pub fn new(git_bin: &str) -> Self {
        Self {
            git_bin: git_bin.to_string(),
        }
    }

    async fn git(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        action: &str,
    ) -> Result<String, ShipyardError> {
        let mut command = Command::new(&self.git_bin);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        command.env("GIT_TERMINAL_PROMPT", "0");

        let output = command
            .args(args)
            .output()
            .await
            .map_err(|e| ShipyardError::GitError(format!("Failed to run git {}: {}", action, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("git {} failed: {}", action, stderr.trim());
            return Err(ShipyardError::GitError(format!(
                "git {} failed with {}",
                action, output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new("git")
    }
}

/// Repository URL with the access token embedded as credentials
pub fn authenticated_url(repo_url: &str, token: Option<&str>) -> Result<String, ShipyardError> {
    let token = match token {
        Some(token) if !token.is_empty() => token,
        _ => return Ok(repo_url.to_string()),
    };

    let mut url = Url::parse(repo_url)
        .map_err(|e| ShipyardError::GitError(format!("invalid repository url: {}", e)))?;
    let no_credentials =
        |_| ShipyardError::GitError("repository url cannot carry credentials".to_string());
    url.set_username(TOKEN_USER).map_err(no_credentials)?;
    url.set_password(Some(token)).map_err(no_credentials)?;
    Ok(url.to_string())
}

/// Split `git log -1 --format=%H%n%s` output
fn parse_commit(output: &str) -> CommitInfo {
    let mut lines = output.lines();
    CommitInfo {
        hash: lines.next().unwrap_or_default().trim().to_string(),
        message: lines.next().unwrap_or_default().trim().to_string(),
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(
        &self,
        repo_url: &str,
        branch: &str,
        token: Option<&str>,
        dest: &Path,
    ) -> Result<CommitInfo, ShipyardError> {
        info!("Syncing Git repository: {} (branch: {}) to {}", repo_url, branch, dest.display());
        let remote = authenticated_url(repo_url, token)?;

        // 1. Clone or update in place
        if dest.join(".git").exists() {
            debug!("Target directory exists, fetching updates...");
            self.git(Some(dest), &["fetch", "--depth", "1", &remote, branch], "fetch")
                .await?;
            self.git(Some(dest), &["reset", "--hard", "FETCH_HEAD"], "reset")
                .await?;
        } else {
            debug!("Cloning repository to {}...", dest.display());
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let dest_str = dest.to_string_lossy();
            self.git(
                None,
                &["clone", "--depth", "1", "-b", branch, &remote, &dest_str],
                "clone",
            )
            .await?;
        }

        // 2. Read the checked out commit
        let log = self
            .git(Some(dest), &["log", "-1", "--format=%H%n%s"], "log")
            .await?;
        let commit = parse_commit(&log);

        info!("Successfully synced Git repository at {}", commit.hash);
        Ok(commit)
    }
}
