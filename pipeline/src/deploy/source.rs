//! Source checkout

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shipyard_domain::CommitInfo;
use tokio::sync::Mutex;

use crate::errors::ShipyardError;

/// Fetches a branch of a repository into a working tree
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Check out `branch` into `dest` and report the commit it points at
    ///
    /// Fetching into a directory that already holds the repository updates it in place.
    async fn fetch(
        &self,
        repo_url: &str,
        branch: &str,
        token: Option<&str>,
        dest: &Path,
    ) -> Result<CommitInfo, ShipyardError>;
}

/// A fetch the memory source received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub repo_url: String,
    pub branch: String,
    pub dest: PathBuf,
}

/// Source that reports fixed commits without touching the network
#[derive(Default)]
pub struct MemorySource {
    commits: Mutex<HashMap<String, CommitInfo>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit reported for `repo_url`; unknown repositories fail to fetch
    pub async fn insert_repo(&self, repo_url: &str, commit: CommitInfo) {
        self.commits
            .lock()
            .await
            .insert(repo_url.to_string(), commit);
    }

    pub async fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl SourceFetcher for MemorySource {
    async fn fetch(
        &self,
        repo_url: &str,
        branch: &str,
        _token: Option<&str>,
        dest: &Path,
    ) -> Result<CommitInfo, ShipyardError> {
        self.calls.lock().await.push(FetchCall {
            repo_url: repo_url.to_string(),
            branch: branch.to_string(),
            dest: dest.to_path_buf(),
        });

        self.commits
            .lock()
            .await
            .get(repo_url)
            .cloned()
            .ok_or_else(|| ShipyardError::GitError(format!("repository {} not found", repo_url)))
    }
}
