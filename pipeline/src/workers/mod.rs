//! Stage workers

pub mod backend_build;
pub mod clone;
pub mod deploy;
pub mod frontend_build;
pub mod stage;

use std::collections::BTreeMap;

use shipyard_domain::{CommitInfo, EventPayload};

use crate::cluster::NetworkConfig;

/// Where and with which images build tasks run
#[derive(Debug, Clone, Default)]
pub struct BuildSettings {
    pub cluster: String,
    pub network: NetworkConfig,

    /// Container in the build task definition that receives the environment
    pub container_name: String,

    /// Task definition per runtime version, e.g. "20" -> "frontend-builder-20"
    pub task_definitions: BTreeMap<String, String>,
}

impl BuildSettings {
    pub fn task_definition(&self, version: &str) -> Option<&str> {
        self.task_definitions.get(version.trim()).map(String::as_str)
    }
}

/// Payload fields describing the built commit
pub(crate) fn commit_payload(commit: Option<&CommitInfo>) -> EventPayload {
    EventPayload {
        commit_hash: commit.map(|c| c.hash.clone()).filter(|h| !h.is_empty()),
        commit_message: commit.map(|c| c.message.clone()).filter(|m| !m.is_empty()),
        ..Default::default()
    }
}
