//! Project configuration read by the pipeline

use serde::{Deserialize, Serialize};

/// What a project deploys as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Frontend,
    Backend,
}

/// User-supplied environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Source repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub repo_url: String,

    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Frontend build configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrontendBuild {
    pub install_command: String,
    pub build_command: String,
    pub out_dir: String,

    /// Runtime version selecting the build image, e.g. "20"
    pub version: String,
}

/// Backend build configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendBuild {
    pub install_command: String,
    pub run_command: String,
    pub version: String,
}

/// Routing configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domains {
    #[serde(default)]
    pub subdomain: String,
}

/// Deployment target configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub kind: ProjectType,

    pub git: GitSource,

    #[serde(default)]
    pub frontend_build: FrontendBuild,

    #[serde(default)]
    pub backend_build: BackendBuild,

    /// Ordered, keys unique
    #[serde(default)]
    pub envs: Vec<EnvVar>,

    #[serde(default = "default_entry_directory")]
    pub entry_directory: String,

    #[serde(default)]
    pub domains: Domains,

    /// Artifact of the currently live deployment, if any
    #[serde(default)]
    pub current_artifact_url: Option<String>,
}

fn default_entry_directory() -> String {
    "./".to_string()
}
