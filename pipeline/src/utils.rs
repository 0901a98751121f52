//! Utility functions

use std::fmt::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shipyard_domain::StageName;

/// Build identity of the running binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Exponential cooldown after consecutive failures
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

/// Delay after `failures` consecutive failures, capped at `max_delay`
pub fn calc_exp_backoff(options: &CooldownOptions, failures: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(failures as i32);
    Duration::from_secs_f64(delay_secs.min(options.max_delay.as_secs_f64()))
}

/// Random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Idempotency token for a task launched on behalf of a deployment stage
///
/// Redelivered jobs derive the same token, so the scheduler returns the task it already
/// started instead of launching a second one. Hex SHA-256, 64 characters, the longest
/// token the scheduler accepts.
pub fn client_token(deployment_id: &str, stage: StageName) -> String {
    let digest = Sha256::digest(format!("{}:{}", deployment_id, stage).as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut token, byte| {
        let _ = write!(token, "{:02x}", byte);
        token
    })
}
