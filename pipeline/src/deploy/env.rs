//! Launch environment assembly

use shipyard_domain::EnvVar;
use tracing::warn;

/// Keys the runtime sets itself and users may never override
pub const RESERVED_KEYS: [&str; 4] = ["PORT", "NODE_ENV", "START_CMD", "FRONTEND_URL"];

fn is_reserved(key: &str, base: &[EnvVar]) -> bool {
    RESERVED_KEYS.iter().any(|r| r.eq_ignore_ascii_case(key))
        || base.iter().any(|b| b.key.eq_ignore_ascii_case(key))
}

/// Append user variables to `base`
///
/// User keys matching a reserved key or a base key, in any casing, are dropped with a
/// warning. For duplicate user keys the first one wins.
pub fn merge_env(base: Vec<EnvVar>, user: &[EnvVar]) -> Vec<EnvVar> {
    let reserved_base = base.clone();
    let mut merged = base;

    for var in user {
        if var.key.trim().is_empty() {
            continue;
        }
        if is_reserved(&var.key, &reserved_base) {
            warn!("Dropping reserved environment variable {} from project envs", var.key);
            continue;
        }
        if merged.iter().any(|m| m.key == var.key) {
            warn!("Dropping duplicate environment variable {}", var.key);
            continue;
        }
        merged.push(var.clone());
    }

    merged
}

/// Base environment of a backend service container
pub fn service_base_env(start_command: &str, public_url: &str, port: u16) -> Vec<EnvVar> {
    vec![
        EnvVar::new("NODE_ENV", "production"),
        EnvVar::new("START_CMD", start_command),
        EnvVar::new("FRONTEND_URL", public_url),
        EnvVar::new("PORT", port.to_string()),
    ]
}
