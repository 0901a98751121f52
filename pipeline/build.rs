//! Stamps the binary with the commit and time it was built from

use chrono::Utc;
use std::process::Command;

fn git_hash() -> String {
    if let Ok(hash) = std::env::var("SHIPYARD_GIT_HASH") {
        if !hash.trim().is_empty() {
            return hash.trim().to_string();
        }
    }
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", git_hash());
    println!(
        "cargo:rustc-env=BUILD_TIME={}",
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );

    println!("cargo:rerun-if-env-changed=SHIPYARD_GIT_HASH");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
