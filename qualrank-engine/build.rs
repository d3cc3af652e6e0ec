//! Stamps the `qualrank` binary with its origin.
//!
//! `QUALRANK_COMMIT`, `QUALRANK_BUILT_AT` and `QUALRANK_PROFILE` end up in the
//! worker's start-up log line.

use chrono::{SecondsFormat, Utc};
use std::env;
use std::process::Command;

fn git_short_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    let hash = hash.trim();
    (!hash.is_empty()).then(|| hash.to_string())
}

fn emit(key: &str, value: &str) {
    println!("cargo:rustc-env={}={}", key, value);
}

fn main() {
    // HEAD moves on checkout, the branch ref on commit
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs/heads");

    let commit = git_short_hash().unwrap_or_else(|| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let built_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    emit("QUALRANK_COMMIT", &commit);
    emit("QUALRANK_BUILT_AT", &built_at);
    emit("QUALRANK_PROFILE", &profile);
}
