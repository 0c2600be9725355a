//! Embeds the source revision as `GIT_HASH` for the startup log line

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
    println!("cargo:rerun-if-env-changed=CATTLENET_BUILD_REV");

    // Packaged builds have no .git; the packager passes the revision in
    let revision = std::env::var("CATTLENET_BUILD_REV")
        .ok()
        .filter(|rev| !rev.trim().is_empty())
        .or_else(git_revision)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", revision.trim());
}

/// Short hash with a `-dirty` suffix for uncommitted trees
fn git_revision() -> Option<String> {
    let output = Command::new("git").args(["describe", "--always", "--dirty", "--abbrev=8"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!rev.is_empty()).then_some(rev)
}
