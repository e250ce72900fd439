//! Embeds build-time version strings reported over control requests.

use std::{env, process::Command};

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string())
}

fn main() {
    let git_revision = env::var("VBC_GIT_REVISION")
        .ok()
        .or_else(|| command_output("git", &["rev-parse", "--short", "HEAD"]))
        .unwrap_or_else(|| "unknown".to_string());

    // "rustc 1.85.0 (4d91de4e4 2025-02-17)" -> "1.85.0"
    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let rustc_version = command_output(&rustc, &["--version"])
        .and_then(|v| v.split_whitespace().nth(1).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=VBC_GIT_REVISION={git_revision}");
    println!("cargo:rustc-env=VBC_RUSTC_VERSION={rustc_version}");
    println!("cargo:rerun-if-env-changed=VBC_GIT_REVISION");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
