//! Build script for the `ferry` binary.
//!
//! Exposes `FERRY_GIT_HASH`, `FERRY_BUILD_DATE` and `FERRY_TARGET` to
//! `--version`.

use std::path::Path;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn main() {
    // Packaged sources have no .git to watch
    let git_dir = Path::new("../../.git");
    if git_dir.exists() {
        println!("cargo::rerun-if-changed=../../.git/HEAD");
        println!("cargo::rerun-if-changed=../../.git/index");
    }

    let hash = match git(&["rev-parse", "--short=10", "HEAD"]) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                .is_some_and(|s| !s.is_empty());
            if dirty { format!("{hash}-dirty") } else { hash }
        }
        None => "unknown".to_string(),
    };

    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=FERRY_GIT_HASH={hash}");
    println!("cargo:rustc-env=FERRY_BUILD_DATE={date}");
    println!("cargo:rustc-env=FERRY_TARGET={target}");
}
