//! Embeds the target triple and git revision reported by `scholarfund-monitor version`

use std::process::Command;

fn main() {
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=MONITOR_TARGET={}", target);

    let revision = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());
    if let Some(revision) = revision {
        println!("cargo:rustc-env=MONITOR_GIT_REVISION={}", revision);
    }

    println!("cargo:rerun-if-changed=../.git/HEAD");
}
