use std::process::Command;

/// Embed a short commit id as `GIT_HASH`. CI can pin it through the
/// environment when the build runs outside a checkout.
fn main() {
    println!("cargo:rerun-if-env-changed=GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let hash = std::env::var("GIT_HASH")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(describe)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=GIT_HASH={}", hash.trim());
}

fn describe() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok()
}
