use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

// Container builds have no .git: the values can be injected through the
// environment instead.
fn main() {
    let build_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);

    let commit = from_env_or_git("GIT_COMMIT_HASH", &["rev-parse", "--short", "HEAD"]);
    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", commit);

    let branch = from_env_or_git("GIT_BRANCH", &["rev-parse", "--abbrev-ref", "HEAD"]);
    println!("cargo:rustc-env=GIT_BRANCH={}", branch);

    let dirty = std::env::var("GIT_DIRTY").unwrap_or_else(|_| git_dirty().to_string());
    println!("cargo:rustc-env=GIT_DIRTY={}", dirty);

    println!("cargo:rerun-if-env-changed=GIT_COMMIT_HASH");
    println!("cargo:rerun-if-env-changed=GIT_BRANCH");
    println!("cargo:rerun-if-env-changed=GIT_DIRTY");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn from_env_or_git(var: &str, args: &[&str]) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| git(args))
        .unwrap_or_else(|| "unknown".to_string())
}

fn git_dirty() -> &'static str {
    match Command::new("git")
        .args(["diff", "--quiet", "--ignore-submodules"])
        .status()
    {
        Ok(status) if status.success() => "clean",
        Ok(status) if status.code() == Some(1) => "dirty",
        _ => "unknown",
    }
}
