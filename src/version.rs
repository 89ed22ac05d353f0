use chrono::{DateTime, Local};

fn build_time_str(format: &str) -> String {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    let build_datetime: DateTime<Local> = DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now);
    build_datetime.format(format).to_string()
}

pub fn get_version_info() -> &'static str {
    Box::leak(
        format!(
            "voip-client {}\n\
         Build Time: {}\n\
         Git Commit: {}\n\
         Git Branch: {}\n\
         Git Status: {}",
            env!("CARGO_PKG_VERSION"),
            build_time_str("%Y-%m-%d %H:%M:%S %Z"),
            env!("GIT_COMMIT_HASH"),
            env!("GIT_BRANCH"),
            env!("GIT_DIRTY")
        )
        .into_boxed_str(),
    )
}

pub fn get_short_version() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let git_commit = env!("GIT_COMMIT_HASH");
    if env!("GIT_DIRTY") == "dirty" {
        format!("{}-{}-dirty", version, git_commit)
    } else {
        format!("{}-{}", version, git_commit)
    }
}

/// User-Agent header sent to the TTS service
pub fn get_useragent() -> String {
    format!(
        "voip-client/{} (built {})",
        env!("CARGO_PKG_VERSION"),
        build_time_str("%Y-%m-%d")
    )
}
