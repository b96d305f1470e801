use chrono::{DateTime, Local};

fn build_date(format: &str) -> String {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    let build_datetime: DateTime<Local> = DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now);
    build_datetime.format(format).to_string()
}

pub fn get_version_info() -> &'static str {
    Box::leak(
        format!(
            "zapvoice {}\n\
         Build Time: {}\n\
         Git Commit: {}\n\
         Git Status: {}",
            env!("CARGO_PKG_VERSION"),
            build_date("%Y-%m-%d %H:%M:%S %Z"),
            env!("GIT_COMMIT_HASH"),
            env!("GIT_DIRTY"),
        )
        .into_boxed_str(),
    )
}

pub fn get_short_version() -> &'static str {
    let version = env!("CARGO_PKG_VERSION");
    let git_commit = env!("GIT_COMMIT_HASH");
    if env!("GIT_DIRTY") == "dirty" {
        Box::leak(format!("{}-{}-dirty", version, git_commit).into_boxed_str())
    } else {
        Box::leak(format!("{}-{}", version, git_commit).into_boxed_str())
    }
}

/// User-Agent sent to the voice provider, classifier and payment gateway.
pub fn get_useragent() -> String {
    format!(
        "zapvoice/{} (built {})",
        env!("CARGO_PKG_VERSION"),
        build_date("%Y-%m-%d")
    )
}
