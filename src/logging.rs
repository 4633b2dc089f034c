use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SLACK_ARCHIVE_LOG";
const DEFAULT_FILTER: &str = "slack_archive=info";

fn filter_from(raw: Option<&str>) -> EnvFilter {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Progress goes to stderr so stdout stays clean for the command report.
pub fn init() {
    let raw = std::env::var(LOG_ENV).ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_from(raw.as_deref()))
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}
