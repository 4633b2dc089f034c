use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(
        "authentication with Slack failed: {code}. Double-check the token and try again; \
         error codes are listed at https://api.slack.com/methods/auth.test"
    )]
    AuthFailed { code: String },
    #[error("no Slack token: set SLACK_TOKEN or write it to {}", .0.display())]
    MissingToken(PathBuf),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("archive is locked by another run: {}", .0.display())]
    ArchiveLocked(PathBuf),
    #[error("slack api `{method}` still rate limited after {retries} retries")]
    RateLimited { method: String, retries: u32 },
    #[error("slack api `{method}` returned error: {error}")]
    Api { method: String, error: String },
}
