use crate::archive::backup::RetentionPolicy;
use crate::archive::paths::ArchivePaths;
use crate::error::ArchiveError;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CHANNEL_TYPES: &[&str] = &["public_channel", "private_channel", "mpim", "im"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub api_base_url: String,
    pub page_size: u32,
    pub max_retries: u32,
    pub channel_types: Vec<String>,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://slack.com/api".to_string(),
            page_size: 200,
            max_retries: 5,
            channel_types: CHANNEL_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub keep: usize,
    pub max_age_hours: Option<u64>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            keep: policy.keep,
            max_age_hours: policy.max_age_hours,
        }
    }
}

impl BackupConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep: self.keep,
            max_age_hours: self.max_age_hours,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub avatars: bool,
    pub files: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            avatars: true,
            files: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    pub slack: SlackConfig,
    pub backup: BackupConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSyncConfig {
    slack: Option<SlackConfig>,
    backup: Option<BackupConfig>,
    download: Option<DownloadConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = parse_csv(&v);
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

pub fn validate(cfg: &SyncConfig) -> Result<()> {
    if cfg.slack.api_base_url.trim().is_empty() {
        return Err(anyhow!("invalid slack api base url: cannot be empty"));
    }
    if !(1..=1000).contains(&cfg.slack.page_size) {
        return Err(anyhow!("invalid slack page size: require 1 <= size <= 1000"));
    }
    if cfg.slack.channel_types.is_empty() {
        return Err(anyhow!("invalid channel types: select at least one"));
    }
    if let Some(bad) = cfg
        .slack
        .channel_types
        .iter()
        .find(|t| !CHANNEL_TYPES.contains(&t.as_str()))
    {
        return Err(anyhow!(
            "invalid channel type `{bad}`: use one of {}",
            CHANNEL_TYPES.join(", ")
        ));
    }
    if cfg.backup.keep == 0 {
        return Err(anyhow!("invalid backup keep count: must be >= 1"));
    }
    if cfg.backup.max_age_hours == Some(0) {
        return Err(anyhow!("invalid backup max age: must be >= 1 hour"));
    }
    Ok(())
}

pub fn resolve_config_path(paths: &ArchivePaths) -> PathBuf {
    match env::var("SLACK_ARCHIVE_CONFIG_PATH") {
        Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim()),
        _ => paths.base_dir.join("slack-archive.toml"),
    }
}

fn merge_file_config(base: &mut SyncConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: PartialSyncConfig = toml::from_str(&raw).map_err(|err| {
        ArchiveError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(slack) = parsed.slack {
        base.slack = slack;
    }
    if let Some(backup) = parsed.backup {
        base.backup = backup;
    }
    if let Some(download) = parsed.download {
        base.download = download;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut SyncConfig) {
    cfg.slack.api_base_url = env_or_string("SLACK_ARCHIVE_API_BASE_URL", &cfg.slack.api_base_url);
    cfg.slack.page_size = env_or_u32("SLACK_ARCHIVE_PAGE_SIZE", cfg.slack.page_size);
    cfg.slack.max_retries = env_or_u32("SLACK_ARCHIVE_MAX_RETRIES", cfg.slack.max_retries);
    cfg.slack.channel_types = env_or_csv("SLACK_ARCHIVE_CHANNEL_TYPES", &cfg.slack.channel_types);
    cfg.backup.keep = env_or_u64("SLACK_ARCHIVE_BACKUP_KEEP", cfg.backup.keep as u64) as usize;
    if let Ok(raw) = env::var("SLACK_ARCHIVE_BACKUP_MAX_AGE_HOURS")
        && let Ok(hours) = raw.trim().parse::<u64>()
    {
        cfg.backup.max_age_hours = Some(hours);
    }
    cfg.download.avatars = env_or_bool("SLACK_ARCHIVE_DOWNLOAD_AVATARS", cfg.download.avatars);
    cfg.download.files = env_or_bool("SLACK_ARCHIVE_DOWNLOAD_FILES", cfg.download.files);
}

pub fn load_config(paths: &ArchivePaths) -> Result<SyncConfig> {
    let mut cfg = SyncConfig::default();
    merge_file_config(&mut cfg, &resolve_config_path(paths))?;
    apply_env_overrides(&mut cfg);
    validate(&cfg).map_err(|err| ArchiveError::InvalidConfig(format!("{err:#}")))?;
    Ok(cfg)
}

/// `SLACK_TOKEN` wins over the token file next to the archive.
pub fn resolve_token(paths: &ArchivePaths) -> Result<String> {
    if let Ok(token) = env::var("SLACK_TOKEN")
        && !token.trim().is_empty()
    {
        return Ok(token.trim().to_string());
    }

    if paths.token_file.is_file() {
        let raw = fs::read_to_string(&paths.token_file)
            .with_context(|| format!("failed to read {}", paths.token_file.display()))?;
        let token = raw.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    Err(ArchiveError::MissingToken(paths.token_file.clone()).into())
}

/// Shortens a token for display, keeping the `xoxp-` style prefix.
pub fn redact_token(token: &str) -> String {
    let visible: String = token.chars().take(9).collect();
    if token.chars().count() <= 9 {
        return "*".repeat(token.chars().count());
    }
    format!("{visible}…")
}
