use anyhow::Result;
use std::env;

use crate::archive::backup::list_backups;
use crate::archive::config::{load_config, resolve_config_path};
use crate::archive::last_run;
use crate::archive::lock::ArchiveLock;
use crate::archive::paths::{ArchivePaths, resolve_paths};
use crate::archive::progress;
use crate::archive::store::ArchiveStore;
use crate::commands::CommandReport;

include!(concat!(env!("OUT_DIR"), "/env_allowlist.rs"));

const ENV_PREFIX: &str = "SLACK_ARCHIVE_";

/// `SLACK_ARCHIVE_*` variables this binary never reads; usually typos.
fn unknown_env_keys<I>(keys: I, allowlist: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = keys
        .into_iter()
        .filter(|k| k.starts_with(ENV_PREFIX) && !allowlist.contains(&k.as_str()))
        .collect();
    out.sort();
    out
}

fn token_source(paths: &ArchivePaths) -> Option<&'static str> {
    if env::var("SLACK_TOKEN").is_ok_and(|t| !t.trim().is_empty()) {
        return Some("env");
    }
    if paths.token_file.is_file() {
        return Some("file");
    }
    None
}

fn lock_state(paths: &ArchivePaths) -> &'static str {
    let lock_file = paths.lock_file();
    if !lock_file.exists() {
        return "free";
    }
    match ArchiveLock::acquire(&lock_file) {
        Ok(_) => "free",
        Err(_) => "held",
    }
}

fn backups_report(paths: &ArchivePaths) -> CommandReport {
    let mut report = CommandReport::new("backups");
    match list_backups(&paths.backup_dir) {
        Ok(entries) => {
            report.detail(format!("backups.count={}", entries.len()));
            if let Some(newest) = entries.first() {
                report.detail(format!("backups.newest={}", newest.name));
            }
        }
        Err(err) => report.issue(format!("backup dir unreadable: {err:#}")),
    }
    report
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("base_dir={}", paths.base_dir.display()));
    report.detail(format!("out_dir={}", paths.out_dir.display()));
    report.detail(format!("backup_dir={}", paths.backup_dir.display()));

    let config_path = resolve_config_path(&paths);
    report.detail(format!(
        "config_path={} ({})",
        config_path.display(),
        if config_path.exists() { "present" } else { "defaults" }
    ));
    if let Err(err) = load_config(&paths) {
        report.issue(format!("{err:#}"));
    }
    match token_source(&paths) {
        Some(source) => report.detail(format!("token={source}")),
        None => report.issue(format!(
            "no Slack token: set SLACK_TOKEN or write it to {}",
            paths.token_file.display()
        )),
    }
    for key in unknown_env_keys(env::vars().map(|(k, _)| k), GENERATED_ENV_ALLOWLIST) {
        report.issue(format!("unknown environment variable {key}"));
    }

    match last_run::read(&paths) {
        Some(at) => report.detail(format!("last_run={}", at.to_rfc3339())),
        None => report.detail("last_run=never"),
    }
    report.detail(format!("lock={}", lock_state(&paths)));

    let store = ArchiveStore::new(paths.clone());
    let channels = store.load_channel_list()?;
    let state = progress::load(&paths)?;
    if let Some(auth) = &state.auth {
        report.detail(format!(
            "auth.user={} team={}",
            auth.user.as_deref().unwrap_or("unknown"),
            auth.team.as_deref().unwrap_or("unknown")
        ));
    }
    report.detail(format!("channels.archived={}", channels.len()));
    report.detail(format!("messages.total={}", state.total_messages()));
    for channel in &channels {
        let Some(id) = channel.id.as_deref() else {
            continue;
        };
        let progress = state.channels.get(id).copied().unwrap_or_default();
        report.detail(format!(
            "channel.{id}={} messages={} complete={}",
            channel.label(),
            progress.messages,
            progress.fully_downloaded
        ));
    }

    report.merge(backups_report(&paths));
    Ok(report)
}
