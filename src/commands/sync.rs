use anyhow::Result;
use tracing::error;

use crate::archive::config::{CHANNEL_TYPES, load_config, redact_token, resolve_token};
use crate::archive::engine::{RunOptions, run_archive};
use crate::archive::paths::resolve_paths;
use crate::archive::search::SearchIndexWriter;
use crate::archive::store::ArchiveStore;
use crate::commands::CommandReport;
use crate::error::ArchiveError;
use crate::slack::client::SlackClient;
use crate::slack::source::SlackSource;

fn check_types(types: &[String]) -> Result<()> {
    if let Some(bad) = types.iter().find(|t| !CHANNEL_TYPES.contains(&t.as_str())) {
        return Err(ArchiveError::InvalidConfig(format!(
            "unknown conversation type `{bad}`; expected one of: {}",
            CHANNEL_TYPES.join(", ")
        ))
        .into());
    }
    Ok(())
}

pub fn run(opts: &RunOptions) -> Result<CommandReport> {
    check_types(&opts.channel_types)?;
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let token = resolve_token(&paths)?;

    let client = SlackClient::new(&cfg.slack, &token)?;
    let store = ArchiveStore::new(paths.clone());
    let mut source = SlackSource::new(client, store, cfg.slack.page_size);

    let run = match run_archive(&paths, &cfg, opts, &mut source, &mut SearchIndexWriter) {
        Ok(run) => run,
        Err(err) => {
            if matches!(
                err.downcast_ref::<ArchiveError>(),
                Some(ArchiveError::AuthFailed { .. })
            ) {
                error!(token = %redact_token(&token), "slack rejected the token");
            }
            return Err(err);
        }
    };

    let mut report = CommandReport::new("sync");
    report.detail(format!("out_dir={}", paths.out_dir.display()));
    if let Some(user) = &run.auth_user {
        report.detail(format!("auth.user={user}"));
    }
    report.detail(format!("channels.listed={}", run.listed));
    report.detail(format!("channels.selected={}", run.outcomes.len()));
    for outcome in &run.outcomes {
        report.detail(format!(
            "channel.{}={} new={} total={}",
            outcome.channel_id.as_deref().unwrap_or(&outcome.label),
            outcome.status.as_str(),
            outcome.new_messages,
            outcome.total_messages
        ));
    }
    report.detail(format!("channels.changed={}", run.changed.len()));
    report.detail(format!("state_file={}", run.state_file.display()));
    if let Some(backup) = &run.backup {
        report.detail(format!("backup.taken={} (deleted)", backup.display()));
    }
    report.detail(format!("backups.pruned={}", run.pruned_backups));

    for outcome in run.outcomes.iter().filter(|o| o.channel_id.is_none()) {
        report.detail(format!("skipped channel without id: {}", outcome.label));
    }

    Ok(report)
}
