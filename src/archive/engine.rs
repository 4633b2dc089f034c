use crate::archive::backup::BackupGuardian;
use crate::archive::cache::MessageCache;
use crate::archive::config::{DownloadConfig, SyncConfig};
use crate::archive::last_run;
use crate::archive::lock::ArchiveLock;
use crate::archive::model::{Channel, Message, UserDirectory};
use crate::archive::paths::{ArchivePaths, is_safe_id};
use crate::archive::progress::{self, ArchiveState};
use crate::archive::search::ArtifactSink;
use crate::archive::source::{ChannelFilter, FetchHint, RemoteSource};
use crate::archive::store::ArchiveStore;
use crate::error::ArchiveError;
use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Combine the stored log with a freshly fetched batch: one message per `ts`
/// (first occurrence wins, stored messages come first) ordered newest first.
/// Messages without a `ts` have no identity and are all kept.
pub fn merge_messages(stored: Vec<Message>, fetched: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Message> = stored
        .into_iter()
        .chain(fetched)
        .filter(|m| m.ts().is_none_or(|ts| seen.insert(ts.to_string())))
        .collect();
    merged.sort_by(|a, b| b.ts_value().total_cmp(&a.ts_value()));
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Skipped,
    Completed,
    PartiallyUpdated,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Completed => "completed",
            Self::PartiallyUpdated => "partially-updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOutcome {
    pub channel_id: Option<String>,
    pub label: String,
    pub status: ChannelStatus,
    pub new_messages: usize,
    pub total_messages: usize,
}

enum Stage {
    NotStarted,
    Fetching,
    Merging {
        fetched: Vec<Message>,
        reported_new: usize,
    },
    Persisted {
        total: usize,
        new_messages: usize,
    },
    Done(ChannelStatus),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Fetching => "fetching",
            Self::Merging { .. } => "merging",
            Self::Persisted { .. } => "persisted",
            Self::Done(status) => status.as_str(),
        }
    }
}

/// Walks the selected channels one at a time through
/// `NotStarted -> Fetching -> Merging -> Persisted -> Completed | PartiallyUpdated`,
/// or straight to `Skipped` for channels already fully downloaded.
pub struct SyncEngine<'a, S: RemoteSource> {
    store: &'a ArchiveStore,
    source: &'a mut S,
    downloads: DownloadConfig,
    pub state: ArchiveState,
    pub users: UserDirectory,
    pub cache: MessageCache,
    new_messages: BTreeMap<String, usize>,
}

impl<'a, S: RemoteSource> SyncEngine<'a, S> {
    pub fn new(
        store: &'a ArchiveStore,
        source: &'a mut S,
        state: ArchiveState,
        users: UserDirectory,
        downloads: DownloadConfig,
    ) -> Self {
        Self {
            store,
            source,
            downloads,
            state,
            users,
            cache: MessageCache::new(),
            new_messages: BTreeMap::new(),
        }
    }

    pub fn new_messages(&self, channel_id: &str) -> usize {
        self.new_messages.get(channel_id).copied().unwrap_or(0)
    }

    /// Channels from `selected` that received at least one new message.
    pub fn changed_channels(&self, selected: &[Channel]) -> Vec<Channel> {
        selected
            .iter()
            .filter(|c| c.id.as_deref().is_some_and(|id| self.new_messages(id) > 0))
            .cloned()
            .collect()
    }

    pub fn sync_channels(&mut self, selected: &[Channel]) -> Result<Vec<ChannelOutcome>> {
        let total = selected.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, channel) in selected.iter().enumerate() {
            outcomes.push(self.process_channel(channel, index, total)?);
        }
        Ok(outcomes)
    }

    fn process_channel(
        &mut self,
        channel: &Channel,
        index: usize,
        total: usize,
    ) -> Result<ChannelOutcome> {
        let Some(id) = channel.id.clone() else {
            warn!(channel = channel.label(), "selected channel does not have an id; skipping");
            return Ok(ChannelOutcome {
                channel_id: None,
                label: channel.label().to_string(),
                status: ChannelStatus::Skipped,
                new_messages: 0,
                total_messages: 0,
            });
        };
        if !is_safe_id(&id) {
            warn!(channel = channel.label(), id = %id, "channel id is not a valid archive file name; skipping");
            return Ok(ChannelOutcome {
                channel_id: Some(id),
                label: channel.label().to_string(),
                status: ChannelStatus::Skipped,
                new_messages: 0,
                total_messages: 0,
            });
        }

        let known = *self.state.get(&id);
        let hint = FetchHint {
            index,
            total,
            known_messages: known.messages,
        };

        let mut stage = Stage::NotStarted;
        let status = loop {
            if let Stage::Done(status) = stage {
                break status;
            }
            let next = self.advance(channel, &id, stage, hint)?;
            debug!(channel = %id, stage = next.name(), "channel stage");
            stage = next;
        };

        if status != ChannelStatus::Skipped {
            info!(
                channel = channel.label(),
                new_messages = self.new_messages(&id),
                total_messages = self.state.get(&id).messages,
                status = status.as_str(),
                "saved message data"
            );
        }

        Ok(ChannelOutcome {
            label: channel.label().to_string(),
            status,
            new_messages: self.new_messages(&id),
            total_messages: self.state.get(&id).messages,
            channel_id: Some(id),
        })
    }

    fn advance(&mut self, channel: &Channel, id: &str, stage: Stage, hint: FetchHint) -> Result<Stage> {
        match stage {
            Stage::NotStarted => {
                if self.state.is_complete(id) {
                    return Ok(Stage::Done(ChannelStatus::Skipped));
                }
                Ok(Stage::Fetching)
            }
            Stage::Fetching => {
                info!(
                    channel = channel.label(),
                    position = hint.index + 1,
                    of = hint.total,
                    "downloading messages"
                );
                let mut fetched = self.source.fetch_messages(channel, hint)?;
                self.source
                    .fetch_extras(channel, &mut fetched.messages, &mut self.users)?;
                if self.downloads.avatars {
                    self.source.fetch_avatars(&self.users)?;
                }
                Ok(Stage::Merging {
                    fetched: fetched.messages,
                    reported_new: fetched.new_count,
                })
            }
            Stage::Merging {
                fetched,
                reported_new,
            } => {
                let path = self.store.paths().channel_file(id);
                let mut stored_len = 0usize;
                let merged = self.store.merge_and_persist(&path, fetched, |stored, fetched| {
                    stored_len = stored.len();
                    merge_messages(stored, fetched)
                })?;
                self.users = self.store.merge_users(&self.users)?;

                let new_messages = merged.len().saturating_sub(stored_len);
                if new_messages != reported_new {
                    debug!(channel = %id, reported_new, new_messages, "adapter new-count differs from merge");
                }
                let total = merged.len();
                self.cache.insert(id, merged);
                Ok(Stage::Persisted {
                    total,
                    new_messages,
                })
            }
            Stage::Persisted {
                total,
                new_messages,
            } => {
                // Attachments are discovered from the message file, so this
                // must run after the write above.
                if self.downloads.files {
                    self.source.fetch_files(id)?;
                }
                if channel.is_frozen() {
                    self.state.mark_complete(id);
                }
                self.state.set_message_count(id, total);
                self.new_messages.insert(id.to_string(), new_messages);

                Ok(Stage::Done(if self.state.is_complete(id) {
                    ChannelStatus::Completed
                } else {
                    ChannelStatus::PartiallyUpdated
                }))
            }
            Stage::Done(status) => Ok(Stage::Done(status)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub channel_types: Vec<String>,
    /// Channel ids or names; empty selects everything listed.
    pub channels: Vec<String>,
    pub fresh: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub auth_user: Option<String>,
    pub backup: Option<PathBuf>,
    pub listed: usize,
    pub outcomes: Vec<ChannelOutcome>,
    pub changed: Vec<String>,
    pub state_file: PathBuf,
    pub pruned_backups: usize,
}

/// Narrows the listing to the requested channels without reordering it.
pub fn select_channels(channels: Vec<Channel>, wanted: &[String]) -> Vec<Channel> {
    if wanted.is_empty() {
        return channels;
    }
    let wanted: Vec<&str> = wanted.iter().map(|w| w.trim().trim_start_matches('#')).collect();
    for w in &wanted {
        let found = channels
            .iter()
            .any(|c| c.id.as_deref() == Some(*w) || c.name.as_deref() == Some(*w));
        if !found {
            warn!(channel = *w, "requested channel not found in listing");
        }
    }
    channels
        .into_iter()
        .filter(|c| {
            wanted
                .iter()
                .any(|w| c.id.as_deref() == Some(*w) || c.name.as_deref() == Some(*w))
        })
        .collect()
}

/// One full archive run. The output directory is locked and snapshotted
/// before anything is mutated; the snapshot is dropped on success or on an
/// authentication failure and kept on any other error.
pub fn run_archive<S, A>(
    paths: &ArchivePaths,
    cfg: &SyncConfig,
    opts: &RunOptions,
    source: &mut S,
    artifacts: &mut A,
) -> Result<RunReport>
where
    S: RemoteSource,
    A: ArtifactSink,
{
    info!("{}", last_run::greeting(paths));
    let lock = ArchiveLock::acquire(&paths.lock_file())?;
    debug!(lock = %lock.path().display(), "archive locked");

    let store = ArchiveStore::new(paths.clone());
    let mut guardian = BackupGuardian::new(paths, cfg.backup.retention());
    let backup = guardian.create_backup()?;

    let result = run_locked(&store, &mut guardian, cfg, opts, source, artifacts);
    match result {
        Ok(mut report) => {
            debug!(phase = ?guardian.phase(), "backup settled");
            report.backup = backup;
            Ok(report)
        }
        Err(err) => {
            if let Some(snapshot) = guardian.snapshot_path() {
                warn!(
                    backup = %snapshot.display(),
                    "run failed; backup kept for `slack-archive restore`"
                );
            }
            Err(err)
        }
    }
}

fn run_locked<S, A>(
    store: &ArchiveStore,
    guardian: &mut BackupGuardian,
    cfg: &SyncConfig,
    opts: &RunOptions,
    source: &mut S,
    artifacts: &mut A,
) -> Result<RunReport>
where
    S: RemoteSource,
    A: ArtifactSink,
{
    let paths = store.paths();
    let mut state = progress::load(paths)?;
    let mut users = store.load_users()?;

    info!("testing auth");
    let auth = source.auth_test()?;
    if !auth.ok {
        guardian.delete_backup()?;
        return Err(ArchiveError::AuthFailed {
            code: auth.error.unwrap_or_else(|| "unknown_error".to_string()),
        }
        .into());
    }
    info!(
        user = auth.user.as_deref().unwrap_or("unknown"),
        "authorized with Slack"
    );
    let auth_user = auth.user.clone();
    state.auth = Some(auth);

    let filter = ChannelFilter {
        types: if opts.channel_types.is_empty() {
            cfg.slack.channel_types.clone()
        } else {
            opts.channel_types.clone()
        },
    };
    info!(types = %filter.types_param(), "downloading channels");
    let channels = source.list_channels(&filter, &mut users)?;
    let listed = channels.len();
    let selected = select_channels(channels, &opts.channels);

    if opts.fresh && store.exists() {
        let removed = store.clear()?;
        info!(removed, "fresh run: existing archive data removed");
        state = ArchiveState {
            auth: state.auth.take(),
            ..ArchiveState::default()
        };
    }
    store.merge_channel_list(selected.clone())?;

    let mut engine = SyncEngine::new(store, source, state, users, cfg.download.clone());
    let outcomes = engine.sync_channels(&selected)?;
    let state_file = progress::save(paths, &engine.state)?;

    let changed = engine.changed_channels(&selected);
    artifacts.regenerate(&changed, &mut engine.cache, store)?;

    guardian.delete_backup()?;
    let pruned_backups = guardian.delete_older_backups()?;
    last_run::write(paths, Utc::now())?;
    info!(channels = outcomes.len(), changed = changed.len(), "all done");

    Ok(RunReport {
        auth_user,
        backup: None,
        listed,
        outcomes,
        changed: changed.into_iter().filter_map(|c| c.id).collect(),
        state_file,
        pruned_backups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::backup::list_backups;
    use crate::archive::model::{AuthResult, User};
    use crate::archive::source::FetchedMessages;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeSource {
        auth_error: Option<String>,
        channels: Vec<Channel>,
        batches: HashMap<String, Vec<Message>>,
        fail_files: bool,
        calls: Vec<String>,
    }

    impl FakeSource {
        fn with_channels(channels: Vec<Channel>) -> Self {
            Self {
                channels,
                ..Self::default()
            }
        }

        fn batch(mut self, channel_id: &str, ts: &[&str]) -> Self {
            self.batches.insert(
                channel_id.to_string(),
                ts.iter().map(|t| Message::new(*t)).collect(),
            );
            self
        }

        fn fetches(&self) -> usize {
            self.calls.iter().filter(|c| c.starts_with("messages:")).count()
        }
    }

    impl RemoteSource for FakeSource {
        fn auth_test(&mut self) -> Result<AuthResult> {
            self.calls.push("auth".into());
            Ok(match &self.auth_error {
                Some(code) => AuthResult {
                    ok: false,
                    error: Some(code.clone()),
                    ..AuthResult::default()
                },
                None => AuthResult {
                    ok: true,
                    user: Some("archiver".into()),
                    ..AuthResult::default()
                },
            })
        }

        fn list_channels(
            &mut self,
            _filter: &ChannelFilter,
            users: &mut UserDirectory,
        ) -> Result<Vec<Channel>> {
            self.calls.push("channels".into());
            users.insert(
                "U1".into(),
                User {
                    id: "U1".into(),
                    ..User::default()
                },
            );
            Ok(self.channels.clone())
        }

        fn fetch_messages(&mut self, channel: &Channel, _hint: FetchHint) -> Result<FetchedMessages> {
            let id = channel.id.clone().unwrap_or_default();
            self.calls.push(format!("messages:{id}"));
            let messages = self.batches.get(&id).cloned().unwrap_or_default();
            Ok(FetchedMessages {
                new_count: messages.len(),
                messages,
            })
        }

        fn fetch_extras(
            &mut self,
            channel: &Channel,
            messages: &mut [Message],
            _users: &mut UserDirectory,
        ) -> Result<()> {
            self.calls
                .push(format!("extras:{}", channel.id.clone().unwrap_or_default()));
            for message in messages {
                message.extra.insert("enriched".into(), true.into());
            }
            Ok(())
        }

        fn fetch_avatars(&mut self, _users: &UserDirectory) -> Result<()> {
            self.calls.push("avatars".into());
            Ok(())
        }

        fn fetch_files(&mut self, channel_id: &str) -> Result<()> {
            self.calls.push(format!("files:{channel_id}"));
            if self.fail_files {
                anyhow::bail!("file download failed");
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        runs: Vec<Vec<String>>,
    }

    impl ArtifactSink for RecordingSink {
        fn regenerate(
            &mut self,
            changed: &[Channel],
            _cache: &mut MessageCache,
            _store: &ArchiveStore,
        ) -> Result<()> {
            self.runs
                .push(changed.iter().filter_map(|c| c.id.clone()).collect());
            Ok(())
        }
    }

    fn channel(id: &str) -> Channel {
        Channel {
            id: Some(id.to_string()),
            name: Some(format!("name-{id}")),
            ..Channel::default()
        }
    }

    fn stored_ts(paths: &ArchivePaths, id: &str) -> Vec<String> {
        ArchiveStore::new(paths.clone())
            .load_messages(id)
            .expect("load")
            .into_iter()
            .map(|m| m.ts.unwrap_or_default())
            .collect()
    }

    fn run(paths: &ArchivePaths, source: &mut FakeSource) -> Result<RunReport> {
        run_archive(
            paths,
            &SyncConfig::default(),
            &RunOptions::default(),
            source,
            &mut RecordingSink::default(),
        )
    }

    #[test]
    fn merge_dedups_and_orders_newest_first() {
        let merged = merge_messages(
            vec![Message::new("200"), Message::new("100")],
            vec![Message::new("200"), Message::new("300"), Message::new("x")],
        );
        let ts: Vec<_> = merged.iter().filter_map(Message::ts).collect();
        assert_eq!(ts, vec!["300", "200", "100", "x"]);
    }

    #[test]
    fn merge_keeps_first_occurrence_and_every_stored_message() {
        let mut stored = Message::new("5");
        stored.extra.insert("text".into(), "original".into());
        let mut edited = Message::new("5");
        edited.extra.insert("text".into(), "edited".into());
        let stored_batch = vec![stored, Message::new("1.5"), Message::new("10")];

        let merged = merge_messages(stored_batch.clone(), vec![edited, Message::new("7")]);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[2].field_str("text"), Some("original"));
        for m in &stored_batch {
            assert!(merged.iter().any(|x| x.ts == m.ts));
        }
        assert!(merged.windows(2).all(|w| w[0].ts_value() >= w[1].ts_value()));
    }

    fn ts_strategy() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            4 => (0u32..2_000, 0u32..1_000_000)
                .prop_map(|(secs, micros)| Some(format!("{secs}.{micros:06}"))),
            1 => Just(Some(String::new())),
            1 => "[a-z]{1,6}".prop_map(Some),
            1 => Just(None::<String>),
        ]
    }

    fn batch_strategy() -> impl Strategy<Value = Vec<Message>> {
        prop::collection::vec(ts_strategy(), 0..24).prop_map(|stamps| {
            stamps
                .into_iter()
                .map(|ts| Message {
                    ts,
                    ..Message::default()
                })
                .collect()
        })
    }

    fn untimed(batch: &[Message]) -> usize {
        batch.iter().filter(|m| m.ts.is_none()).count()
    }

    proptest! {
        #[test]
        fn merge_is_deduplicated_ordered_and_additive(
            stored in batch_strategy(),
            fetched in batch_strategy(),
        ) {
            let merged = merge_messages(stored.clone(), fetched.clone());

            let mut seen = HashSet::new();
            for ts in merged.iter().filter_map(Message::ts) {
                prop_assert!(seen.insert(ts), "duplicate ts {:?}", ts);
            }
            prop_assert!(merged.windows(2).all(|w| w[0].ts_value() >= w[1].ts_value()));
            for ts in stored.iter().chain(&fetched).filter_map(Message::ts) {
                prop_assert!(seen.contains(ts), "lost ts {:?}", ts);
            }
            prop_assert_eq!(untimed(&merged), untimed(&stored) + untimed(&fetched));
        }

        #[test]
        fn remerging_the_same_batch_adds_nothing(
            stored in batch_strategy(),
            fetched in batch_strategy(),
        ) {
            let once = merge_messages(stored, fetched.clone());
            let timed: Vec<Message> = fetched.into_iter().filter(|m| m.ts.is_some()).collect();
            let twice = merge_messages(once.clone(), timed);
            prop_assert_eq!(twice, once);
        }
    }

    #[test]
    fn unsafe_channel_ids_never_become_file_names() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let mut source = FakeSource::with_channels(vec![channel("users"), channel("../C1"), channel("C2")])
            .batch("users", &["1"])
            .batch("../C1", &["1"])
            .batch("C2", &["2"]);

        let report = run(&paths, &mut source).expect("run");
        let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![
                ChannelStatus::Skipped,
                ChannelStatus::Skipped,
                ChannelStatus::PartiallyUpdated
            ]
        );
        assert_eq!(source.fetches(), 1);
        assert!(!paths.out_dir.join("C1.json").exists());
        let users = ArchiveStore::new(paths.clone()).load_users().expect("users intact");
        assert!(users.contains_key("U1"));
        let state = progress::load(&paths).expect("state");
        assert_eq!(state.channels.keys().collect::<Vec<_>>(), vec!["C2"]);
    }

    #[test]
    fn first_run_persists_newest_first() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let mut source = FakeSource::with_channels(vec![channel("C1")]).batch("C1", &["100", "200"]);

        let report = run(&paths, &mut source).expect("run");
        assert_eq!(stored_ts(&paths, "C1"), vec!["200", "100"]);
        assert_eq!(report.outcomes[0].new_messages, 2);
        assert_eq!(report.outcomes[0].status, ChannelStatus::PartiallyUpdated);
        assert_eq!(report.changed, vec!["C1"]);
        assert_eq!(report.backup, None);

        let state = progress::load(&paths).expect("state");
        assert_eq!(state.channels["C1"].messages, 2);
        assert!(!state.channels["C1"].fully_downloaded);
        assert_eq!(state.auth.and_then(|a| a.user).as_deref(), Some("archiver"));
        assert!(last_run::read(&paths).is_some());
    }

    #[test]
    fn rerun_with_overlapping_batch_counts_only_new_messages() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let store = ArchiveStore::new(paths.clone());
        store
            .write_messages("C1", &[Message::new("200"), Message::new("100")])
            .expect("seed");

        let mut source = FakeSource::with_channels(vec![channel("C1")]).batch("C1", &["200", "300"]);
        let report = run(&paths, &mut source).expect("run");

        assert_eq!(stored_ts(&paths, "C1"), vec!["300", "200", "100"]);
        assert_eq!(report.outcomes[0].new_messages, 1);
        assert_eq!(report.outcomes[0].total_messages, 3);
        assert!(report.backup.is_some());
        assert!(list_backups(&paths.backup_dir).expect("list").is_empty());
    }

    #[test]
    fn archived_channel_completes_and_is_skipped_afterwards() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let archived = Channel {
            is_archived: true,
            ..channel("C1")
        };
        let mut source = FakeSource::with_channels(vec![archived.clone()]).batch("C1", &["1"]);

        let first = run(&paths, &mut source).expect("first run");
        assert_eq!(first.outcomes[0].status, ChannelStatus::Completed);
        assert!(progress::load(&paths).expect("state").is_complete("C1"));
        let before = std::fs::read_to_string(paths.channel_file("C1")).expect("read");

        // The channel reappears un-archived with more messages; it stays done.
        let revived = Channel {
            is_archived: false,
            ..archived
        };
        let mut source = FakeSource::with_channels(vec![revived]).batch("C1", &["2"]);
        let second = run(&paths, &mut source).expect("second run");

        assert_eq!(second.outcomes[0].status, ChannelStatus::Skipped);
        assert_eq!(source.fetches(), 0);
        assert!(second.changed.is_empty());
        let state = progress::load(&paths).expect("state");
        assert!(state.is_complete("C1"));
        assert_eq!(state.channels["C1"].messages, 1);
        assert_eq!(std::fs::read_to_string(paths.channel_file("C1")).expect("read"), before);
    }

    #[test]
    fn dm_with_deactivated_partner_completes() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let dm = Channel {
            is_im: true,
            is_user_deleted: true,
            user: Some("U9".into()),
            ..channel("D1")
        };
        let mut source = FakeSource::with_channels(vec![dm]);
        let report = run(&paths, &mut source).expect("run");
        assert_eq!(report.outcomes[0].status, ChannelStatus::Completed);
        assert_eq!(report.outcomes[0].total_messages, 0);
        assert!(report.changed.is_empty());
    }

    #[test]
    fn failed_auth_aborts_before_fetching_and_drops_backup() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        ArchiveStore::new(paths.clone())
            .write_messages("C1", &[Message::new("1")])
            .expect("seed");

        let mut source = FakeSource {
            auth_error: Some("invalid_auth".into()),
            ..FakeSource::with_channels(vec![channel("C1")]).batch("C1", &["2"])
        };
        let err = run(&paths, &mut source).expect_err("auth failure");

        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::AuthFailed { code }) if code == "invalid_auth"
        ));
        assert_eq!(source.calls, vec!["auth"]);
        assert!(list_backups(&paths.backup_dir).expect("list").is_empty());
        assert_eq!(stored_ts(&paths, "C1"), vec!["1"]);
        assert!(last_run::read(&paths).is_none());
    }

    #[test]
    fn channel_without_id_is_skipped_and_run_continues() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let nameless = Channel {
            name: Some("ghost".into()),
            ..Channel::default()
        };
        let mut source =
            FakeSource::with_channels(vec![nameless, channel("C2")]).batch("C2", &["1"]);

        let report = run(&paths, &mut source).expect("run");
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].channel_id, None);
        assert_eq!(report.outcomes[0].status, ChannelStatus::Skipped);
        assert_eq!(report.outcomes[1].status, ChannelStatus::PartiallyUpdated);
        assert_eq!(source.fetches(), 1);
    }

    #[test]
    fn channel_pipeline_runs_in_order() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let mut source = FakeSource::with_channels(vec![channel("C2"), channel("C1")])
            .batch("C1", &["1"])
            .batch("C2", &["2"]);

        run(&paths, &mut source).expect("run");
        assert_eq!(
            source.calls,
            vec![
                "auth",
                "channels",
                "messages:C2",
                "extras:C2",
                "avatars",
                "files:C2",
                "messages:C1",
                "extras:C1",
                "avatars",
                "files:C1",
            ]
        );
        let stored = ArchiveStore::new(paths.clone()).load_messages("C1").expect("load");
        assert_eq!(stored[0].extra.get("enriched"), Some(&true.into()));
        let users = ArchiveStore::new(paths).load_users().expect("users");
        assert!(users.contains_key("U1"));
    }

    #[test]
    fn failure_mid_run_keeps_backup_and_skips_marker() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        ArchiveStore::new(paths.clone())
            .write_messages("C1", &[Message::new("1")])
            .expect("seed");

        let mut source = FakeSource {
            fail_files: true,
            ..FakeSource::with_channels(vec![channel("C1")]).batch("C1", &["2"])
        };
        assert!(run(&paths, &mut source).is_err());

        let backups = list_backups(&paths.backup_dir).expect("list");
        assert_eq!(backups.len(), 1);
        assert!(backups[0].path.join("data/C1.json").exists());
        assert!(last_run::read(&paths).is_none());
        assert!(!progress::load(&paths).expect("state").channels.contains_key("C1"));
    }

    #[test]
    fn only_channels_with_new_messages_are_regenerated() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let mut source = FakeSource::with_channels(vec![channel("C1"), channel("C2")])
            .batch("C1", &["1"]);
        let mut sink = RecordingSink::default();

        run_archive(
            &paths,
            &SyncConfig::default(),
            &RunOptions::default(),
            &mut source,
            &mut sink,
        )
        .expect("run");
        assert_eq!(sink.runs, vec![vec!["C1".to_string()]]);
    }

    #[test]
    fn fresh_run_discards_previous_archive() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let mut source = FakeSource::with_channels(vec![channel("C1"), channel("C2")])
            .batch("C1", &["1"])
            .batch("C2", &["2"]);
        run(&paths, &mut source).expect("seed run");

        let mut source = FakeSource::with_channels(vec![channel("C1"), channel("C2")])
            .batch("C1", &["5"]);
        let opts = RunOptions {
            channels: vec!["C1".into()],
            fresh: true,
            ..RunOptions::default()
        };
        run_archive(
            &paths,
            &SyncConfig::default(),
            &opts,
            &mut source,
            &mut RecordingSink::default(),
        )
        .expect("fresh run");

        assert_eq!(stored_ts(&paths, "C1"), vec!["5"]);
        assert!(!paths.channel_file("C2").exists());
        let state = progress::load(&paths).expect("state");
        assert_eq!(state.channels.keys().collect::<Vec<_>>(), vec!["C1"]);
    }

    #[test]
    fn selection_keeps_listing_order() {
        let listing = vec![channel("C1"), channel("C2"), channel("C3")];
        let picked = select_channels(listing.clone(), &["C3".into(), "#name-C1".into()]);
        let ids: Vec<_> = picked.iter().filter_map(|c| c.id.as_deref()).collect();
        assert_eq!(ids, vec!["C1", "C3"]);
        assert_eq!(select_channels(listing, &[]).len(), 3);
    }

    #[test]
    fn engine_skips_complete_channel_without_touching_progress() {
        let tmp = tempdir().expect("tempdir");
        let store = ArchiveStore::new(ArchivePaths::under(tmp.path()));
        let mut state = ArchiveState::default();
        state.mark_complete("C1");
        state.set_message_count("C1", 42);
        let mut source = FakeSource::default().batch("C1", &["1"]);

        let mut engine = SyncEngine::new(
            &store,
            &mut source,
            state.clone(),
            UserDirectory::new(),
            DownloadConfig::default(),
        );
        let outcomes = engine.sync_channels(&[channel("C1")]).expect("sync");
        assert_eq!(outcomes[0].status, ChannelStatus::Skipped);
        assert_eq!(outcomes[0].total_messages, 42);
        assert_eq!(engine.state, state);
        assert!(engine.cache.get("C1").is_none());
        assert!(!store.paths().channel_file("C1").exists());
    }
}
