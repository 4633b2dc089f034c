use crate::archive::model::AuthResult;
use crate::archive::paths::ArchivePaths;
use crate::archive::store::{read_json_or_default, write_json_atomic};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelProgress {
    pub fully_downloaded: bool,
    pub messages: usize,
}

/// Persisted run metadata: last auth check plus per-channel progress.
///
/// Entries in `channels` are created on first access and never removed;
/// `fully_downloaded` only ever moves from false to true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthResult>,
    pub channels: BTreeMap<String, ChannelProgress>,
}

impl ArchiveState {
    pub fn get(&mut self, channel_id: &str) -> &mut ChannelProgress {
        self.channels.entry(channel_id.to_string()).or_default()
    }

    pub fn is_complete(&self, channel_id: &str) -> bool {
        self.channels
            .get(channel_id)
            .is_some_and(|p| p.fully_downloaded)
    }

    pub fn mark_complete(&mut self, channel_id: &str) {
        self.get(channel_id).fully_downloaded = true;
    }

    pub fn set_message_count(&mut self, channel_id: &str, count: usize) {
        self.get(channel_id).messages = count;
    }

    pub fn total_messages(&self) -> usize {
        self.channels.values().map(|p| p.messages).sum()
    }
}

pub fn state_file_path(paths: &ArchivePaths) -> PathBuf {
    paths.archive_data_file()
}

pub fn load(paths: &ArchivePaths) -> Result<ArchiveState> {
    read_json_or_default(&state_file_path(paths))
}

pub fn save(paths: &ArchivePaths, state: &ArchiveState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    write_json_atomic(&file, state)?;
    Ok(file)
}
