use crate::archive::model::{Channel, Message, UserDirectory};
use crate::archive::paths::ArchivePaths;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Reads and writes the JSON files under `<out>/data`.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    paths: ArchivePaths,
}

pub fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    let parsed =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(parsed)
}

/// Write `data` next to `path` and rename it into place, so readers see
/// either the old file or the new one.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    temp.write_all(data)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

pub fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let data = serde_json::to_string_pretty(value)?;
    write_bytes_atomic(path, format!("{data}\n").as_bytes())
}

impl ArchiveStore {
    pub fn new(paths: ArchivePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ArchivePaths {
        &self.paths
    }

    pub fn exists(&self) -> bool {
        self.paths.channels_file().exists()
    }

    pub fn load_channel_list(&self) -> Result<Vec<Channel>> {
        read_json_or_default(&self.paths.channels_file())
    }

    pub fn load_messages(&self, channel_id: &str) -> Result<Vec<Message>> {
        read_json_or_default(&self.paths.channel_file(channel_id))
    }

    pub fn load_users(&self) -> Result<UserDirectory> {
        read_json_or_default(&self.paths.users_file())
    }

    /// Replaces the channel's message log wholesale.
    #[cfg(test)]
    pub fn write_messages(&self, channel_id: &str, messages: &[Message]) -> Result<()> {
        write_json_atomic(&self.paths.channel_file(channel_id), messages)
    }

    /// Read whatever is stored at `path`, combine it with `incoming` using the
    /// caller's policy and write the result back. Returns what was written.
    pub fn merge_and_persist<T, F>(&self, path: &Path, incoming: T, merge: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(T, T) -> T,
    {
        let existing: T = read_json_or_default(path)?;
        let merged = merge(existing, incoming);
        write_json_atomic(path, &merged)?;
        Ok(merged)
    }

    pub fn merge_channel_list(&self, incoming: Vec<Channel>) -> Result<Vec<Channel>> {
        self.merge_and_persist(&self.paths.channels_file(), incoming, merge_channels)
    }

    pub fn merge_users(&self, incoming: &UserDirectory) -> Result<UserDirectory> {
        self.merge_and_persist(&self.paths.users_file(), incoming.clone(), merge_users)
    }

    /// Empties the output directory. The lock file is left alone because the
    /// running process holds it.
    pub fn clear(&self) -> Result<usize> {
        let out_dir = &self.paths.out_dir;
        if !out_dir.exists() {
            return Ok(0);
        }
        let lock = self.paths.lock_file();
        let mut removed = 0usize;
        for entry in
            fs::read_dir(out_dir).with_context(|| format!("failed to read {}", out_dir.display()))?
        {
            let path = entry?.path();
            if path == lock {
                continue;
            }
            if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            }
            .with_context(|| format!("failed to remove {}", path.display()))?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Channels keyed by id: incoming metadata replaces the stored record in
/// place, unseen channels are appended, stored channels are never dropped.
pub fn merge_channels(existing: Vec<Channel>, incoming: Vec<Channel>) -> Vec<Channel> {
    let mut out = existing;
    for channel in incoming {
        let slot = match channel.id.as_deref() {
            Some(id) => out.iter().position(|c| c.id.as_deref() == Some(id)),
            None => out.iter().position(|c| *c == channel),
        };
        match slot {
            Some(idx) => out[idx] = channel,
            None => out.push(channel),
        }
    }
    out
}

pub fn merge_users(existing: UserDirectory, incoming: UserDirectory) -> UserDirectory {
    let mut out = existing;
    out.extend(incoming);
    out
}
