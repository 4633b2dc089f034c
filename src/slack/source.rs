use crate::archive::model::{AuthResult, Channel, Message, User, UserDirectory};
use crate::archive::paths::is_safe_id;
use crate::archive::source::{ChannelFilter, FetchHint, FetchedMessages, RemoteSource};
use crate::archive::store::{ArchiveStore, write_bytes_atomic};
use crate::slack::client::SlackClient;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// `RemoteSource` backed by the Slack Web API. Watermarks come from the
/// message files already in the archive.
pub struct SlackSource {
    client: SlackClient,
    store: ArchiveStore,
    page_size: u32,
}

/// Newest `ts` already archived; history is fetched strictly after it.
pub fn watermark(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .filter(|m| m.ts_value() > 0.0)
        .max_by(|a, b| a.ts_value().total_cmp(&b.ts_value()))
        .and_then(Message::ts)
}

/// Thread parents with at least one reply.
fn has_replies(message: &Message) -> bool {
    let Some(ts) = message.ts() else {
        return false;
    };
    let replies = message
        .extra
        .get("reply_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let is_parent = message
        .field_str("thread_ts")
        .is_none_or(|thread_ts| thread_ts == ts);
    replies > 0 && is_parent
}

fn author_ids(messages: &[Message], out: &mut BTreeSet<String>) {
    for message in messages {
        if let Some(user) = message.field_str("user") {
            out.insert(user.to_string());
        }
        for reply in message
            .extra
            .get("replies")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(user) = reply.get("user").and_then(Value::as_str) {
                out.insert(user.to_string());
            }
        }
    }
}

/// Extension for a download target: from the URL path, else `fallback`.
pub fn extension_from_url<'a>(url: &'a str, fallback: &'a str) -> &'a str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => fallback,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub id: String,
    pub url: String,
    pub extension: String,
}

fn file_ref(raw: &Value) -> Option<FileRef> {
    if raw.get("mode").and_then(Value::as_str) == Some("tombstone") {
        return None;
    }
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| is_safe_id(id))?;
    let url = raw
        .get("url_private_download")
        .or_else(|| raw.get("url_private"))
        .and_then(Value::as_str)?;
    let extension = raw
        .get("filetype")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| extension_from_url(url, "bin"));
    Some(FileRef {
        id: id.to_string(),
        url: url.to_string(),
        extension: extension.to_string(),
    })
}

/// Attachments referenced by messages and their thread replies.
pub fn file_refs(messages: &[Message]) -> Vec<FileRef> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut push_from = |files: Option<&Value>| {
        for raw in files.and_then(Value::as_array).into_iter().flatten() {
            if let Some(file) = file_ref(raw)
                && seen.insert(file.id.clone())
            {
                out.push(file);
            }
        }
    };
    for message in messages {
        push_from(message.extra.get("files"));
        for reply in message
            .extra
            .get("replies")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            push_from(reply.get("files"));
        }
    }
    out
}

fn avatar_url(user: &User) -> Option<&str> {
    let profile = user.extra.get("profile")?;
    ["image_72", "image_48", "image_192"]
        .iter()
        .find_map(|key| profile.get(*key).and_then(Value::as_str))
        .filter(|url| !url.trim().is_empty())
}

impl SlackSource {
    pub fn new(client: SlackClient, store: ArchiveStore, page_size: u32) -> Self {
        Self {
            client,
            store,
            page_size,
        }
    }

    fn limit(&self) -> String {
        self.page_size.to_string()
    }

    fn fetch_user(&self, user_id: &str) -> Result<User> {
        let body = self
            .client
            .call("users.info", &[("user", user_id.to_string())])?;
        let raw = body
            .get("user")
            .cloned()
            .with_context(|| format!("users.info returned no user for {user_id}"))?;
        serde_json::from_value(raw).with_context(|| format!("failed to decode user {user_id}"))
    }

    fn ensure_users(&self, ids: BTreeSet<String>, users: &mut UserDirectory) -> Result<usize> {
        let mut added = 0usize;
        for id in ids {
            if users.contains_key(&id) {
                continue;
            }
            let user = self.fetch_user(&id)?;
            users.insert(id, user);
            added += 1;
        }
        Ok(added)
    }

    fn fetch_replies(&self, channel_id: &str, parent_ts: &str) -> Result<Vec<Value>> {
        let items = self.client.paginate(
            "conversations.replies",
            &[
                ("channel", channel_id.to_string()),
                ("ts", parent_ts.to_string()),
                ("limit", self.limit()),
            ],
            "messages",
        )?;
        Ok(items
            .into_iter()
            .filter(|m| m.get("ts").and_then(Value::as_str) != Some(parent_ts))
            .collect())
    }

    fn download_to(&self, url: &str, dest: &Path, authenticated: bool) -> Result<bool> {
        if dest.exists() {
            return Ok(false);
        }
        let bytes = self.client.download(url, authenticated)?;
        write_bytes_atomic(dest, &bytes)?;
        Ok(true)
    }
}

impl RemoteSource for SlackSource {
    fn auth_test(&mut self) -> Result<AuthResult> {
        let body = self.client.call_raw("auth.test", &[])?;
        serde_json::from_value(body).context("failed to decode auth.test response")
    }

    fn list_channels(
        &mut self,
        filter: &ChannelFilter,
        users: &mut UserDirectory,
    ) -> Result<Vec<Channel>> {
        let raw = self.client.paginate(
            "conversations.list",
            &[
                ("types", filter.types_param()),
                ("exclude_archived", "false".to_string()),
                ("limit", self.limit()),
            ],
            "channels",
        )?;

        let mut channels = Vec::with_capacity(raw.len());
        for item in raw {
            let mut channel: Channel =
                serde_json::from_value(item).context("failed to decode channel")?;
            if channel.is_im
                && let Some(user_id) = channel.user.clone()
            {
                if !users.contains_key(&user_id) {
                    let user = self.fetch_user(&user_id)?;
                    users.insert(user_id.clone(), user);
                }
                if let Some(user) = users.get(&user_id) {
                    channel.name = Some(user.display_name().to_string());
                    channel.is_user_deleted |= user.deleted;
                }
            }
            channels.push(channel);
        }
        info!(channels = channels.len(), "listed channels");
        Ok(channels)
    }

    fn fetch_messages(&mut self, channel: &Channel, hint: FetchHint) -> Result<FetchedMessages> {
        let id = channel
            .id
            .as_deref()
            .context("cannot fetch messages for a channel without id")?;
        let stored = self.store.load_messages(id)?;
        let known: HashSet<&str> = stored.iter().filter_map(Message::ts).collect();

        let mut params = vec![("channel", id.to_string()), ("limit", self.limit())];
        if let Some(oldest) = watermark(&stored) {
            params.push(("oldest", oldest.to_string()));
        }
        let raw = self
            .client
            .paginate("conversations.history", &params, "messages")?;

        let mut messages = Vec::with_capacity(raw.len());
        for item in raw {
            messages.push(serde_json::from_value::<Message>(item).context("failed to decode message")?);
        }
        let new_count = messages
            .iter()
            .filter(|m| m.ts().is_none_or(|ts| !known.contains(ts)))
            .count();
        debug!(
            channel = %id,
            fetched = messages.len(),
            new_count,
            known_messages = hint.known_messages,
            "fetched history"
        );
        Ok(FetchedMessages {
            messages,
            new_count,
        })
    }

    fn fetch_extras(
        &mut self,
        channel: &Channel,
        messages: &mut [Message],
        users: &mut UserDirectory,
    ) -> Result<()> {
        let id = channel
            .id
            .as_deref()
            .context("cannot fetch extras for a channel without id")?;
        for message in messages.iter_mut() {
            if !has_replies(message) {
                continue;
            }
            let Some(ts) = message.ts().map(str::to_owned) else {
                continue;
            };
            let replies = self.fetch_replies(id, &ts)?;
            message
                .extra
                .insert("replies".to_string(), Value::Array(replies));
        }

        let mut authors = BTreeSet::new();
        author_ids(messages, &mut authors);
        let added = self.ensure_users(authors, users)?;
        if added > 0 {
            debug!(channel = %id, added, "resolved message authors");
        }
        Ok(())
    }

    fn fetch_avatars(&mut self, users: &UserDirectory) -> Result<()> {
        let dir = self.store.paths().avatars_dir.clone();
        let mut downloaded = 0usize;
        for user in users.values() {
            let Some(url) = avatar_url(user) else {
                continue;
            };
            if !is_safe_id(&user.id) {
                warn!(user = %user.id, "user id is not a valid file name; avatar skipped");
                continue;
            }
            let dest = dir.join(format!("{}.{}", user.id, extension_from_url(url, "png")));
            if self.download_to(url, &dest, false)? {
                downloaded += 1;
            }
        }
        if downloaded > 0 {
            debug!(downloaded, "downloaded avatars");
        }
        Ok(())
    }

    fn fetch_files(&mut self, channel_id: &str) -> Result<()> {
        let messages = self.store.load_messages(channel_id)?;
        let dir = self.store.paths().channel_files_dir(channel_id);
        let mut downloaded = 0usize;
        for file in file_refs(&messages) {
            let dest = dir.join(format!("{}.{}", file.id, file.extension));
            if self.download_to(&file.url, &dest, true)? {
                downloaded += 1;
            }
        }
        if downloaded > 0 {
            info!(channel = %channel_id, downloaded, "downloaded files");
        }
        Ok(())
    }
}
