use crate::archive::cache::MessageCache;
use crate::archive::model::{Channel, Message};
use crate::archive::paths::is_safe_id;
use crate::archive::store::{ArchiveStore, write_json_atomic};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Presentation artifacts rebuilt after a run.
pub trait ArtifactSink {
    /// `changed` holds only the channels that received new messages this run.
    fn regenerate(
        &mut self,
        changed: &[Channel],
        cache: &mut MessageCache,
        store: &ArchiveStore,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub text: String,
}

pub type SearchIndex = BTreeMap<String, Vec<SearchEntry>>;

fn entry_for(message: &Message) -> Option<SearchEntry> {
    let text = message.field_str("text")?.trim();
    if text.is_empty() {
        return None;
    }
    Some(SearchEntry {
        ts: message.ts().unwrap_or_default().to_string(),
        user: message.field_str("user").map(str::to_owned),
        text: text.to_string(),
    })
}

fn entries_for(messages: &[Message]) -> Vec<SearchEntry> {
    let mut out = Vec::new();
    for message in messages {
        out.extend(entry_for(message));
        let replies = message
            .extra
            .get("replies")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|raw| serde_json::from_value::<Message>(raw.clone()).ok());
        out.extend(replies.filter_map(|reply| entry_for(&reply)));
    }
    out
}

/// Writes `data/search.json`: channel id to the searchable text of every
/// archived message.
#[derive(Debug, Default)]
pub struct SearchIndexWriter;

impl ArtifactSink for SearchIndexWriter {
    fn regenerate(
        &mut self,
        changed: &[Channel],
        cache: &mut MessageCache,
        store: &ArchiveStore,
    ) -> Result<()> {
        let path = store.paths().search_file();
        if changed.is_empty() && path.exists() {
            debug!("no new messages; search index left as is");
            return Ok(());
        }

        let mut index = SearchIndex::new();
        for channel in store.load_channel_list()? {
            let Some(id) = channel.id.filter(|id| is_safe_id(id)) else {
                continue;
            };
            let entries = entries_for(cache.get_or_load(store, &id)?);
            index.insert(id, entries);
        }

        write_json_atomic(&path, &index)?;
        info!(
            channels = index.len(),
            entries = index.values().map(Vec::len).sum::<usize>(),
            "wrote search index"
        );
        Ok(())
    }
}
