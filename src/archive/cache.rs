use crate::archive::model::Message;
use crate::archive::store::ArchiveStore;
use anyhow::Result;
use std::collections::BTreeMap;

/// Messages keyed by channel id for the lifetime of one run. Channels touched
/// by the engine are inserted after they are persisted; anything else is read
/// from the store on first access.
#[derive(Debug, Default)]
pub struct MessageCache {
    channels: BTreeMap<String, Vec<Message>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel_id: &str, messages: Vec<Message>) {
        self.channels.insert(channel_id.to_string(), messages);
    }

    #[cfg(test)]
    pub fn get(&self, channel_id: &str) -> Option<&[Message]> {
        self.channels.get(channel_id).map(Vec::as_slice)
    }

    pub fn get_or_load(&mut self, store: &ArchiveStore, channel_id: &str) -> Result<&[Message]> {
        if !self.channels.contains_key(channel_id) {
            let loaded = store.load_messages(channel_id)?;
            self.channels.insert(channel_id.to_string(), loaded);
        }
        Ok(self
            .channels
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }
}
