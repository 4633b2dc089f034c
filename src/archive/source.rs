//! Boundary between the sync engine and whatever talks to the remote
//! service. The engine only consumes these contracts; pagination, watermarks,
//! retries and rate limiting all live behind the trait.

use crate::archive::model::{AuthResult, Channel, Message, UserDirectory};
use anyhow::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFilter {
    /// Conversation types, e.g. `public_channel`, `im`.
    pub types: Vec<String>,
}

impl ChannelFilter {
    pub fn types_param(&self) -> String {
        self.types.join(",")
    }
}

/// Progress information handed to the adapter with each fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchHint {
    pub index: usize,
    pub total: usize,
    pub known_messages: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedMessages {
    pub messages: Vec<Message>,
    /// How many of `messages` the adapter believes are not yet archived.
    pub new_count: usize,
}

pub trait RemoteSource {
    fn auth_test(&mut self) -> Result<AuthResult>;

    /// Lists conversations of the requested types. May add users it had to
    /// resolve (direct-message partners) to `users`.
    fn list_channels(
        &mut self,
        filter: &ChannelFilter,
        users: &mut UserDirectory,
    ) -> Result<Vec<Channel>>;

    /// Messages newer than what the archive already holds for `channel`.
    fn fetch_messages(&mut self, channel: &Channel, hint: FetchHint) -> Result<FetchedMessages>;

    /// Enriches `messages` in place (thread replies) and records any authors
    /// missing from `users`.
    fn fetch_extras(
        &mut self,
        channel: &Channel,
        messages: &mut [Message],
        users: &mut UserDirectory,
    ) -> Result<()>;

    fn fetch_avatars(&mut self, users: &UserDirectory) -> Result<()>;

    /// Downloads attachments referenced by the channel's persisted messages.
    fn fetch_files(&mut self, channel_id: &str) -> Result<()>;
}
