//! Channels the bot is allowed to talk in.
//!
//! Starts empty and lives only in memory. Callers are trusted: the
//! administrator check happens before a mutation reaches this type.

use std::collections::HashSet;

use tokio::sync::RwLock;

use crate::turn::ChannelId;

#[derive(Default)]
pub struct AccessPolicy {
    allowed: RwLock<HashSet<ChannelId>>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the channel was not already allowed.
    pub async fn allow(&self, channel: &ChannelId) -> bool {
        let added = self.allowed.write().await.insert(channel.clone());
        tracing::info!("Allowed channel {} (new: {})", channel, added);
        added
    }

    /// Returns true when the channel had been allowed.
    pub async fn deny(&self, channel: &ChannelId) -> bool {
        let removed = self.allowed.write().await.remove(channel);
        tracing::info!("Removed channel {} (was allowed: {})", channel, removed);
        removed
    }

    pub async fn is_allowed(&self, channel: &ChannelId) -> bool {
        self.allowed.read().await.contains(channel)
    }

    pub async fn allowed_channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.allowed.read().await.iter().cloned().collect();
        channels.sort();
        channels
    }
}
