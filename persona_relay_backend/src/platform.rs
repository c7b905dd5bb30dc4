//! The chat-platform seam.
//!
//! Domain code only talks to [`ChatPlatform`]; the Discord adapter lives in
//! [`crate::discord`] and tests substitute a recording fake.

use anyhow::Result;
use async_trait::async_trait;

use crate::turn::{ChannelId, MessageId, UserId};

/// A message event delivered by the platform's gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<String>,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub content: String,
    pub mentions: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The session is established; `user_id` is the bot's own account.
    Ready { user_id: UserId, username: String },
    Message(InboundMessage),
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a new message and return its id so it can be edited later.
    async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<MessageId>;

    async fn edit_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        content: &str,
    ) -> Result<()>;

    /// Show the "bot is typing" indicator. Callers treat failures as cosmetic.
    async fn trigger_typing(&self, channel: &ChannelId) -> Result<()>;

    /// Whether `user` holds administrator capability where `channel` lives.
    async fn is_administrator(
        &self,
        guild_id: Option<&str>,
        channel: &ChannelId,
        user: &UserId,
    ) -> Result<bool>;
}
