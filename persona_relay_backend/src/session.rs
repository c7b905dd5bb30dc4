//! Per-channel conversation memory and the relevance-gated reply cycle.
//!
//! Each channel owns one history behind its own async mutex. A reply cycle
//! holds that mutex from the relevance check until the assistant turn is
//! stored, so messages in one channel are processed strictly in order while
//! other channels proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::llm_gateway::LlmGateway;
use crate::persona::PersonaStore;
use crate::platform::ChatPlatform;
use crate::turn::{ChannelId, MessageId, Turn};

pub const RESET_NOTICE: &str = "🧹 Resetting conversation due to off-topic message...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Empty,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationOutcome {
    /// The history was cleared before this message was stored.
    pub reset: bool,
    pub reply: String,
    /// The loading message that was edited into the reply.
    pub placeholder: MessageId,
}

type History = Arc<tokio::sync::Mutex<Vec<Turn>>>;

#[derive(Default)]
pub struct SessionManager {
    channels: Mutex<HashMap<ChannelId, History>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn history_for(&self, channel: &ChannelId) -> History {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels.entry(channel.clone()).or_default().clone()
    }

    fn existing(&self, channel: &ChannelId) -> Option<History> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel)
            .cloned()
    }

    /// Snapshot of a channel's stored turns, oldest first.
    pub async fn history(&self, channel: &ChannelId) -> Vec<Turn> {
        match self.existing(channel) {
            Some(history) => history.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn state(&self, channel: &ChannelId) -> ChannelState {
        if self.history(channel).await.is_empty() {
            ChannelState::Empty
        } else {
            ChannelState::Active
        }
    }

    /// Run one full reply cycle for `content` in `channel`:
    /// relevance check, optional reset, user turn, loading placeholder,
    /// reply, assistant turn, and finally the placeholder edit.
    pub async fn converse(
        &self,
        channel: &ChannelId,
        content: &str,
        persona: &PersonaStore,
        gateway: &LlmGateway,
        platform: &dyn ChatPlatform,
    ) -> Result<ConversationOutcome> {
        let history = self.history_for(channel);
        let mut turns = history.lock().await;

        let relevance = gateway.check_relevance(&turns, content).await;
        let reset = relevance.should_reset();
        if reset {
            tracing::info!(
                "Resetting conversation in channel {} ({} turns dropped)",
                channel,
                turns.len()
            );
            turns.clear();
            platform
                .send_message(channel, RESET_NOTICE)
                .await
                .context("Failed to send reset notice")?;
        }

        turns.push(Turn::user(content));

        if let Err(e) = platform.trigger_typing(channel).await {
            tracing::debug!("Typing indicator failed in channel {}: {:#}", channel, e);
        }

        let loading = persona.loading_message().await;
        let placeholder = platform
            .send_message(channel, &loading)
            .await
            .context("Failed to send loading message")?;

        // Persona is read per reply so a switch recolors existing history.
        let current = persona.current_persona().await;
        let reply = gateway.reply(&current, &turns).await.into_text();
        turns.push(Turn::assistant(reply.clone()));
        drop(turns);

        platform
            .edit_message(channel, &placeholder, &reply)
            .await
            .context("Failed to replace loading message with reply")?;

        Ok(ConversationOutcome {
            reset,
            reply,
            placeholder,
        })
    }
}
