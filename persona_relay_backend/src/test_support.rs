//! Fakes shared by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::llm_client::CompletionBackend;
use crate::platform::ChatPlatform;
use crate::turn::{ChannelId, MessageId, Role, Turn, UserId};

type Responder = Box<dyn Fn(&[Turn]) -> Result<String> + Send + Sync>;

pub struct ScriptedBackend {
    responder: Responder,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&[Turn]) -> Result<String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(anyhow::anyhow!("connection refused")))
    }

    /// Answers relevance checks with `relevance` and everything else with `reply`.
    pub fn conversational(relevance: &str, reply: &str) -> Arc<Self> {
        let relevance = relevance.to_string();
        let reply = reply.to_string();
        Self::new(move |messages| {
            if is_relevance_prompt(messages) {
                Ok(relevance.clone())
            } else {
                Ok(reply.clone())
            }
        })
    }

    pub fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, messages: Vec<Turn>) -> Result<String> {
        let result = (self.responder)(&messages);
        self.calls.lock().unwrap().push(messages);
        result
    }
}

pub fn is_relevance_prompt(messages: &[Turn]) -> bool {
    messages
        .iter()
        .any(|t| t.role == Role::System && t.content.contains("Decide if the next message"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Sent {
        channel: ChannelId,
        message: MessageId,
        content: String,
    },
    Edited {
        channel: ChannelId,
        message: MessageId,
        content: String,
    },
    Typing {
        channel: ChannelId,
    },
}

#[derive(Default)]
pub struct RecordingPlatform {
    events: Mutex<Vec<PlatformEvent>>,
    admins: Mutex<HashSet<UserId>>,
    next_id: AtomicUsize,
    fail_sends: AtomicBool,
    fail_typing: AtomicBool,
    fail_admin_lookup: AtomicBool,
}

impl RecordingPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn grant_admin(&self, user: &str) {
        self.admins.lock().unwrap().insert(UserId::new(user));
    }

    /// Make every `send_message` call fail from now on.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_typing(&self) {
        self.fail_typing.store(true, Ordering::SeqCst);
    }

    pub fn fail_admin_lookup(&self) {
        self.fail_admin_lookup.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Content of every new message sent to `channel`, in order.
    pub fn sent_to(&self, channel: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PlatformEvent::Sent {
                    channel: c,
                    content,
                    ..
                } if c.as_str() == channel => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageId, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PlatformEvent::Edited {
                    message, content, ..
                } => Some((message, content)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<MessageId> {
        if self.fail_sends.load(Ordering::SeqCst) {
            anyhow::bail!("Missing Access");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message = MessageId::new(format!("m{}", id));
        self.events.lock().unwrap().push(PlatformEvent::Sent {
            channel: channel.clone(),
            message: message.clone(),
            content: content.to_string(),
        });
        Ok(message)
    }

    async fn edit_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        content: &str,
    ) -> Result<()> {
        self.events.lock().unwrap().push(PlatformEvent::Edited {
            channel: channel.clone(),
            message: message.clone(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn trigger_typing(&self, channel: &ChannelId) -> Result<()> {
        if self.fail_typing.load(Ordering::SeqCst) {
            anyhow::bail!("rate limited");
        }
        self.events.lock().unwrap().push(PlatformEvent::Typing {
            channel: channel.clone(),
        });
        Ok(())
    }

    async fn is_administrator(
        &self,
        _guild_id: Option<&str>,
        _channel: &ChannelId,
        user: &UserId,
    ) -> Result<bool> {
        if self.fail_admin_lookup.load(Ordering::SeqCst) {
            anyhow::bail!("guild lookup failed");
        }
        Ok(self.admins.lock().unwrap().contains(user))
    }
}
