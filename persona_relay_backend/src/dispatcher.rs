use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};

use crate::access::AccessPolicy;
use crate::commands::{parse_command, Command, ParsedCommand};
use crate::llm_gateway::LlmGateway;
use crate::persona::PersonaStore;
use crate::platform::{ChatPlatform, GatewayEvent, InboundMessage};
use crate::session::{ConversationOutcome, SessionManager};
use crate::turn::UserId;

pub const PERMISSION_DENIED: &str = "🚫 You need administrator permission to use this command.";

/// Everything a handler may read or mutate, shared by all event tasks.
pub struct BotState {
    pub persona: PersonaStore,
    pub access: AccessPolicy,
    pub sessions: SessionManager,
    pub gateway: LlmGateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    NotAddressed,
    ChannelNotAllowed,
    EmptyContent,
}

/// What the dispatcher did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Ready,
    Ignored(IgnoreReason),
    Command(&'static str),
    Usage(&'static str),
    PermissionDenied(&'static str),
    Conversation(ConversationOutcome),
}

pub struct Dispatcher {
    state: Arc<BotState>,
    platform: Arc<dyn ChatPlatform>,
    command_prefix: String,
    bot_user: RwLock<Option<UserId>>,
}

impl Dispatcher {
    pub fn new(state: Arc<BotState>, platform: Arc<dyn ChatPlatform>, command_prefix: String) -> Self {
        Self {
            state,
            platform,
            command_prefix,
            bot_user: RwLock::new(None),
        }
    }

    pub fn state(&self) -> &Arc<BotState> {
        &self.state
    }

    pub fn bot_user(&self) -> Option<UserId> {
        self.bot_user
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn handle_event(&self, event: GatewayEvent) -> Result<Dispatch> {
        match event {
            GatewayEvent::Ready { user_id, username } => {
                tracing::info!("✅ Logged in as {} ({})", username, user_id);
                *self
                    .bot_user
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(user_id);
                Ok(Dispatch::Ready)
            }
            GatewayEvent::Message(message) => self.handle_message(message).await,
        }
    }

    pub async fn handle_message(&self, message: InboundMessage) -> Result<Dispatch> {
        let bot = self.bot_user();

        if bot.as_ref() == Some(&message.author_id) {
            return Ok(Dispatch::Ignored(IgnoreReason::OwnMessage));
        }

        if let Some(invocation) = self.strip_invocation(&message.content, bot.as_ref()) {
            match parse_command(invocation) {
                ParsedCommand::Command(command) => return self.run_command(&message, command).await,
                ParsedCommand::Usage(usage) => {
                    self.platform
                        .send_message(&message.channel_id, usage)
                        .await
                        .context("Failed to send usage hint")?;
                    return Ok(Dispatch::Usage(usage));
                }
                ParsedCommand::NotACommand => {}
            }
        }

        let sole_mention = match &bot {
            Some(bot) => message.mentions.len() == 1 && &message.mentions[0] == bot,
            None => false,
        };
        let prefixed = message
            .content
            .trim_start()
            .starts_with(self.command_prefix.as_str());
        if !sole_mention && !prefixed {
            return Ok(Dispatch::Ignored(IgnoreReason::NotAddressed));
        }

        if !self.state.access.is_allowed(&message.channel_id).await {
            tracing::debug!(
                "Ignoring message in channel {} (not allowed)",
                message.channel_id
            );
            return Ok(Dispatch::Ignored(IgnoreReason::ChannelNotAllowed));
        }

        let content = self.conversation_text(&message.content, bot.as_ref());
        if content.is_empty() {
            return Ok(Dispatch::Ignored(IgnoreReason::EmptyContent));
        }

        let outcome = self
            .state
            .sessions
            .converse(
                &message.channel_id,
                &content,
                &self.state.persona,
                &self.state.gateway,
                &*self.platform,
            )
            .await?;
        Ok(Dispatch::Conversation(outcome))
    }

    /// The text after the command prefix or a leading bot mention, if either is present.
    fn strip_invocation<'a>(&self, content: &'a str, bot: Option<&UserId>) -> Option<&'a str> {
        let content = content.trim_start();
        if let Some(rest) = content.strip_prefix(self.command_prefix.as_str()) {
            return Some(rest);
        }
        let bot = bot?;
        let plain = format!("<@{}>", bot);
        let nick = format!("<@!{}>", bot);
        content
            .strip_prefix(plain.as_str())
            .or_else(|| content.strip_prefix(nick.as_str()))
    }

    /// The message as the model should see it: bot mentions and the prefix removed.
    fn conversation_text(&self, content: &str, bot: Option<&UserId>) -> String {
        let mut text = content.to_string();
        if let Some(bot) = bot {
            let pattern = format!(r"<@!?{}>", regex_lite::escape(bot.as_str()));
            if let Ok(re) = regex_lite::Regex::new(&pattern) {
                text = re.replace_all(&text, "").into_owned();
            }
        }
        let text = text.trim();
        text.strip_prefix(self.command_prefix.as_str())
            .unwrap_or(text)
            .trim()
            .to_string()
    }

    async fn run_command(&self, message: &InboundMessage, command: Command) -> Result<Dispatch> {
        let name = command.name();

        if command.requires_admin() {
            let is_admin = match self
                .platform
                .is_administrator(
                    message.guild_id.as_deref(),
                    &message.channel_id,
                    &message.author_id,
                )
                .await
            {
                Ok(is_admin) => is_admin,
                Err(e) => {
                    tracing::warn!(
                        "Permission lookup failed for {} in {}: {:#}",
                        message.author_id,
                        message.channel_id,
                        e
                    );
                    false
                }
            };

            if !is_admin {
                tracing::info!("Denied {} for {}", name, message.author_id);
                self.platform
                    .send_message(&message.channel_id, PERMISSION_DENIED)
                    .await
                    .context("Failed to send permission denial")?;
                return Ok(Dispatch::PermissionDenied(name));
            }
        }

        tracing::info!("Running {} for {}", name, message.author_id);
        let origin = &message.channel_id;

        match command {
            Command::SetCharacter { name, description } => {
                let change = self
                    .state
                    .persona
                    .set_persona(&name, &description, &self.state.gateway)
                    .await;

                self.platform
                    .send_message(
                        origin,
                        &format!(
                            "✨ Persona changed! Now speaking as **{}**.\n{}",
                            change.persona.name, change.persona.description
                        ),
                    )
                    .await?;
                self.platform
                    .send_message(
                        origin,
                        &format!("_Loading message set to: {}_", change.flavor.loading),
                    )
                    .await?;
                self.platform
                    .send_message(
                        origin,
                        &format!("_Greeting message updated: {}_", change.flavor.greeting),
                    )
                    .await?;
            }
            Command::AllowChannel { channel } => {
                self.state.access.allow(&channel).await;
                self.platform
                    .send_message(
                        origin,
                        &format!(
                            "✅ {} has been added to allowed AI channels.",
                            channel.mention()
                        ),
                    )
                    .await?;
                let greeting = self.state.persona.greeting_message().await;
                self.platform
                    .send_message(&channel, &greeting)
                    .await
                    .with_context(|| format!("Failed to greet channel {}", channel))?;
            }
            Command::RemoveChannel { channel } => {
                self.state.access.deny(&channel).await;
                self.platform
                    .send_message(
                        origin,
                        &format!(
                            "❌ {} has been removed from allowed AI channels.",
                            channel.mention()
                        ),
                    )
                    .await?;
            }
        }

        Ok(Dispatch::Command(name))
    }
}
