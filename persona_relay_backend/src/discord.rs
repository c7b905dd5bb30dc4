//! Discord integration.
//!
//! REST calls (send, edit, typing, permission lookup) implement
//! [`ChatPlatform`]; [`DiscordClient::run_gateway`] keeps a gateway WebSocket
//! open and forwards READY and MESSAGE_CREATE events into a flume channel.
//! Reconnects forever with a fixed backoff until the receiver is dropped.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use crate::platform::{ChatPlatform, GatewayEvent, InboundMessage};
use crate::turn::{ChannelId, MessageId, UserId};

/// Discord rejects messages longer than this many characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
pub const GATEWAY_INTENTS: u64 = 1 | (1 << 9) | (1 << 12) | (1 << 15);

const ADMINISTRATOR: u64 = 1 << 3;

// ─── Gateway payloads ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    user: DiscordUser,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: DiscordUser,
    #[serde(default)]
    content: String,
    #[serde(default)]
    mentions: Vec<DiscordUser>,
}

#[derive(Debug, Deserialize)]
struct GatewayBotResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct Guild {
    pub owner_id: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

#[derive(Debug, Deserialize)]
pub struct Role {
    pub id: String,
    /// Permission bitset, serialized by Discord as a decimal string.
    pub permissions: String,
}

#[derive(Debug, Deserialize)]
pub struct GuildMember {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Map a dispatch (`op 0`) payload to a bot event. Unhandled event types yield `None`.
fn decode_dispatch(event_type: &str, data: Value) -> Option<GatewayEvent> {
    match event_type {
        "READY" => {
            let ready: ReadyData = serde_json::from_value(data).ok()?;
            Some(GatewayEvent::Ready {
                user_id: UserId::new(ready.user.id),
                username: ready.user.username,
            })
        }
        "MESSAGE_CREATE" => {
            let msg: MessageCreate = serde_json::from_value(data).ok()?;
            Some(GatewayEvent::Message(InboundMessage {
                message_id: MessageId::new(msg.id),
                channel_id: ChannelId::new(msg.channel_id),
                guild_id: msg.guild_id,
                author_id: UserId::new(msg.author.id),
                author_is_bot: msg.author.bot,
                content: msg.content,
                mentions: msg.mentions.into_iter().map(|u| UserId::new(u.id)).collect(),
            }))
        }
        _ => None,
    }
}

/// Whether `user` is the guild owner or holds a role granting ADMINISTRATOR.
/// The @everyone role shares the guild's id and always applies.
pub fn has_administrator(guild_id: &str, guild: &Guild, member: &GuildMember, user: &UserId) -> bool {
    if guild.owner_id == user.as_str() {
        return true;
    }

    guild
        .roles
        .iter()
        .filter(|role| role.id == guild_id || member.roles.iter().any(|r| r == &role.id))
        .filter_map(|role| role.permissions.parse::<u64>().ok())
        .any(|bits| bits & ADMINISTRATOR != 0)
}

/// Clamp outgoing text to what Discord accepts.
pub fn fit_message(text: &str) -> &str {
    if text.trim().is_empty() {
        return "…";
    }
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

enum SessionEnd {
    Reconnect,
    ReceiverClosed,
}

#[derive(Clone)]
pub struct DiscordClient {
    api_base: String,
    token: String,
    client: reqwest::Client,
}

impl DiscordClient {
    pub fn new(api_base: String, token: String, client: reqwest::Client) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            client,
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn get_json<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .with_context(|| format!("Discord GET {} failed", path))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Discord response for {}", path))
    }

    /// Keep a gateway session open, forwarding events into `events`.
    /// Returns once the receiving side of `events` is dropped.
    pub async fn run_gateway(
        &self,
        events: flume::Sender<GatewayEvent>,
        reconnect_delay: Duration,
    ) -> Result<()> {
        loop {
            match self.run_session(&events).await {
                Ok(SessionEnd::ReceiverClosed) => {
                    tracing::info!("Discord: event receiver closed, leaving gateway");
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect) => {
                    tracing::info!("Discord: gateway asked us to reconnect");
                }
                Err(e) => {
                    tracing::warn!("Discord gateway error: {:#}", e);
                }
            }
            tokio::time::sleep(reconnect_delay).await;
        }
    }

    async fn run_session(&self, events: &flume::Sender<GatewayEvent>) -> Result<SessionEnd> {
        let gateway: GatewayBotResponse = self.get_json("/gateway/bot").await?;
        let ws_url = format!("{}/?v=10&encoding=json", gateway.url.trim_end_matches('/'));
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .context("WebSocket connection failed")?;
        let (mut write, mut read) = ws_stream.split();

        let hello = loop {
            let frame = read
                .next()
                .await
                .context("Gateway closed before Hello")?
                .context("WebSocket error while waiting for Hello")?;
            if let Message::Text(text) = frame {
                let payload: GatewayPayload =
                    serde_json::from_str(&text).context("Invalid Hello payload")?;
                if payload.op == opcode::HELLO {
                    break payload;
                }
            }
        };
        let heartbeat_ms = hello
            .d
            .get("heartbeat_interval")
            .and_then(Value::as_u64)
            .unwrap_or(41_250);

        let identify = json!({
            "op": opcode::IDENTIFY,
            "d": {
                "token": self.token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "persona_relay",
                    "device": "persona_relay"
                }
            }
        });
        write
            .send(Message::Text(identify.to_string()))
            .await
            .context("Failed to identify")?;

        let period = Duration::from_millis(heartbeat_ms);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut sequence: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = json!({"op": opcode::HEARTBEAT, "d": sequence});
                    write
                        .send(Message::Text(beat.to_string()))
                        .await
                        .context("Failed to send heartbeat")?;
                }
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::warn!("Discord: gateway closed the connection ({:?})", frame);
                            return Ok(SessionEnd::Reconnect);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e).context("WebSocket read failed"),
                        None => return Ok(SessionEnd::Reconnect),
                    };

                    let payload: GatewayPayload = match serde_json::from_str(&text) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::debug!("Discord: skipping undecodable frame: {}", e);
                            continue;
                        }
                    };
                    if payload.s.is_some() {
                        sequence = payload.s;
                    }

                    match payload.op {
                        opcode::DISPATCH => {
                            let event_type = payload.t.unwrap_or_default();
                            if let Some(event) = decode_dispatch(&event_type, payload.d) {
                                if events.send_async(event).await.is_err() {
                                    return Ok(SessionEnd::ReceiverClosed);
                                }
                            }
                        }
                        opcode::HEARTBEAT => {
                            let beat = json!({"op": opcode::HEARTBEAT, "d": sequence});
                            write
                                .send(Message::Text(beat.to_string()))
                                .await
                                .context("Failed to answer heartbeat request")?;
                        }
                        opcode::RECONNECT | opcode::INVALID_SESSION => {
                            return Ok(SessionEnd::Reconnect);
                        }
                        opcode::HEARTBEAT_ACK => {}
                        other => tracing::debug!("Discord: ignoring opcode {}", other),
                    }
                }
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read body".to_string());
    anyhow::bail!("Discord API returned error {}: {}", status, body)
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<MessageId> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .json(&json!({ "content": fit_message(content) }))
            .send()
            .await
            .context("Discord sendMessage failed")?;
        let created: CreatedMessage = check_status(response)
            .await?
            .json()
            .await
            .context("Failed to parse created message")?;

        tracing::debug!("Discord: sent message {} to channel {}", created.id, channel);
        Ok(MessageId::new(created.id))
    }

    async fn edit_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        content: &str,
    ) -> Result<()> {
        let url = format!("{}/channels/{}/messages/{}", self.api_base, channel, message);
        let response = self
            .client
            .patch(&url)
            .header("Authorization", self.auth())
            .json(&json!({ "content": fit_message(content) }))
            .send()
            .await
            .context("Discord editMessage failed")?;
        check_status(response).await?;
        Ok(())
    }

    async fn trigger_typing(&self, channel: &ChannelId) -> Result<()> {
        let url = format!("{}/channels/{}/typing", self.api_base, channel);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .context("Discord typing failed")?;
        check_status(response).await?;
        Ok(())
    }

    async fn is_administrator(
        &self,
        guild_id: Option<&str>,
        _channel: &ChannelId,
        user: &UserId,
    ) -> Result<bool> {
        // Direct messages have no guild and no administrators.
        let Some(guild_id) = guild_id else {
            return Ok(false);
        };

        let guild: Guild = self.get_json(&format!("/guilds/{}", guild_id)).await?;
        let member: GuildMember = self
            .get_json(&format!("/guilds/{}/members/{}", guild_id, user))
            .await?;
        Ok(has_administrator(guild_id, &guild, &member, user))
    }
}
