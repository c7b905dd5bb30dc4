use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use flume::Receiver;

use crate::access::AccessPolicy;
use crate::config::BotConfig;
use crate::discord::DiscordClient;
use crate::dispatcher::{BotState, Dispatcher};
use crate::http_client::build_http_client_with_timeout;
use crate::llm_client::{CompletionBackend, LlmClient};
use crate::llm_gateway::LlmGateway;
use crate::persona::{Persona, PersonaStore};
use crate::platform::{ChatPlatform, GatewayEvent};
use crate::session::SessionManager;

pub struct BotRuntime {
    pub config: BotConfig,
    pub dispatcher: Arc<Dispatcher>,
    discord: Option<DiscordClient>,
}

pub struct BotRuntimeBuilder {
    config: BotConfig,
    backend: Option<Arc<dyn CompletionBackend>>,
    platform: Option<Arc<dyn ChatPlatform>>,
}

impl BotRuntimeBuilder {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            backend: None,
            platform: None,
        }
    }

    /// Replace the HTTP completion client, e.g. with a local model adapter.
    pub fn with_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a platform other than Discord. The gateway is then driven by the caller.
    pub fn with_platform(mut self, platform: Arc<dyn ChatPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Build with the Discord REST client as platform, authenticated with `token`.
    pub fn build_for_discord(self, token: String) -> Result<BotRuntime> {
        let http = build_http_client_with_timeout(Some(Duration::from_secs(
            self.config.request_timeout_secs,
        )))?;
        let discord = DiscordClient::new(self.config.discord_api_base.clone(), token, http);
        let platform: Arc<dyn ChatPlatform> = Arc::new(discord.clone());
        let mut runtime = self.with_platform(platform).build()?;
        runtime.discord = Some(discord);
        Ok(runtime)
    }

    pub fn build(self) -> Result<BotRuntime> {
        let config = self.config;
        let platform = self
            .platform
            .context("No chat platform configured for the bot runtime")?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                let http = build_http_client_with_timeout(Some(Duration::from_secs(
                    config.request_timeout_secs,
                )))?;
                if config.llm_api_key.is_none() {
                    tracing::warn!("No LLM API key configured; completions will use fallbacks");
                }
                tracing::info!(
                    "LLM backend: {} (model: {})",
                    config.llm_api_url,
                    config.llm_model
                );
                Arc::new(LlmClient::from_config(&config, http))
            }
        };

        let gateway = LlmGateway::new(backend)
            .with_relevance(config.relevance_window, config.relevance_match);
        let state = Arc::new(BotState {
            persona: PersonaStore::new(Persona::new(
                config.persona_name.clone(),
                config.persona_description.clone(),
            )),
            access: AccessPolicy::new(),
            sessions: SessionManager::new(),
            gateway,
        });
        let dispatcher = Arc::new(Dispatcher::new(
            state,
            platform,
            config.command_prefix.clone(),
        ));

        tracing::info!(
            "Bot runtime ready (persona: {}, prefix: {:?}, relevance: {:?})",
            config.persona_name,
            config.command_prefix,
            config.relevance_match
        );

        Ok(BotRuntime {
            config,
            dispatcher,
            discord: None,
        })
    }
}

impl BotRuntime {
    pub fn bootstrap_discord(config: BotConfig, token: String) -> Result<Self> {
        BotRuntimeBuilder::new(config).build_for_discord(token)
    }

    /// Connect to the Discord gateway and serve events until the process stops.
    pub async fn run(&self) -> Result<()> {
        let discord = self
            .discord
            .clone()
            .context("Runtime was not built for Discord")?;
        let (event_tx, event_rx) = flume::unbounded();
        let reconnect = Duration::from_secs(self.config.gateway_reconnect_secs);

        let gateway_task = tokio::spawn(async move { discord.run_gateway(event_tx, reconnect).await });

        self.pump_events(event_rx).await;

        gateway_task
            .await
            .context("Gateway task panicked")?
            .context("Gateway task failed")
    }

    /// Dispatch each message on its own task until every sender is gone.
    /// READY is applied inline so later messages already know the bot's id.
    pub async fn pump_events(&self, events: Receiver<GatewayEvent>) {
        while let Ok(event) = events.recv_async().await {
            if matches!(event, GatewayEvent::Ready { .. }) {
                if let Err(e) = self.dispatcher.handle_event(event).await {
                    tracing::error!("Ready handler error: {:#}", e);
                }
                continue;
            }

            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                match dispatcher.handle_event(event).await {
                    Ok(outcome) => tracing::debug!("Dispatched event: {:?}", outcome),
                    Err(e) => tracing::error!("Event handler error: {:#}", e),
                }
            });
        }
        tracing::info!("Event stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InboundMessage;
    use crate::test_support::{RecordingPlatform, ScriptedBackend};
    use crate::turn::{ChannelId, MessageId, Turn, UserId};

    #[test]
    fn test_build_requires_a_platform() {
        let result = BotRuntimeBuilder::new(BotConfig::default())
            .with_backend(ScriptedBackend::replying("yes"))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pump_dispatches_events_from_channel() {
        let platform = RecordingPlatform::new();
        let runtime = BotRuntimeBuilder::new(BotConfig::default())
            .with_backend(ScriptedBackend::conversational("yes", "Hey!"))
            .with_platform(platform.clone())
            .build()
            .unwrap();
        runtime
            .dispatcher
            .state()
            .access
            .allow(&ChannelId::new("C"))
            .await;

        let (tx, rx) = flume::unbounded();
        tx.send(GatewayEvent::Ready {
            user_id: UserId::new("900"),
            username: "XJ-9".to_string(),
        })
        .unwrap();
        drop(tx);
        runtime.pump_events(rx).await;

        assert_eq!(runtime.dispatcher.bot_user(), Some(UserId::new("900")));

        let (tx, rx) = flume::unbounded();
        tx.send(GatewayEvent::Message(InboundMessage {
            message_id: MessageId::new("1"),
            channel_id: ChannelId::new("C"),
            guild_id: None,
            author_id: UserId::new("5"),
            author_is_bot: false,
            content: "<@900> hello".to_string(),
            mentions: vec![UserId::new("900")],
        }))
        .unwrap();
        drop(tx);
        runtime.pump_events(rx).await;

        for _ in 0..50 {
            if platform.edits().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(platform.edits().len(), 1);
        assert_eq!(
            runtime
                .dispatcher
                .state()
                .sessions
                .history(&ChannelId::new("C"))
                .await,
            vec![Turn::user("hello"), Turn::assistant("Hey!")]
        );
    }

    #[tokio::test]
    async fn test_run_requires_discord_build() {
        let runtime = BotRuntimeBuilder::new(BotConfig::default())
            .with_backend(ScriptedBackend::replying("yes"))
            .with_platform(RecordingPlatform::new())
            .build()
            .unwrap();
        assert!(runtime.run().await.is_err());
    }
}
