use anyhow::{Context, Result};
use persona_relay_backend::config::BotConfig;
use persona_relay_backend::runtime::BotRuntime;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,persona_relay=debug,persona_relay_backend=debug")
            }),
        )
        .init();

    BotConfig::load_dotenv();
    let config = BotConfig::load();
    let token =
        BotConfig::discord_token().context("cannot start without a Discord bot token")?;
    let runtime = BotRuntime::bootstrap_discord(config, token)
        .context("failed to bootstrap bot runtime")?;

    tracing::info!(
        "Starting persona relay (config file: {})",
        BotConfig::config_path().display()
    );

    let bot_rt = tokio::runtime::Runtime::new().context("failed to start bot runtime")?;
    bot_rt.block_on(runtime.run())
}
