use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// How the relevance gate reads the model's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceMatch {
    /// `"yes"` anywhere in the answer counts, including inside other words.
    #[default]
    Substring,
    /// `"yes"` must appear as a standalone word.
    Token,
}

impl RelevanceMatch {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "substring" => Some(Self::Substring),
            "token" | "exact" => Some(Self::Token),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    // LLM configuration (OpenAI-compatible: DeepSeek, OpenAI, Ollama, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub llm_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub llm_max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Chat behavior
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_relevance_window")]
    pub relevance_window: usize,
    #[serde(default)]
    pub relevance_match: RelevanceMatch,

    // Startup persona
    #[serde(default = "default_persona_name")]
    pub persona_name: String,
    #[serde(default = "default_persona_description")]
    pub persona_description: String,

    // Discord connection
    #[serde(default = "default_discord_api_base")]
    pub discord_api_base: String,
    #[serde(default = "default_gateway_reconnect_secs")]
    pub gateway_reconnect_secs: u64,
}

fn default_llm_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_relevance_window() -> usize {
    6
}

fn default_persona_name() -> String {
    "XJ-9".to_string()
}

fn default_persona_description() -> String {
    "XJ-9, aka Jenny Wakeman, is a teenage robot hero. \
     Energetic, clever, sarcastic, and loves hanging out with friends. \
     She can be heroic and serious when needed but often injects humor and quirkiness."
        .to_string()
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_reconnect_secs() -> u64 {
    5
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_temperature: default_temperature(),
            llm_max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            command_prefix: default_command_prefix(),
            relevance_window: default_relevance_window(),
            relevance_match: RelevanceMatch::default(),
            persona_name: default_persona_name(),
            persona_description: default_persona_description(),
            discord_api_base: default_discord_api_base(),
            gateway_reconnect_secs: default_gateway_reconnect_secs(),
        }
    }
}

impl BotConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("persona_relay.toml")
    }

    /// Load config from persona_relay.toml (next to executable), then apply env overrides.
    pub fn load() -> Self {
        let mut config = Self::load_from_path(&Self::config_path());
        config.apply_env_overrides(|key| env::var(key).ok());
        config
    }

    /// Parse a config file, falling back to defaults when it is missing or malformed.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<BotConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::warn!("No config file at {:?}, using defaults + env vars", path);
                Self::default()
            }
        }
    }

    /// Load `.env` from the working directory into the process environment.
    /// Variables already set in the environment win.
    pub fn load_dotenv() -> bool {
        match dotenvy::dotenv() {
            Ok(path) => {
                tracing::info!("Loaded environment from {:?}", path);
                true
            }
            Err(e) => {
                tracing::debug!(".env not loaded ({}), using process environment", e);
                false
            }
        }
    }

    pub fn load_dotenv_from(path: &Path) -> bool {
        match dotenvy::from_path(path) {
            Ok(()) => {
                tracing::info!("Loaded environment from {:?}", path);
                true
            }
            Err(e) => {
                tracing::debug!("{:?} not loaded ({}), using process environment", path, e);
                false
            }
        }
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_blank("LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Some(model) = non_blank("LLM_MODEL") {
            self.llm_model = model;
        }

        if let Some(key) = non_blank("DEEPSEEK_API_KEY").or_else(|| non_blank("LLM_API_KEY")) {
            self.llm_api_key = Some(key);
        }

        if let Some(prefix) = non_blank("BOT_COMMAND_PREFIX") {
            self.command_prefix = prefix.trim().to_string();
        }

        if let Some(mode) = non_blank("BOT_RELEVANCE_MATCH") {
            match RelevanceMatch::parse(&mode) {
                Some(mode) => self.relevance_match = mode,
                None => tracing::warn!("Ignoring unknown BOT_RELEVANCE_MATCH value {:?}", mode),
            }
        }

        if let Some(name) = non_blank("BOT_PERSONA_NAME") {
            self.persona_name = name;
        }

        if let Some(description) = non_blank("BOT_PERSONA_DESCRIPTION") {
            self.persona_description = description;
        }
    }

    /// The Discord bot token. Startup cannot proceed without it.
    pub fn discord_token() -> Result<String> {
        Self::discord_token_from(|key| env::var(key).ok())
    }

    pub fn discord_token_from<F>(lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup("DISCORD_TOKEN")
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .context("DISCORD_TOKEN is not set")
    }
}
