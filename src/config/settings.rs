use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{BridgeError, Result};

pub const DEFAULT_POE_BOT: &str = "Qwen-3-235B-0527-T";
pub const DEFAULT_POE_BASE_URL: &str = "https://api.poe.com";

const CONFIG_PATH_ENV: &str = "POE_BRIDGE_CONFIG";
const BRIDGE_TOKEN_ENVS: [&str; 2] = ["BRIDGE_AUTH_TOKEN", "MODAL_AUTH_TOKEN"];
const POE_API_KEY_ENVS: [&str; 2] = ["POE_API_KEY", "POE_CALLER_API_KEY1"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub poe: PoeConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Never read from the config file; populated from the environment.
    #[serde(skip)]
    pub credential: BridgeCredential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoeConfig {
    pub base_url: String,
    /// Bot used when the prompt carries no `#@<bot>` directive.
    pub default_bot: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Set to false to ignore HTTP(S)_PROXY style variables for upstream calls.
    pub use_env_proxy: bool,
    /// Capacity of the per-request fragment channel.
    pub fragment_buffer: usize,
}

impl Default for PoeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_POE_BASE_URL.to_string(),
            default_bot: DEFAULT_POE_BOT.to_string(),
            request_timeout_secs: 300,
            connect_timeout_secs: 10,
            use_env_proxy: true,
            fragment_buffer: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub system_prompt: Option<String>,
    pub inject_tools: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            inject_tools: true,
        }
    }
}

/// Inbound bridge token plus the upstream Poe key. Loaded once, read-only afterwards.
#[derive(Clone, Default)]
pub struct BridgeCredential {
    inbound_token: String,
    upstream_api_key: String,
}

impl BridgeCredential {
    pub fn new(inbound_token: impl Into<String>, upstream_api_key: impl Into<String>) -> Self {
        Self {
            inbound_token: inbound_token.into(),
            upstream_api_key: upstream_api_key.into(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let first_set = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(*k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };
        let inbound_token = first_set(&BRIDGE_TOKEN_ENVS).ok_or_else(|| {
            BridgeError::Config(format!(
                "bridge token not configured; set {}",
                BRIDGE_TOKEN_ENVS[0]
            ))
        })?;
        let upstream_api_key = first_set(&POE_API_KEY_ENVS).ok_or_else(|| {
            BridgeError::Config(format!(
                "Poe API key not configured; set {}",
                POE_API_KEY_ENVS[0]
            ))
        })?;
        Ok(Self::new(inbound_token, upstream_api_key))
    }

    pub fn inbound_token(&self) -> &str {
        &self.inbound_token
    }

    pub fn upstream_api_key(&self) -> &str {
        &self.upstream_api_key
    }
}

impl fmt::Debug for BridgeCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeCredential")
            .field("inbound_token", &"<redacted>")
            .field("upstream_api_key", &"<redacted>")
            .finish()
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path);
                Self::from_file(&path)?
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Settings::default()
            }
        };
        settings.credential = BridgeCredential::from_env()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poe.default_bot.trim().is_empty() {
            return Err(BridgeError::Config("poe.default_bot must not be empty".into()));
        }
        if self.poe.request_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "poe.request_timeout_secs must be positive".into(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(BridgeError::Config(
                "server.max_body_bytes must be positive".into(),
            ));
        }
        if self.poe.fragment_buffer == 0 {
            return Err(BridgeError::Config(
                "poe.fragment_buffer must be positive".into(),
            ));
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Some(path);
            }
        }

        let possible_names = ["custom-config.toml", "config.toml"];
        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }
}
