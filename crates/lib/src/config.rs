//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.techwolf/config.json`) and environment.
//! Every field has a default so an absent file or `{}` yields a working bot.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::client::BrowserIdentity;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP front door settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Command prefix, bot identity, session storage, bulk-add pacing.
    #[serde(default)]
    pub bot: BotConfig,

    /// Messaging bridge (Evolution API) connection.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 8080). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0", all interfaces).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Display name used in replies and the status page (default "TECHWOLF").
    #[serde(default = "default_bot_name")]
    pub name: String,

    /// Single-character command prefix (default ".").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Client identity announced when connecting: [name, browser, version].
    #[serde(default)]
    pub browser: BrowserIdentity,

    /// Root of the per-number credential directories (default "./sessions").
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    /// Pause after every bulk-add attempt, in milliseconds (default 1500).
    #[serde(default = "default_add_delay_ms")]
    pub add_delay_ms: u64,
}

fn default_bot_name() -> String {
    "TECHWOLF".to_string()
}

fn default_prefix() -> String {
    ".".to_string()
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("./sessions")
}

fn default_add_delay_ms() -> u64 {
    1500
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            prefix: default_prefix(),
            browser: BrowserIdentity::default(),
            sessions_dir: default_sessions_dir(),
            add_delay_ms: default_add_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Bridge REST base URL (default "http://127.0.0.1:8085"). Overridden by TECHWOLF_BRIDGE_URL.
    #[serde(default = "default_bridge_url")]
    pub api_url: String,

    /// Global bridge API key. Overridden by TECHWOLF_BRIDGE_API_KEY.
    pub api_key: Option<String>,

    /// Base URL the bridge uses to reach this gateway's webhook route. Overridden by
    /// TECHWOLF_PUBLIC_URL. When unset, derived from the gateway port on loopback.
    pub public_url: Option<String>,
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:8085".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_url: default_bridge_url(),
            api_key: None,
            public_url: None,
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Apply environment overrides: PORT, TECHWOLF_BRIDGE_URL, TECHWOLF_BRIDGE_API_KEY,
/// TECHWOLF_PUBLIC_URL. An unparseable PORT is ignored with a warning.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(p) = env_non_empty("PORT") {
        match p.parse() {
            Ok(port) => config.gateway.port = port,
            Err(_) => log::warn!("ignoring invalid PORT value {:?}", p),
        }
    }
    if let Some(url) = env_non_empty("TECHWOLF_BRIDGE_URL") {
        config.bridge.api_url = url;
    }
    if let Some(key) = env_non_empty("TECHWOLF_BRIDGE_API_KEY") {
        config.bridge.api_key = Some(key);
    }
    if let Some(url) = env_non_empty("TECHWOLF_PUBLIC_URL") {
        config.bridge.public_url = Some(url);
    }
}

/// Bridge API key, empty when unset.
pub fn bridge_api_key(config: &Config) -> String {
    config
        .bridge
        .api_key
        .as_ref()
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Base URL the bridge should POST webhooks to: the configured public URL, or loopback on the
/// gateway port.
pub fn public_url(config: &Config) -> String {
    config
        .bridge
        .public_url
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.gateway.port))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TECHWOLF_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".techwolf").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or TECHWOLF_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
