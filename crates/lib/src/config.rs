//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.catarina/config.json`) and
//! environment. Secrets (UAZAPI token, Google OAuth, Supabase key, OpenAI
//! key) may live in the file or be overridden per-variable from the
//! environment; env always wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// WhatsApp (UAZAPI instance) settings.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Google Calendar settings.
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Supabase (contacts + knowledge base) settings.
    #[serde(default)]
    pub supabase: SupabaseConfig,

    /// Agent defaults (model, OpenAI key).
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook HTTP server (default 15161).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1"). The webhook URL itself is the
    /// only access control, so think before binding wider.
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15161
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// UAZAPI instance config. Overridden by UAZAPI_BASE_URL / UAZAPI_INSTANCE_TOKEN env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    /// Instance base URL, e.g. "https://sub.uazapi.com".
    pub base_url: Option<String>,
    /// Instance token sent as the `token` header on every call.
    pub instance_token: Option<String>,
}

/// Google Calendar OAuth config. Overridden by CALENDAR_CLIENT_ID,
/// CALENDAR_CLIENT_SECRET, CALENDAR_REFRESH_TOKEN, DEFAULT_CALENDAR_ID env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Calendar queried for busy intervals (default "primary").
    pub calendar_id: Option<String>,
}

/// Supabase project config. Overridden by SUPABASE_URL / SUPABASE_SERVICE_ROLE_KEY env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupabaseConfig {
    pub url: Option<String>,
    pub service_role_key: Option<String>,
}

/// Agent defaults (model, key). Key overridden by OPENAI_API_KEY env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Chat model id passed as-is to the backend (default "gpt-4o-mini").
    pub default_model: Option<String>,
    pub openai_api_key: Option<String>,
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

fn config_non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the UAZAPI base URL: env UAZAPI_BASE_URL overrides config. Trailing slashes stripped.
pub fn resolve_uazapi_base_url(config: &Config) -> Option<String> {
    env_non_empty("UAZAPI_BASE_URL")
        .or_else(|| config_non_empty(config.whatsapp.base_url.as_ref()))
        .map(|s| s.trim_end_matches('/').to_string())
}

/// Resolve the UAZAPI instance token: env UAZAPI_INSTANCE_TOKEN overrides config.
pub fn resolve_uazapi_token(config: &Config) -> Option<String> {
    env_non_empty("UAZAPI_INSTANCE_TOKEN")
        .or_else(|| config_non_empty(config.whatsapp.instance_token.as_ref()))
}

/// Resolve Google Calendar credentials: env overrides config. Returns None
/// unless client id, client secret, and refresh token are all present.
pub fn resolve_calendar_credentials(config: &Config) -> Option<(String, String, String)> {
    let client_id = env_non_empty("CALENDAR_CLIENT_ID")
        .or_else(|| config_non_empty(config.calendar.client_id.as_ref()))?;
    let client_secret = env_non_empty("CALENDAR_CLIENT_SECRET")
        .or_else(|| config_non_empty(config.calendar.client_secret.as_ref()))?;
    let refresh_token = env_non_empty("CALENDAR_REFRESH_TOKEN")
        .or_else(|| config_non_empty(config.calendar.refresh_token.as_ref()))?;
    Some((client_id, client_secret, refresh_token))
}

/// Resolve the calendar id queried for busy intervals (default "primary").
pub fn resolve_calendar_id(config: &Config) -> String {
    env_non_empty("DEFAULT_CALENDAR_ID")
        .or_else(|| config_non_empty(config.calendar.calendar_id.as_ref()))
        .unwrap_or_else(|| "primary".to_string())
}

/// Resolve Supabase URL + service role key: env overrides config.
pub fn resolve_supabase(config: &Config) -> Option<(String, String)> {
    let url = env_non_empty("SUPABASE_URL")
        .or_else(|| config_non_empty(config.supabase.url.as_ref()))
        .map(|s| s.trim_end_matches('/').to_string())?;
    let key = env_non_empty("SUPABASE_SERVICE_ROLE_KEY")
        .or_else(|| config_non_empty(config.supabase.service_role_key.as_ref()))?;
    Some((url, key))
}

/// Resolve the OpenAI API key: env OPENAI_API_KEY overrides config.
pub fn resolve_openai_key(config: &Config) -> Option<String> {
    env_non_empty("OPENAI_API_KEY")
        .or_else(|| config_non_empty(config.agents.openai_api_key.as_ref()))
}

/// Resolve config path from env or default (~/.catarina/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("CATARINA_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".catarina").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or CATARINA_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 15161);
        assert_eq!(g.bind, "127.0.0.1");
    }

    #[test]
    fn calendar_id_defaults_to_primary() {
        let config = Config::default();
        assert_eq!(resolve_calendar_id(&config), "primary");
    }

    #[test]
    fn calendar_credentials_require_all_three() {
        let mut config = Config::default();
        config.calendar.client_id = Some("id".to_string());
        config.calendar.client_secret = Some("secret".to_string());
        assert!(resolve_calendar_credentials(&config).is_none());
        config.calendar.refresh_token = Some("refresh".to_string());
        assert_eq!(
            resolve_calendar_credentials(&config),
            Some(("id".to_string(), "secret".to_string(), "refresh".to_string()))
        );
    }

    #[test]
    fn base_url_trailing_slash_stripped() {
        let mut config = Config::default();
        config.whatsapp.base_url = Some("https://sub.uazapi.com/".to_string());
        assert_eq!(
            resolve_uazapi_base_url(&config).as_deref(),
            Some("https://sub.uazapi.com")
        );
    }

    #[test]
    fn blank_config_values_are_ignored() {
        let mut config = Config::default();
        config.whatsapp.instance_token = Some("   ".to_string());
        assert!(resolve_uazapi_token(&config).is_none());
    }
}
