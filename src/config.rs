//! Configuration for chatloop
//!
//! Loaded from YAML with a fallback chain:
//! 1. Explicit path if provided
//! 2. ~/.config/chatloop/chatloop.yml
//! 3. ./chatloop.yml
//! 4. Defaults
//!
//! Credentials never live in the file. Each provider names the environment
//! variable that holds its key.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::access::{AccessLevel, Caller, TieredPolicy, constant_time_eq};
use crate::llm::providers::{
    AnthropicConfig, OpenAiConfig, TunnelConfig, anthropic::ANTHROPIC_API_URL, openai::OPENAI_API_URL,
};
use crate::prompt::{DEFAULT_SYSTEM_PROMPT, SystemPromptBuilder};
use crate::runner::MAX_ITERATIONS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub conversation: ConversationConfig,
    pub access: AccessConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Bound on waiting for response headers from cloud providers
    pub timeout_ms: u64,
    pub openai: OpenAiSection,
    pub anthropic: AnthropicSection,
    pub tunnel: TunnelSection,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            openai: OpenAiSection::default(),
            anthropic: AnthropicSection::default(),
            tunnel: TunnelSection::default(),
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.openai.base_url.clone(),
            model: self.openai.model.clone(),
            max_tokens: self.openai.max_tokens,
            temperature: self.openai.temperature,
            timeout: self.timeout(),
        }
    }

    /// Messages-family config for a caller-requested model identifier
    pub fn anthropic_config(&self, requested_model: &str) -> AnthropicConfig {
        let defaults = AnthropicConfig::for_requested_model(requested_model);
        AnthropicConfig {
            base_url: self.anthropic.base_url.clone(),
            max_tokens: self.anthropic.max_tokens,
            timeout: self.timeout(),
            ..defaults
        }
    }

    /// Tunnel config, or `None` when no URL or key is available
    pub fn tunnel_config(&self) -> Option<TunnelConfig> {
        let url = self
            .tunnel
            .url
            .clone()
            .or_else(|| read_env(&self.tunnel.url_env))?;
        let api_key = read_env(&self.tunnel.api_key_env)?;

        let mut config = TunnelConfig::new(url, api_key);
        config.model = self.tunnel.model.clone();
        config.max_tokens = self.tunnel.max_tokens;
        config.timeout = Duration::from_millis(self.tunnel.timeout_ms);
        config.health_timeout = Duration::from_millis(self.tunnel.health_timeout_ms);
        config.skip_security = self.tunnel.skip_security;
        Some(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSection {
    pub api_key_env: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for OpenAiSection {
    fn default() -> Self {
        let defaults = OpenAiConfig::default();
        Self {
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: OPENAI_API_URL.to_string(),
            model: defaults.model,
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
        }
    }
}

impl OpenAiSection {
    pub fn api_key(&self) -> Option<String> {
        read_env(&self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicSection {
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl Default for AnthropicSection {
    fn default() -> Self {
        Self {
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: ANTHROPIC_API_URL.to_string(),
            max_tokens: AnthropicConfig::default().max_tokens,
        }
    }
}

impl AnthropicSection {
    pub fn api_key(&self) -> Option<String> {
        read_env(&self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSection {
    /// Tunnel URL; falls back to `url_env` when unset
    pub url: Option<String>,
    pub url_env: String,
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub health_timeout_ms: u64,
    /// Disable key and URL validation (local development only)
    pub skip_security: bool,
}

impl Default for TunnelSection {
    fn default() -> Self {
        let defaults = TunnelConfig::new("", "");
        Self {
            url: None,
            url_env: "LYNKR_TUNNEL_URL".to_string(),
            api_key_env: "LYNKR_API_KEY".to_string(),
            model: defaults.model,
            max_tokens: defaults.max_tokens,
            timeout_ms: defaults.timeout.as_millis() as u64,
            health_timeout_ms: defaults.health_timeout.as_millis() as u64,
            skip_security: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub max_iterations: u32,
    /// Events buffered between the loop and a slow reader
    pub event_buffer: usize,
    pub system_prompt: String,
    /// Extra prompt text keyed by requested model identifier
    pub theme_contexts: HashMap<String, String>,
    /// Past interactions summarized into an owner's prompt
    pub memory_limit: usize,
    /// Model identifiers that ask for the messages family
    pub messages_aliases: Vec<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            event_buffer: 64,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            theme_contexts: HashMap::new(),
            memory_limit: 10,
            messages_aliases: vec!["claude".to_string(), "opus".to_string(), "sonnet".to_string()],
        }
    }
}

impl ConversationConfig {
    pub fn prompt_builder(&self) -> SystemPromptBuilder {
        SystemPromptBuilder::new(self.system_prompt.clone(), self.theme_contexts.clone())
    }
}

/// Bearer token that identifies a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub user_id: String,
    pub level: AccessLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub visitor_tools: Vec<String>,
    pub collaborator_tools: Vec<String>,
    pub tokens: Vec<ApiToken>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            visitor_tools: vec!["current_time".to_string()],
            collaborator_tools: Vec::new(),
            tokens: Vec::new(),
        }
    }
}

impl AccessConfig {
    pub fn policy(&self) -> TieredPolicy {
        TieredPolicy::new(self.visitor_tools.clone(), self.collaborator_tools.clone())
    }

    /// Caller for a bearer token; unknown or missing tokens are anonymous.
    pub fn caller_for_token(&self, token: Option<&str>) -> Caller {
        let Some(token) = token else {
            return Caller::anonymous();
        };

        // Every entry is compared so timing does not reveal which one matched
        let mut matched = None;
        for entry in &self.tokens {
            if constant_time_eq(entry.token.as_bytes(), token.as_bytes()) && matched.is_none() {
                matched = Some(entry);
            }
        }
        matched
            .map(|entry| Caller::new(entry.user_id.clone(), entry.level))
            .unwrap_or_else(Caller::anonymous)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chatloop"),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.conversation.max_iterations == 0 {
            eyre::bail!("conversation.max_iterations must be > 0");
        }
        if self.conversation.max_iterations > MAX_ITERATIONS {
            eyre::bail!("conversation.max_iterations must be <= {}", MAX_ITERATIONS);
        }
        if self.conversation.event_buffer == 0 {
            eyre::bail!("conversation.event_buffer must be > 0");
        }
        if self.server.rate_limit.max_requests == 0 {
            eyre::bail!("server.rate_limit.max_requests must be > 0");
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.conversation.max_iterations, 10);
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert_eq!(config.server.rate_limit.max_requests, 20);
        assert_eq!(config.server.rate_limit.window_secs, 60);
        assert_eq!(config.providers.openai.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.providers.tunnel.api_key_env, "LYNKR_API_KEY");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
conversation:
  max_iterations: 4
  theme_contexts:
    opus: " Be brief."
access:
  visitor_tools: [current_time, search_portfolio]
  tokens:
    - token: secret-owner-token
      user_id: owner-1
      level: owner
server:
  bind: "0.0.0.0:8080"
"#
        )
        .unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.conversation.max_iterations, 4);
        assert_eq!(config.conversation.event_buffer, 64);
        assert_eq!(config.conversation.theme_contexts["opus"], " Be brief.");
        assert_eq!(config.access.visitor_tools.len(), 2);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.server.rate_limit.max_requests, 20);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "conversation:\n  max_iterations: 0").unwrap();
        assert!(Config::load(Some(&file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_iteration_ceiling_cannot_be_raised() {
        let mut config = Config::default();
        config.conversation.max_iterations = MAX_ITERATIONS;
        assert!(config.validate().is_ok());

        config.conversation.max_iterations = 25;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let path = PathBuf::from("/nonexistent/chatloop.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_caller_for_token() {
        let access = AccessConfig {
            tokens: vec![ApiToken {
                token: "abc".to_string(),
                user_id: "u1".to_string(),
                level: AccessLevel::Collaborator,
            }],
            ..Default::default()
        };

        let caller = access.caller_for_token(Some("abc"));
        assert_eq!(caller.user_id.as_deref(), Some("u1"));
        assert_eq!(caller.access_level, AccessLevel::Collaborator);

        assert_eq!(access.caller_for_token(Some("nope")), Caller::anonymous());
        assert_eq!(access.caller_for_token(Some("")), Caller::anonymous());
        assert_eq!(access.caller_for_token(None), Caller::anonymous());
    }

    #[test]
    fn test_first_matching_token_wins() {
        let entry = |user_id: &str, level| ApiToken {
            token: "shared".to_string(),
            user_id: user_id.to_string(),
            level,
        };
        let access = AccessConfig {
            tokens: vec![entry("first", AccessLevel::Owner), entry("second", AccessLevel::Visitor)],
            ..Default::default()
        };

        let caller = access.caller_for_token(Some("shared"));
        assert_eq!(caller.user_id.as_deref(), Some("first"));
        assert_eq!(caller.access_level, AccessLevel::Owner);
    }

    #[test]
    fn test_anthropic_config_resolves_alias() {
        let providers = ProvidersConfig {
            timeout_ms: 1_000,
            ..Default::default()
        };
        let config = providers.anthropic_config("opus");
        assert_eq!(config.model, "claude-3-opus-20240229");
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_tunnel_needs_url_and_key() {
        let providers = ProvidersConfig {
            tunnel: TunnelSection {
                url: Some("https://tunnel.example.com".to_string()),
                api_key_env: "CHATLOOP_TEST_UNSET_TUNNEL_KEY".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(providers.tunnel_config().is_none());
    }
}
