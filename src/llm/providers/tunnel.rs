//! Tunnel adapter for the self-hosted proxy that fronts local models.
//!
//! The proxy accepts messages-API requests but streams whatever the backing
//! model server produces, so responses are decoded with the tunnel wire shape.
//! Because the URL and key come from configuration that may be edited by
//! hand, both are checked before the tunnel is allowed to carry traffic.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{Value, json};

use super::anthropic::{ANTHROPIC_VERSION, encode_messages};
use super::{ProviderAdapter, RoundRequest, http_client, post_stream};
use crate::error::{ChatError, Result};
use crate::llm::accumulator::WireShape;
use crate::llm::streaming::ByteStream;

const DEFAULT_MODEL: &str = "gpt-oss:20b";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Minimum accepted API key length
pub const MIN_API_KEY_LENGTH: usize = 32;

const INSECURE_KEYS: &[&str] = &["lynkr-local", "dummy", "test", "local", "dev"];

const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata.google.internal", "metadata"];

/// Configuration for the tunnel adapter
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Bound on waiting for response headers
    pub timeout: Duration,
    pub health_timeout: Duration,
    /// Disable key and URL validation (local development)
    pub skip_security: bool,
}

impl TunnelConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            skip_security: false,
        }
    }
}

/// Result of probing the tunnel's health endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelHealth {
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

pub struct TunnelAdapter {
    client: Client,
    config: TunnelConfig,
}

impl TunnelAdapter {
    pub fn new(mut config: TunnelConfig) -> Result<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            client: http_client(config.timeout)?,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Check the credential and URL unless security checks are disabled.
    pub fn validate(&self) -> Result<()> {
        if self.config.skip_security {
            debug!("Tunnel security validation skipped");
            return Ok(());
        }
        validate_api_key(&self.config.api_key)?;
        validate_url_safety(&self.config.base_url)?;
        Ok(())
    }

    /// Probe `GET <base>/health`.
    pub async fn check_health(&self) -> TunnelHealth {
        let start = Instant::now();
        let url = format!("{}/health", self.config.base_url);

        let outcome = tokio::time::timeout(self.config.health_timeout, async {
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Ok(Err(format!("HTTP {}", status)));
            }
            let body: Value = response.json().await.unwrap_or(Value::Null);
            Ok::<_, reqwest::Error>(Ok(body))
        })
        .await;

        let latency_ms = start.elapsed().as_millis() as u64;
        let field = |body: &Value, name: &str| body[name].as_str().map(str::to_string);

        match outcome {
            Ok(Ok(Ok(body))) => TunnelHealth {
                connected: true,
                latency_ms,
                error: None,
                provider: field(&body, "provider"),
                model: field(&body, "model"),
                version: field(&body, "version"),
            },
            Ok(Ok(Err(status))) => TunnelHealth {
                connected: false,
                latency_ms,
                error: Some(status),
                ..Default::default()
            },
            Ok(Err(e)) => TunnelHealth {
                connected: false,
                latency_ms,
                error: Some(e.to_string()),
                ..Default::default()
            },
            Err(_) => TunnelHealth {
                connected: false,
                latency_ms,
                error: Some("Health check timed out".to_string()),
                ..Default::default()
            },
        }
    }

    /// Build the streaming request body
    pub fn build_request(&self, request: &RoundRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": encode_messages(request.messages),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "stream": true
        });

        if !request.system_prompt.is_empty() {
            body["system"] = json!(request.system_prompt);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_anthropic_schema()).collect();
            body["tools"] = json!(tools);
        }

        body
    }
}

#[async_trait]
impl ProviderAdapter for TunnelAdapter {
    fn name(&self) -> &str {
        "tunnel"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn shape(&self) -> WireShape {
        WireShape::Tunnel
    }

    async fn open_stream(&self, request: &RoundRequest<'_>) -> Result<ByteStream> {
        let body = self.build_request(request);
        let url = format!("{}/v1/messages", self.config.base_url);

        let builder = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        post_stream(builder, self.name(), self.config.timeout).await
    }
}

impl std::fmt::Debug for TunnelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelAdapter")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

/// Reject short keys and well-known placeholder values.
pub fn validate_api_key(api_key: &str) -> Result<()> {
    if api_key.len() < MIN_API_KEY_LENGTH {
        return Err(ChatError::Security(format!(
            "Tunnel API key must be at least {} characters",
            MIN_API_KEY_LENGTH
        )));
    }

    if INSECURE_KEYS.contains(&api_key.to_lowercase().as_str()) {
        return Err(ChatError::Security(
            "Tunnel API key cannot be a default/test value".to_string(),
        ));
    }

    Ok(())
}

/// Reject URLs that point at internal infrastructure.
pub fn validate_url_safety(raw_url: &str) -> Result<Url> {
    let parsed = Url::parse(raw_url).map_err(|e| ChatError::Security(format!("Invalid URL {}: {}", raw_url, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ChatError::Security(format!("URL scheme {} not allowed", other)));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ChatError::Security(format!("No host in URL {}", raw_url)))?
        .to_lowercase();
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(ChatError::Security(format!("Internal address {} is not allowed", ip)));
        }
        return Ok(parsed);
    }

    if BLOCKED_HOSTS.contains(&bare_host) || bare_host.ends_with(".local") || bare_host.ends_with(".localhost") {
        return Err(ChatError::Security(format!("Host {} is not allowed", bare_host)));
    }

    Ok(parsed)
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_internal_ipv4(ip),
        IpAddr::V6(ip) => is_internal_ipv6(ip),
    }
}

fn is_internal_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 0.0.0.0/8
        || octets[0] == 0
        // 100.64.0.0/10 (carrier-grade NAT)
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
}

fn is_internal_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let segments = ip.segments();
    // fc00::/7 (unique local)
    if segments[0] & 0xfe00 == 0xfc00 {
        return true;
    }
    // fe80::/10 (link-local)
    if segments[0] & 0xffc0 == 0xfe80 {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_ipv4(&v4);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ConversationMessage;

    const GOOD_KEY: &str = "0123456789abcdef0123456789abcdef01";

    #[test]
    fn test_api_key_length() {
        assert!(validate_api_key("short").is_err());
        assert!(validate_api_key(GOOD_KEY).is_ok());
    }

    #[test]
    fn test_api_key_insecure_defaults() {
        for key in INSECURE_KEYS {
            assert!(validate_api_key(key).is_err());
        }
    }

    #[test]
    fn test_url_scheme() {
        assert!(validate_url_safety("ftp://tunnel.example.com").is_err());
        assert!(validate_url_safety("not a url").is_err());
        assert!(validate_url_safety("https://tunnel.example.com").is_ok());
    }

    #[test]
    fn test_url_blocks_internal_ipv4() {
        for url in [
            "http://127.0.0.1:8080",
            "http://10.1.2.3",
            "http://172.20.0.1",
            "http://192.168.1.10",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0",
            "http://100.64.0.1",
            "http://100.127.255.254",
        ] {
            assert!(validate_url_safety(url).is_err(), "{} should be blocked", url);
        }
        assert!(validate_url_safety("http://100.128.0.1").is_ok());
        assert!(validate_url_safety("http://8.8.8.8").is_ok());
    }

    #[test]
    fn test_url_blocks_internal_ipv6() {
        for url in ["http://[::1]", "http://[::]", "http://[fd12::1]", "http://[fe80::1]", "http://[::ffff:10.0.0.1]"] {
            assert!(validate_url_safety(url).is_err(), "{} should be blocked", url);
        }
        assert!(validate_url_safety("http://[2001:4860:4860::8888]").is_ok());
    }

    #[test]
    fn test_url_blocks_internal_hostnames() {
        for url in [
            "http://localhost:3000",
            "http://printer.local",
            "http://metadata.google.internal",
            "http://LOCALHOST",
        ] {
            assert!(validate_url_safety(url).is_err(), "{} should be blocked", url);
        }
    }

    #[test]
    fn test_validate_respects_skip_security() {
        let mut config = TunnelConfig::new("http://localhost:8081", "dev");
        let adapter = TunnelAdapter::new(config.clone()).unwrap();
        assert!(matches!(adapter.validate(), Err(ChatError::Security(_))));

        config.skip_security = true;
        let adapter = TunnelAdapter::new(config).unwrap();
        assert!(adapter.validate().is_ok());
    }

    #[test]
    fn test_build_request_defaults() {
        let adapter = TunnelAdapter::new(TunnelConfig::new("https://tunnel.example.com/", GOOD_KEY)).unwrap();
        assert_eq!(adapter.base_url(), "https://tunnel.example.com");

        let messages = vec![ConversationMessage::user("hi")];
        let body = adapter.build_request(&RoundRequest {
            system_prompt: "sys",
            messages: &messages,
            tools: &[],
        });
        assert_eq!(body["model"], "gpt-oss:20b");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["stream"], true);
    }
}
