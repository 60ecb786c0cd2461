//! Provider selection
//!
//! A pure decision over what the caller asked for and what the server has
//! available. The tunnel health probe runs before this and is passed in as a
//! [`TunnelStatus`], so the decision itself never touches the network.

use serde::Serialize;

use crate::access::AccessLevel;
use crate::error::{ChatError, Result};

/// Which adapter carries the turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderChoice {
    Tunnel,
    Anthropic,
    OpenAi,
}

/// What is known about the tunnel at selection time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum TunnelStatus {
    NotConfigured,
    /// Credential or URL failed validation
    Rejected(String),
    Unreachable(String),
    Reachable,
}

/// Server-side availability of each provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderAvailability {
    pub tunnel: TunnelStatus,
    pub anthropic_key: bool,
    pub openai_key: bool,
}

/// Whether the requested model identifier asks for the messages family.
pub fn wants_messages_family(model: &str, aliases: &[String]) -> bool {
    aliases.iter().any(|alias| alias == model) || model.starts_with("claude-")
}

/// Pick the provider for one turn.
///
/// Precedence: a reachable tunnel (owners only), then the messages family
/// when its model was requested and its key is present, then the
/// chat-completions family when its key is present.
pub fn select_provider(
    model: &str,
    level: AccessLevel,
    availability: &ProviderAvailability,
    messages_aliases: &[String],
) -> Result<ProviderChoice> {
    if level == AccessLevel::Owner && availability.tunnel == TunnelStatus::Reachable {
        return Ok(ProviderChoice::Tunnel);
    }

    if wants_messages_family(model, messages_aliases) && availability.anthropic_key {
        return Ok(ProviderChoice::Anthropic);
    }

    if availability.openai_key {
        return Ok(ProviderChoice::OpenAi);
    }

    Err(ChatError::Config("No API key configured".to_string()))
}
