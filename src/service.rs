//! Chat service - turns an inbound request into a running conversation loop.
//!
//! Everything that has to be decided before the first byte streams happens
//! here: request validation, provider selection, the system prompt, memory
//! lookup and the tool list for the caller. Errors from this stage are plain
//! request errors; once the loop is spawned every failure travels as an event.

use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::access::{AccessPolicy, Caller, TieredPolicy};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::events::{EventEmitter, EventStream, NormalizedEvent, create_event_channel};
use crate::llm::providers::{
    AnthropicAdapter, OpenAiAdapter, ProviderAdapter, ProviderAvailability, ProviderChoice, TunnelAdapter,
    TunnelHealth, TunnelStatus, select_provider,
};
use crate::llm::types::ChatRequest;
use crate::prompt::{PromptContext, SystemPromptBuilder};
use crate::recorder::{JsonlInteractionLog, MemoryContext, RecorderHandle};
use crate::runner::{ConversationLoop, LoopTurn};
use crate::tools::ToolRegistry;

/// Cloud provider credentials
#[derive(Clone, Default)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
}

impl ProviderKeys {
    /// Read keys from the environment variables named in the config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            openai: config.providers.openai.api_key(),
            anthropic: config.providers.anthropic.api_key(),
        }
    }
}

impl std::fmt::Debug for ProviderKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderKeys")
            .field("openai", &self.openai.as_ref().map(|_| "[REDACTED]"))
            .field("anthropic", &self.anthropic.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

enum TunnelSlot {
    NotConfigured,
    Rejected(String),
    Ready(Arc<TunnelAdapter>),
}

/// Provider selection report for one caller
#[derive(Debug)]
pub struct SelectionReport {
    pub availability: ProviderAvailability,
    pub health: Option<TunnelHealth>,
    pub choice: Result<ProviderChoice>,
}

pub struct ChatService {
    config: Config,
    keys: ProviderKeys,
    tools: Arc<ToolRegistry>,
    policy: Arc<TieredPolicy>,
    prompt: SystemPromptBuilder,
    tunnel: TunnelSlot,
    recorder: Option<RecorderHandle>,
    memory: Option<Arc<dyn MemoryContext>>,
}

impl ChatService {
    /// Service with the standard tools and no recording.
    pub fn new(config: Config, keys: ProviderKeys) -> Self {
        let tunnel = match config.providers.tunnel_config() {
            None => TunnelSlot::NotConfigured,
            Some(tunnel_config) => match TunnelAdapter::new(tunnel_config).and_then(|t| t.validate().map(|_| t)) {
                Ok(adapter) => TunnelSlot::Ready(Arc::new(adapter)),
                Err(e) => {
                    warn!("Tunnel disabled: {}", e);
                    TunnelSlot::Rejected(e.to_string())
                }
            },
        };

        Self {
            policy: Arc::new(config.access.policy()),
            prompt: config.conversation.prompt_builder(),
            tools: Arc::new(ToolRegistry::standard()),
            tunnel,
            recorder: None,
            memory: None,
            keys,
            config,
        }
    }

    /// Service wired from config: environment keys and the JSONL interaction
    /// log as both recorder and memory. Must run inside a tokio runtime.
    pub fn from_config(config: Config) -> Result<Self> {
        let keys = ProviderKeys::from_config(&config);
        let log = Arc::new(JsonlInteractionLog::new(&config.storage.data_dir)?);
        info!("Recording interactions to {}", log.path().display());

        Ok(Self::new(config, keys)
            .with_recorder(RecorderHandle::spawn(log.clone()))
            .with_memory(log))
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_recorder(mut self, recorder: RecorderHandle) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryContext>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Probe the tunnel if one is configured and passed validation.
    pub async fn probe_tunnel(&self) -> Option<TunnelHealth> {
        match &self.tunnel {
            TunnelSlot::Ready(adapter) => Some(adapter.check_health().await),
            _ => None,
        }
    }

    /// Provider availability for a caller. Only owners can use the tunnel, so
    /// only owners pay for the health probe.
    pub async fn availability(&self, caller: &Caller) -> (ProviderAvailability, Option<TunnelHealth>) {
        let (tunnel, health) = match &self.tunnel {
            TunnelSlot::NotConfigured => (TunnelStatus::NotConfigured, None),
            TunnelSlot::Rejected(reason) => (TunnelStatus::Rejected(reason.clone()), None),
            TunnelSlot::Ready(_) if !caller.is_owner() => (TunnelStatus::NotConfigured, None),
            TunnelSlot::Ready(adapter) => {
                let health = adapter.check_health().await;
                let status = if health.connected {
                    debug!("Tunnel reachable in {}ms", health.latency_ms);
                    TunnelStatus::Reachable
                } else {
                    let reason = health.error.clone().unwrap_or_else(|| "unreachable".to_string());
                    warn!("Tunnel unreachable: {}", reason);
                    TunnelStatus::Unreachable(reason)
                };
                (status, Some(health))
            }
        };

        let availability = ProviderAvailability {
            tunnel,
            anthropic_key: self.keys.anthropic.is_some(),
            openai_key: self.keys.openai.is_some(),
        };
        (availability, health)
    }

    /// Which provider a caller would get for `model`.
    pub async fn select(&self, model: &str, caller: &Caller) -> SelectionReport {
        let (availability, health) = self.availability(caller).await;
        let choice = select_provider(
            model,
            caller.access_level,
            &availability,
            &self.config.conversation.messages_aliases,
        );
        SelectionReport {
            availability,
            health,
            choice,
        }
    }

    fn build_provider(&self, choice: ProviderChoice, model: &str) -> Result<Arc<dyn ProviderAdapter>> {
        let missing = || ChatError::Config("No API key configured".to_string());
        Ok(match choice {
            ProviderChoice::Tunnel => match &self.tunnel {
                TunnelSlot::Ready(adapter) => adapter.clone() as Arc<dyn ProviderAdapter>,
                _ => return Err(ChatError::Config("Tunnel is not available".to_string())),
            },
            ProviderChoice::Anthropic => {
                let key = self.keys.anthropic.clone().ok_or_else(missing)?;
                Arc::new(AnthropicAdapter::new(key, self.config.providers.anthropic_config(model))?)
            }
            ProviderChoice::OpenAi => {
                let key = self.keys.openai.clone().ok_or_else(missing)?;
                Arc::new(OpenAiAdapter::new(key, self.config.providers.openai_config())?)
            }
        })
    }

    async fn memory_for(&self, caller: &Caller, query: &str) -> Option<String> {
        let memory = self.memory.as_ref()?;
        let user_id = caller.user_id.as_deref()?;
        if !caller.is_owner() {
            return None;
        }

        match memory
            .load_context(user_id, query, self.config.conversation.memory_limit)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!("Failed to load memory context for {}: {}", user_id, e);
                None
            }
        }
    }

    /// Validate and start one turn. The loop runs on its own task; the
    /// returned stream yields its events and ends after `done`.
    pub async fn start_turn(&self, request: ChatRequest, caller: Caller) -> Result<EventStream> {
        if request.messages.is_empty() {
            return Err(ChatError::InvalidRequest("Messages array is required".to_string()));
        }

        let selection = self.select(&request.model, &caller).await;
        let choice = selection.choice?;
        let provider = self.build_provider(choice, &request.model)?;
        info!(
            "Turn for {} caller routed to {} ({})",
            caller.access_level,
            provider.name(),
            provider.model()
        );

        let user_message = request.last_user_message().to_string();
        let memory = self.memory_for(&caller, &user_message).await;
        let system_prompt = self.prompt.build(&PromptContext {
            model: &request.model,
            theme_context: request.theme_context.as_deref(),
            memory_context: memory.as_deref(),
        });

        let tools = if request.enable_tools {
            self.policy.tools_for_level(&self.tools.definitions(), caller.access_level)
        } else {
            Vec::new()
        };

        let mut controller = ConversationLoop::new(provider, self.tools.clone(), self.policy.clone())
            .with_max_iterations(self.config.conversation.max_iterations);
        if let Some(recorder) = &self.recorder {
            controller = controller.with_recorder(recorder.clone());
        }

        let turn = LoopTurn {
            system_prompt,
            messages: request.conversation(),
            tools,
            caller,
            user_message,
        };

        let (emitter, stream) = create_event_channel(self.config.conversation.event_buffer);
        spawn_turn(emitter, move |emitter| async move {
            let report = controller.run(turn, &emitter).await;
            debug!("Turn report: {:?}", report);
        });

        Ok(stream)
    }
}

/// Run a turn on its own task. If that task dies before finishing, the
/// caller still receives an error and `done`.
fn spawn_turn<F, Fut>(emitter: EventEmitter, run: F)
where
    F: FnOnce(EventEmitter) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let fallback = emitter.clone();
    let handle = tokio::spawn(run(emitter));
    tokio::spawn(async move {
        if let Err(e) = handle.await {
            warn!("Turn task failed: {}", e);
            fallback.emit(NormalizedEvent::Error("Internal error".to_string())).await;
            fallback.emit(NormalizedEvent::Done).await;
        }
    });
}
