//! Provider adapters and the capability-checked dispatch layer.
//!
//! Adapters never return `Err`: every failure, including transport errors and
//! timeouts, is folded into a [`GenerationResult`] so the orchestrator can
//! decide on fallbacks from the [`FailureKind`].

pub mod higgsfield;
pub mod http;
pub mod modelslabs;
pub mod xai;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

pub use higgsfield::HiggsfieldAdapter;
pub use modelslabs::ModelsLabsAdapter;
pub use xai::XaiAdapter;

use crate::prompt::EnhancedPrompt;
use crate::request::VideoOptions;
use crate::router::ModelConfig;
use crate::types::{GenerationType, ProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    PermissionDenied,
    Moderation,
    Expired,
    Unsupported,
    Rejected,
    InvalidResponse,
    Network,
    Configuration,
    Validation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(provider: ProviderId, capability: Capability) -> Self {
        Self::new(
            FailureKind::Unsupported,
            format!("{} does not support {capability}", provider.display_name()),
        )
    }

    pub fn missing_credential(provider: ProviderId) -> Self {
        Self::new(
            FailureKind::Configuration,
            format!("API key not configured for provider {provider}"),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed { url: String },
    Failed(ProviderFailure),
}

/// Normalized adapter output: exactly one of a URL or a failure, plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub outcome: GenerationOutcome,
    pub metadata: Map<String, Value>,
}

impl GenerationResult {
    pub fn completed(url: impl Into<String>) -> Self {
        Self {
            outcome: GenerationOutcome::Completed { url: url.into() },
            metadata: Map::new(),
        }
    }

    pub fn failed(failure: ProviderFailure) -> Self {
        Self {
            outcome: GenerationOutcome::Failed(failure),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_entry(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, GenerationOutcome::Completed { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match &self.outcome {
            GenerationOutcome::Completed { url } => Some(url),
            GenerationOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ProviderFailure> {
        match &self.outcome {
            GenerationOutcome::Completed { .. } => None,
            GenerationOutcome::Failed(failure) => Some(failure),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|failure| failure.kind)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.failure().map(|failure| failure.message.as_str())
    }
}

impl From<Result<GenerationResult, ProviderFailure>> for GenerationResult {
    fn from(result: Result<GenerationResult, ProviderFailure>) -> Self {
        result.unwrap_or_else(GenerationResult::failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Generate,
    Edit,
    GenerateVideo,
}

impl Capability {
    pub fn for_kind(kind: GenerationType) -> Self {
        match kind {
            GenerationType::Image => Capability::Generate,
            GenerationType::Edit => Capability::Edit,
            GenerationType::Video => Capability::GenerateVideo,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Generate => f.write_str("image generation"),
            Capability::Edit => f.write_str("image editing"),
            Capability::GenerateVideo => f.write_str("video generation"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub negative_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditInput {
    pub image_url: String,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInput {
    pub image_url: Option<String>,
    pub reference_images: Vec<String>,
    pub options: VideoOptions,
}

/// The adapter operation a routed request resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ProviderCall {
    Generate(GenerateOptions),
    Edit(EditInput),
    Video(VideoInput),
}

impl ProviderCall {
    pub fn capability(&self) -> Capability {
        match self {
            ProviderCall::Generate(_) => Capability::Generate,
            ProviderCall::Edit(_) => Capability::Edit,
            ProviderCall::Video(_) => Capability::GenerateVideo,
        }
    }
}

/// Fixed-interval polling budget for asynchronous provider jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollSettings {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    fn supports(&self, capability: Capability) -> bool {
        self.id()
            .supported_types()
            .iter()
            .any(|kind| Capability::for_kind(*kind) == capability)
    }

    async fn generate(
        &self,
        _config: &ModelConfig,
        _prompt: &EnhancedPrompt,
        _options: &GenerateOptions,
    ) -> GenerationResult {
        GenerationResult::failed(ProviderFailure::unsupported(self.id(), Capability::Generate))
    }

    async fn edit(&self, _config: &ModelConfig, _prompt: &EnhancedPrompt, _input: &EditInput) -> GenerationResult {
        GenerationResult::failed(ProviderFailure::unsupported(self.id(), Capability::Edit))
    }

    async fn generate_video(
        &self,
        _config: &ModelConfig,
        _prompt: &EnhancedPrompt,
        _input: &VideoInput,
    ) -> GenerationResult {
        GenerationResult::failed(ProviderFailure::unsupported(self.id(), Capability::GenerateVideo))
    }
}

#[derive(Clone, Default)]
pub struct ProviderSet {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet")
            .field("providers", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderSet {
    pub fn builtin(client: Client) -> Self {
        Self::default()
            .with_adapter(Arc::new(ModelsLabsAdapter::new(client.clone())))
            .with_adapter(Arc::new(XaiAdapter::new(client.clone())))
            .with_adapter(Arc::new(HiggsfieldAdapter::new(client)))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.id(), adapter);
        self
    }

    pub fn get(&self, provider: ProviderId) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider)
    }

    /// Invokes the adapter for `config.provider`, short-circuiting unsupported operations.
    pub async fn dispatch(&self, config: &ModelConfig, prompt: &EnhancedPrompt, call: &ProviderCall) -> GenerationResult {
        let capability = call.capability();
        let Some(adapter) = self.get(config.provider) else {
            warn!(provider = %config.provider, "no adapter registered");
            return GenerationResult::failed(ProviderFailure::new(
                FailureKind::Configuration,
                format!("No adapter registered for provider {}", config.provider),
            ));
        };
        if !adapter.supports(capability) {
            return GenerationResult::failed(ProviderFailure::unsupported(config.provider, capability));
        }

        let result = match call {
            ProviderCall::Generate(options) => adapter.generate(config, prompt, options).await,
            ProviderCall::Edit(input) => adapter.edit(config, prompt, input).await,
            ProviderCall::Video(input) => adapter.generate_video(config, prompt, input).await,
        };
        result.with_entry("provider", config.provider.as_str())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use super::*;
    use crate::prompt::PromptEncoder;

    pub fn config(provider: ProviderId, model: &str, endpoint: &str, status_endpoint: Option<&str>) -> ModelConfig {
        let authorization = match provider {
            ProviderId::Higgsfield => "Key test-key".to_string(),
            _ => "Bearer test-key".to_string(),
        };
        ModelConfig {
            provider,
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            status_endpoint: status_endpoint.map(str::to_string),
            headers: BTreeMap::from([("Authorization".to_string(), authorization)]),
            parameters: Map::new(),
            resolution_relaxed: false,
        }
    }

    pub fn prompt(kind: GenerationType, raw: &str) -> EnhancedPrompt {
        PromptEncoder::new(kind).encode(raw)
    }
}
