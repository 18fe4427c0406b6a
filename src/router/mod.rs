//! Model selection and provider call construction.

pub mod registry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

pub use registry::{ModelDefinition, ModelRegistry};

use crate::config::{DEFAULT_REFERENCE_IMAGE_PARAM, ProviderCredentials, RouterSettings};
use crate::error::{ConfigError, RouterError};
use crate::types::{GenerationType, Priority, ProviderId};

const UNKNOWN_MODEL_TIME_SECS: u32 = 30;

/// A routing decision ready to hand to a provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderId,
    pub model: String,
    pub endpoint: String,
    /// Template containing `{request_id}` for providers that poll.
    pub status_endpoint: Option<String>,
    /// Credentials are re-attached by the router and never persisted.
    #[serde(skip)]
    pub headers: BTreeMap<String, String>,
    pub parameters: Map<String, Value>,
    /// Set when no model matched the requested resolution exactly.
    #[serde(default)]
    pub resolution_relaxed: bool,
}

impl ModelConfig {
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }

    pub fn status_url(&self, request_id: &str) -> Option<String> {
        self.status_endpoint
            .as_ref()
            .map(|template| template.replace("{request_id}", request_id))
    }
}

#[derive(Debug)]
pub struct ModelRouter {
    registry: ModelRegistry,
    settings: RouterSettings,
}

impl ModelRouter {
    /// Builds a router, refusing to start if any registered provider is unusable.
    pub fn new(registry: ModelRegistry, settings: RouterSettings) -> Result<Self, ConfigError> {
        for model in registry.iter() {
            for kind in &model.kinds {
                if !model.provider.supports(*kind) {
                    return Err(ConfigError::UnservableModel {
                        model: model.id.clone(),
                        kind: *kind,
                        provider: model.provider,
                    });
                }
            }
            if model.provider == ProviderId::Higgsfield
                && !model.parameters.contains_key("application")
                && settings.higgsfield_application.is_none()
            {
                return Err(ConfigError::Missing {
                    setting: "HIGGSFIELD_VIDEO_APP",
                });
            }
        }
        for provider in registry.providers() {
            if settings.credentials.get(provider).is_none() {
                return Err(ConfigError::MissingCredential {
                    provider,
                    setting: ProviderCredentials::setting(provider),
                });
            }
        }
        debug!(models = registry.iter().count(), "model router initialized");
        Ok(Self { registry, settings })
    }

    pub fn route(
        &self,
        kind: GenerationType,
        resolution: Option<&str>,
        priority: Option<Priority>,
        model_id: Option<&str>,
    ) -> Result<ModelConfig, RouterError> {
        let (model, resolution_relaxed) = self.select_model(kind, resolution, priority, model_id)?;
        let (endpoint, status_endpoint) = self.build_endpoint(model.provider, kind)?;
        let headers = self.build_headers(model.provider)?;
        let parameters = self.build_parameters(model, resolution);

        debug!(
            model = %model.id,
            provider = %model.provider,
            kind = %kind,
            resolution_relaxed,
            "routed generation request"
        );

        Ok(ModelConfig {
            provider: model.provider,
            model: model.id.clone(),
            endpoint,
            status_endpoint,
            headers,
            parameters,
            resolution_relaxed,
        })
    }

    /// Re-attaches credentials to a config that came back from the job queue.
    pub fn authorize(&self, config: &mut ModelConfig) -> Result<(), RouterError> {
        config.headers = self.build_headers(config.provider)?;
        Ok(())
    }

    pub fn model_info(&self, model_id: &str) -> Option<&ModelDefinition> {
        self.registry.get(model_id)
    }

    pub fn list_models(&self, kind: Option<GenerationType>) -> Vec<&ModelDefinition> {
        match kind {
            Some(kind) => self.registry.supporting(kind),
            None => self.registry.iter().collect(),
        }
    }

    pub fn estimate_cost(&self, model_id: &str) -> f64 {
        self.registry
            .get(model_id)
            .map(|model| model.cost_per_generation)
            .unwrap_or(0.0)
    }

    pub fn estimate_time(&self, model_id: &str) -> u32 {
        self.registry
            .get(model_id)
            .map(|model| model.average_time_secs)
            .unwrap_or(UNKNOWN_MODEL_TIME_SECS)
    }

    fn select_model(
        &self,
        kind: GenerationType,
        resolution: Option<&str>,
        priority: Option<Priority>,
        model_id: Option<&str>,
    ) -> Result<(&ModelDefinition, bool), RouterError> {
        if let Some(model_id) = model_id {
            let model = self
                .registry
                .get(model_id)
                .ok_or_else(|| RouterError::ModelNotFound(model_id.to_string()))?;
            if !model.supports(kind) {
                return Err(RouterError::UnsupportedOperation {
                    provider: model.provider,
                    kind,
                });
            }
            return Ok((model, false));
        }

        let candidates = self.registry.supporting(kind);
        if candidates.is_empty() {
            return Err(RouterError::NoModelAvailable(kind));
        }

        let mut relaxed = false;
        let mut matches: Vec<&ModelDefinition> = match resolution {
            Some(resolution) => candidates
                .iter()
                .copied()
                .filter(|model| model.supports_resolution(resolution))
                .collect(),
            None => candidates.clone(),
        };
        if matches.is_empty() {
            warn!(
                kind = %kind,
                resolution = resolution.unwrap_or_default(),
                "no model matches requested resolution, falling back to any {kind} model"
            );
            relaxed = true;
            matches = candidates;
        }

        // `sort_by` is stable, so equal keys keep registry order.
        match priority.unwrap_or_default() {
            Priority::Speed => matches.sort_by_key(|model| model.average_time_secs),
            Priority::Cost => matches.sort_by(|a, b| a.cost_per_generation.total_cmp(&b.cost_per_generation)),
            Priority::Quality => matches.sort_by(|a, b| b.inference_steps().cmp(&a.inference_steps())),
        }

        Ok((matches[0], relaxed))
    }

    fn build_endpoint(
        &self,
        provider: ProviderId,
        kind: GenerationType,
    ) -> Result<(String, Option<String>), RouterError> {
        let base = self.settings.endpoints.base_url(provider);
        let endpoints = match (provider, kind) {
            (ProviderId::ModelsLabs, GenerationType::Image) => {
                (format!("{base}/api/v7/images/text-to-image"), None)
            }
            // Realtime img2img lives on the v6 API.
            (ProviderId::ModelsLabs, GenerationType::Edit) => {
                (format!("{base}/api/v6/realtime/img2img"), None)
            }
            (ProviderId::Xai, GenerationType::Image | GenerationType::Edit) => {
                (format!("{base}/images/generations"), None)
            }
            (ProviderId::Xai, GenerationType::Video) => (
                format!("{base}/videos/generations"),
                Some(format!("{base}/videos/{{request_id}}")),
            ),
            (ProviderId::Higgsfield, GenerationType::Video) => (
                base.to_string(),
                Some(format!("{base}/requests/{{request_id}}/status")),
            ),
            (provider, kind) => return Err(RouterError::UnsupportedOperation { provider, kind }),
        };
        Ok(endpoints)
    }

    fn build_headers(&self, provider: ProviderId) -> Result<BTreeMap<String, String>, RouterError> {
        let api_key = self.settings.credentials.get(provider).ok_or(ConfigError::MissingCredential {
            provider,
            setting: ProviderCredentials::setting(provider),
        })?;
        let authorization = match provider {
            ProviderId::Higgsfield => format!("Key {api_key}"),
            ProviderId::ModelsLabs | ProviderId::Xai => format!("Bearer {api_key}"),
        };
        Ok(BTreeMap::from([
            ("Authorization".to_string(), authorization),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]))
    }

    fn build_parameters(&self, model: &ModelDefinition, resolution: Option<&str>) -> Map<String, Value> {
        let mut params = model.parameters.clone();

        if let Some(resolution) = resolution {
            match parse_dimensions(resolution) {
                Some((width, height)) => {
                    params.insert("width".to_string(), json!(width));
                    params.insert("height".to_string(), json!(height));
                }
                None => {
                    params.insert("aspect_ratio".to_string(), json!(resolution));
                }
            }
        }

        if model.provider == ProviderId::Higgsfield {
            if let Some(application) = &self.settings.higgsfield_application {
                params
                    .entry("application".to_string())
                    .or_insert_with(|| json!(application));
            }
            let reference_param = self
                .settings
                .higgsfield_reference_param
                .as_deref()
                .unwrap_or(DEFAULT_REFERENCE_IMAGE_PARAM);
            params
                .entry("reference_image_param".to_string())
                .or_insert_with(|| json!(reference_param));
        }

        params
    }
}

/// Parses a `WxH` resolution token.
pub fn parse_dimensions(resolution: &str) -> Option<(u32, u32)> {
    let (width, height) = resolution.trim().split_once(['x', 'X'])?;
    Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderEndpoints;

    fn settings() -> RouterSettings {
        RouterSettings {
            credentials: ProviderCredentials {
                modelslabs: Some("ml-key".into()),
                xai: Some("xai-key".into()),
                higgsfield: Some("hf-id:hf-secret".into()),
            },
            endpoints: ProviderEndpoints::default(),
            higgsfield_application: Some("soul/video".into()),
            higgsfield_reference_param: None,
        }
    }

    fn router() -> ModelRouter {
        ModelRouter::new(ModelRegistry::builtin(), settings()).unwrap()
    }

    fn model(id: &str, kinds: Vec<GenerationType>, cost: f64, time: u32, steps: Option<u64>) -> ModelDefinition {
        let mut parameters = Map::new();
        if let Some(steps) = steps {
            parameters.insert("num_inference_steps".into(), json!(steps));
        }
        ModelDefinition {
            id: id.to_string(),
            name: id.to_string(),
            provider: ProviderId::Xai,
            kinds,
            resolutions: vec!["1:1".into()],
            max_prompt_length: 500,
            cost_per_generation: cost,
            average_time_secs: time,
            supports_negative_prompt: false,
            requires_reference_images: false,
            parameters,
        }
    }

    #[test]
    fn explicit_model_id_is_looked_up_directly() {
        let config = router()
            .route(GenerationType::Edit, None, None, Some("grok-imagine-image"))
            .unwrap();
        assert_eq!(config.model, "grok-imagine-image");
        assert_eq!(config.provider, ProviderId::Xai);
        assert_eq!(config.endpoint, "https://api.x.ai/v1/images/generations");
    }

    #[test]
    fn explicit_model_must_support_the_requested_type() {
        let err = router()
            .route(GenerationType::Edit, None, None, Some("grok-imagine-video"))
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::UnsupportedOperation {
                provider: ProviderId::Xai,
                kind: GenerationType::Edit
            }
        ));
    }

    #[test]
    fn unknown_model_id_fails() {
        let err = router()
            .route(GenerationType::Image, None, None, Some("dall-e-9"))
            .unwrap_err();
        assert!(matches!(err, RouterError::ModelNotFound(id) if id == "dall-e-9"));
    }

    #[test]
    fn type_without_models_fails_with_no_model_available() {
        let registry = ModelRegistry::new(vec![model("img", vec![GenerationType::Image], 0.1, 5, None)]);
        let router = ModelRouter::new(registry, settings()).unwrap();
        let err = router.route(GenerationType::Video, None, None, None).unwrap_err();
        assert!(matches!(err, RouterError::NoModelAvailable(GenerationType::Video)));
    }

    #[test]
    fn default_image_route_prefers_most_inference_steps() {
        let config = router().route(GenerationType::Image, Some("1:1"), None, None).unwrap();
        assert_eq!(config.model, "nano-banana-pro");
        assert_eq!(config.endpoint, "https://modelslab.com/api/v7/images/text-to-image");
        assert_eq!(config.bearer_token(), Some("ml-key"));
        assert_eq!(config.param_str("aspect_ratio"), Some("1:1"));
        assert!(!config.resolution_relaxed);
    }

    #[test]
    fn priority_sorts_are_stable_and_deterministic() {
        let registry = ModelRegistry::new(vec![
            model("slow-cheap", vec![GenerationType::Image], 0.01, 30, Some(20)),
            model("fast-pricey", vec![GenerationType::Image], 0.05, 5, Some(20)),
            model("fast-cheap", vec![GenerationType::Image], 0.01, 5, Some(40)),
        ]);
        let router = ModelRouter::new(registry, settings()).unwrap();
        let pick = |priority| {
            router
                .route(GenerationType::Image, None, Some(priority), None)
                .unwrap()
                .model
        };
        assert_eq!(pick(Priority::Speed), "fast-pricey");
        assert_eq!(pick(Priority::Cost), "slow-cheap");
        assert_eq!(pick(Priority::Quality), "fast-cheap");
        for _ in 0..10 {
            assert_eq!(pick(Priority::Speed), "fast-pricey");
        }
    }

    #[test]
    fn unmatched_resolution_relaxes_to_type_candidates() {
        let config = router()
            .route(GenerationType::Image, Some("1024x576"), None, None)
            .unwrap();
        assert_eq!(config.model, "nano-banana-pro");
        assert!(config.resolution_relaxed);
        assert_eq!(config.param_u64("width"), Some(1024));
        assert_eq!(config.param_u64("height"), Some(576));
        assert!(config.param_str("aspect_ratio").is_none());
    }

    #[test]
    fn unmapped_provider_type_pair_is_unsupported() {
        let mut bad = model("ml-video", vec![GenerationType::Image], 0.01, 5, None);
        bad.provider = ProviderId::ModelsLabs;
        let router = ModelRouter::new(ModelRegistry::new(vec![bad]), settings()).unwrap();
        let err = router
            .route(GenerationType::Video, None, None, Some("ml-video"))
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::UnsupportedOperation {
                provider: ProviderId::ModelsLabs,
                kind: GenerationType::Video
            }
        ));
    }

    #[test]
    fn missing_credential_is_rejected_at_construction() {
        let mut settings = settings();
        settings.credentials.xai = None;
        let err = ModelRouter::new(ModelRegistry::builtin(), settings).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential {
                provider: ProviderId::Xai,
                setting: "XAI_API_KEY"
            }
        ));
    }

    #[test]
    fn higgsfield_requires_an_application() {
        let mut settings = settings();
        settings.higgsfield_application = None;
        let err = ModelRouter::new(ModelRegistry::builtin(), settings).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { setting: "HIGGSFIELD_VIDEO_APP" }));
    }

    #[test]
    fn higgsfield_config_carries_application_and_key_auth() {
        let config = router()
            .route(GenerationType::Video, Some("16:9"), None, Some("higgsfield-soul-video"))
            .unwrap();
        assert_eq!(config.param_str("application"), Some("soul/video"));
        assert_eq!(config.param_str("reference_image_param"), Some("reference_image_urls"));
        assert_eq!(
            config.headers.get("Authorization").map(String::as_str),
            Some("Key hf-id:hf-secret")
        );
        assert_eq!(
            config.status_url("abc").as_deref(),
            Some("https://platform.higgsfield.ai/requests/abc/status")
        );
    }

    #[test]
    fn default_video_route_keeps_registry_order_on_ties() {
        let config = router().route(GenerationType::Video, None, None, None).unwrap();
        assert_eq!(config.model, "grok-imagine-video");
        assert_eq!(
            config.status_url("r-1").as_deref(),
            Some("https://api.x.ai/v1/videos/r-1")
        );
    }

    #[test]
    fn estimates_fall_back_for_unknown_models() {
        let router = router();
        assert_eq!(router.estimate_cost("nano-banana-pro"), 0.002);
        assert_eq!(router.estimate_time("grok-imagine-video"), 60);
        assert_eq!(router.estimate_cost("missing"), 0.0);
        assert_eq!(router.estimate_time("missing"), 30);
    }

    #[test]
    fn queued_configs_do_not_serialize_credentials() {
        let config = router().route(GenerationType::Image, None, None, None).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("ml-key"));

        let mut restored: ModelConfig = serde_json::from_str(&json).unwrap();
        assert!(restored.headers.is_empty());
        router().authorize(&mut restored).unwrap();
        assert_eq!(restored.bearer_token(), Some("ml-key"));
    }
}
