use serde_json::{Map, Value, json};

use crate::types::{GenerationType, ProviderId};

const WIDE_ASPECTS: &[&str] = &["1:1", "9:16", "2:3", "3:4", "4:5", "5:4", "4:3", "3:2", "16:9", "21:9"];
const VIDEO_ASPECTS: &[&str] = &["1:1", "16:9", "9:16", "4:3", "3:4", "3:2", "2:3"];

#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub id: String,
    pub name: String,
    pub provider: ProviderId,
    pub kinds: Vec<GenerationType>,
    pub resolutions: Vec<String>,
    pub max_prompt_length: usize,
    pub cost_per_generation: f64,
    pub average_time_secs: u32,
    pub supports_negative_prompt: bool,
    pub requires_reference_images: bool,
    pub parameters: Map<String, Value>,
}

impl ModelDefinition {
    pub fn supports(&self, kind: GenerationType) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn supports_resolution(&self, resolution: &str) -> bool {
        self.resolutions.iter().any(|candidate| candidate == resolution)
    }

    /// Step count used as a fidelity proxy when ranking by quality.
    pub fn inference_steps(&self) -> u64 {
        self.parameters
            .get("num_inference_steps")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

/// Read-only, declaration-ordered set of models the router can pick from.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDefinition>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDefinition>) -> Self {
        Self { models }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ModelDefinition {
                id: "nano-banana-pro".to_string(),
                name: "Nano Banana Pro".to_string(),
                provider: ProviderId::ModelsLabs,
                kinds: vec![GenerationType::Image, GenerationType::Edit],
                resolutions: to_strings(WIDE_ASPECTS),
                max_prompt_length: 500,
                cost_per_generation: 0.002,
                average_time_secs: 8,
                supports_negative_prompt: true,
                requires_reference_images: false,
                parameters: object(json!({
                    "num_inference_steps": 30,
                    "guidance_scale": 7.5,
                    "scheduler": "UniPCMultistepScheduler",
                    "strength": 0.35,
                })),
            },
            ModelDefinition {
                id: "grok-imagine-video".to_string(),
                name: "Grok Imagine Video".to_string(),
                provider: ProviderId::Xai,
                kinds: vec![GenerationType::Video],
                resolutions: to_strings(VIDEO_ASPECTS),
                max_prompt_length: 500,
                cost_per_generation: 0.01,
                average_time_secs: 60,
                supports_negative_prompt: false,
                requires_reference_images: false,
                parameters: object(json!({
                    "duration": 5,
                    "resolution": "720p",
                })),
            },
            ModelDefinition {
                id: "grok-imagine-image".to_string(),
                name: "Grok Imagine Image".to_string(),
                provider: ProviderId::Xai,
                kinds: vec![GenerationType::Image, GenerationType::Edit],
                resolutions: to_strings(&["1:1", "16:9", "9:16", "4:3", "3:4", "3:2", "2:3", "2:1", "1:2"]),
                max_prompt_length: 500,
                cost_per_generation: 0.02,
                average_time_secs: 12,
                supports_negative_prompt: false,
                requires_reference_images: false,
                parameters: Map::new(),
            },
            ModelDefinition {
                id: "higgsfield-soul-video".to_string(),
                name: "Higgsfield Soul Video".to_string(),
                provider: ProviderId::Higgsfield,
                kinds: vec![GenerationType::Video],
                resolutions: to_strings(VIDEO_ASPECTS),
                max_prompt_length: 500,
                cost_per_generation: 0.05,
                average_time_secs: 90,
                supports_negative_prompt: false,
                requires_reference_images: true,
                parameters: object(json!({ "duration": 5 })),
            },
        ])
    }

    /// Drops every model served by `provider`; used when a provider is not configured.
    pub fn without_provider(mut self, provider: ProviderId) -> Self {
        self.models.retain(|model| model.provider != provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<&ModelDefinition> {
        self.models.iter().find(|model| model.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.iter()
    }

    pub fn supporting(&self, kind: GenerationType) -> Vec<&ModelDefinition> {
        self.models.iter().filter(|model| model.supports(kind)).collect()
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<ProviderId> = self.models.iter().map(|model| model.provider).collect();
        providers.sort();
        providers.dedup();
        providers
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
