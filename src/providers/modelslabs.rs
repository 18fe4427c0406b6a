use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::time::sleep;
use tracing::{debug, info};

use super::http::{parse_json, poll_json, post_json};
use super::{
    EditInput, FailureKind, GenerateOptions, GenerationResult, PollSettings, ProviderAdapter, ProviderFailure,
};
use crate::prompt::EnhancedPrompt;
use crate::router::ModelConfig;
use crate::types::ProviderId;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_POLL: PollSettings = PollSettings::new(Duration::from_secs(5), 24);
const ASPECT_RATIO_MODELS: &[&str] = &["nano-banana-pro"];

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ModelsLabsResponse {
    Success {
        #[serde(default)]
        output: Vec<String>,
        #[serde(default)]
        images: Vec<String>,
        image_url: Option<String>,
        generation_time: Option<f64>,
        inference_time: Option<f64>,
        seed: Option<Value>,
    },
    Processing {
        fetch_result: Option<String>,
        eta: Option<f64>,
    },
    Error {
        message: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ModelsLabsAdapter {
    client: Client,
    timeout: Duration,
    poll: PollSettings,
}

impl ModelsLabsAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: REQUEST_TIMEOUT,
            poll: DEFAULT_POLL,
        }
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    fn api_key(config: &ModelConfig) -> Result<&str, ProviderFailure> {
        config
            .bearer_token()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderFailure::missing_credential(ProviderId::ModelsLabs))
    }

    fn generate_payload(config: &ModelConfig, prompt: &EnhancedPrompt, options: &GenerateOptions, key: &str) -> Value {
        let width = config.param_u64("width").unwrap_or(1024);
        let height = config.param_u64("height").unwrap_or(1024);
        let mut payload = json!({
            "key": key,
            "prompt": prompt.enhanced,
            "model_id": config.model,
            "samples": "1",
            "safety_checker": "no",
        });

        if ASPECT_RATIO_MODELS.contains(&config.model.as_str()) {
            let aspect_ratio = config
                .param_str("aspect_ratio")
                .map(str::to_string)
                .unwrap_or_else(|| aspect_ratio_for(width, height).to_string());
            payload["aspect_ratio"] = json!(aspect_ratio);
        } else {
            payload["width"] = json!(width);
            payload["height"] = json!(height);
            payload["negative_prompt"] = json!(options.negative_prompt.as_deref().unwrap_or_default());
            payload["num_inference_steps"] = json!(config.param_u64("num_inference_steps").unwrap_or(30));
            payload["guidance_scale"] = json!(config.param_f64("guidance_scale").unwrap_or(7.5));
            payload["scheduler"] = json!(config.param_str("scheduler").unwrap_or("DPMSolverMultistep"));
            payload["enhance_prompt"] = json!("yes");
            payload["tomesd"] = json!("yes");
            payload["use_karras_sigmas"] = json!("yes");
        }
        payload
    }

    fn edit_payload(config: &ModelConfig, prompt: &EnhancedPrompt, input: &EditInput, key: &str) -> Value {
        let prompt = match input.instructions.as_deref().map(str::trim) {
            Some(instructions) if !instructions.is_empty() => {
                format!("{}. Additional instructions: {instructions}", prompt.enhanced)
            }
            _ => prompt.enhanced.clone(),
        };
        json!({
            "key": key,
            "init_image": input.image_url,
            "prompt": prompt,
            "negative_prompt": "",
            "strength": config.param_f64("strength").unwrap_or(0.75),
            "num_inference_steps": config.param_u64("num_inference_steps").unwrap_or(35),
            "guidance_scale": config.param_f64("guidance_scale").unwrap_or(8.0),
            "model_id": config.model,
            "samples": "1",
            "safety_checker": "no",
        })
    }

    async fn submit(&self, config: &ModelConfig, payload: Value) -> Result<GenerationResult, ProviderFailure> {
        let key = Self::api_key(config)?.to_string();
        let request = self.client.post(&config.endpoint).timeout(self.timeout);
        let response = post_json(ProviderId::ModelsLabs, request, &payload).await?;
        let body: ModelsLabsResponse = parse_json(ProviderId::ModelsLabs, response).await?;

        match body {
            ModelsLabsResponse::Processing { fetch_result, eta } => {
                let fetch_url = fetch_result.ok_or_else(|| {
                    ProviderFailure::new(
                        FailureKind::InvalidResponse,
                        "ModelsLabs is processing but returned no fetch_result URL",
                    )
                })?;
                info!(model = %config.model, eta, "ModelsLabs queued generation, polling");
                self.poll_result(config, &fetch_url, &key).await
            }
            other => settle(config, other)?.ok_or_else(|| {
                ProviderFailure::new(FailureKind::InvalidResponse, "ModelsLabs returned an unknown status")
            }),
        }
    }

    async fn poll_result(&self, config: &ModelConfig, fetch_url: &str, key: &str) -> Result<GenerationResult, ProviderFailure> {
        for attempt in 1..=self.poll.max_attempts {
            sleep(self.poll.interval).await;
            let request = self
                .client
                .post(fetch_url)
                .timeout(self.timeout)
                .json(&json!({ "key": key }));
            let Some(body) = poll_json::<ModelsLabsResponse>(ProviderId::ModelsLabs, request).await else {
                continue;
            };
            debug!(attempt, "ModelsLabs poll");
            if let Some(result) = settle(config, body)? {
                return Ok(result.with_entry("fetch_attempts", attempt));
            }
        }
        Err(ProviderFailure::new(
            FailureKind::Timeout,
            "Timeout waiting for ModelsLabs generation. The result may still arrive later.",
        ))
    }
}

/// Terminal interpretation of a response; `None` while still processing.
fn settle(config: &ModelConfig, body: ModelsLabsResponse) -> Result<Option<GenerationResult>, ProviderFailure> {
    match body {
        ModelsLabsResponse::Success {
            output,
            images,
            image_url,
            generation_time,
            inference_time,
            seed,
        } => {
            let url = image_url
                .or_else(|| output.into_iter().next())
                .or_else(|| images.into_iter().next())
                .ok_or_else(|| {
                    ProviderFailure::new(FailureKind::InvalidResponse, "No image URL in ModelsLabs response")
                })?;
            let mut metadata = Map::new();
            metadata.insert("model_used".into(), json!(config.model));
            if let Some(time) = inference_time.or(generation_time) {
                metadata.insert("inference_time".into(), json!(time));
            }
            if let Some(seed) = seed {
                metadata.insert("seed".into(), seed);
            }
            Ok(Some(GenerationResult::completed(url).with_metadata(metadata)))
        }
        ModelsLabsResponse::Processing { .. } => Ok(None),
        ModelsLabsResponse::Error { message } => {
            let message = match message {
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => "unknown error".to_string(),
            };
            Err(ProviderFailure::new(
                FailureKind::Rejected,
                format!("ModelsLabs API error: {message}"),
            ))
        }
        ModelsLabsResponse::Unknown => Ok(None),
    }
}

/// Nearest supported aspect token for explicit pixel dimensions.
fn aspect_ratio_for(width: u64, height: u64) -> &'static str {
    if height == 0 {
        return "1:1";
    }
    let ratio = width as f64 / height as f64;
    match ratio {
        r if (r - 1.0).abs() < f64::EPSILON => "1:1",
        r if r > 1.7 && r < 1.8 => "16:9",
        r if r > 0.55 && r < 0.6 => "9:16",
        r if r > 1.3 && r < 1.4 => "4:3",
        r if r > 0.7 && r < 0.8 => "3:4",
        _ => "1:1",
    }
}

#[async_trait]
impl ProviderAdapter for ModelsLabsAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::ModelsLabs
    }

    async fn generate(&self, config: &ModelConfig, prompt: &EnhancedPrompt, options: &GenerateOptions) -> GenerationResult {
        let attempt = async {
            let key = Self::api_key(config)?;
            let payload = Self::generate_payload(config, prompt, options, key);
            self.submit(config, payload).await
        };
        attempt.await.into()
    }

    async fn edit(&self, config: &ModelConfig, prompt: &EnhancedPrompt, input: &EditInput) -> GenerationResult {
        let attempt = async {
            let key = Self::api_key(config)?;
            let payload = Self::edit_payload(config, prompt, input, key);
            self.submit(config, payload).await
        };
        attempt.await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing;
    use crate::types::GenerationType;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> ModelsLabsAdapter {
        ModelsLabsAdapter::new(Client::new()).with_poll(PollSettings::new(Duration::from_millis(5), 3))
    }

    #[tokio::test]
    async fn nano_banana_sends_aspect_ratio_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v7/images/text-to-image"))
            .and(body_partial_json(json!({
                "key": "test-key",
                "model_id": "nano-banana-pro",
                "aspect_ratio": "16:9",
                "samples": "1",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "output": ["https://cdn.modelslab.test/out.png"],
                "seed": 42,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = testing::config(
            ProviderId::ModelsLabs,
            "nano-banana-pro",
            &format!("{}/api/v7/images/text-to-image", server.uri()),
            None,
        );
        config.parameters.insert("aspect_ratio".into(), json!("16:9"));
        let prompt = testing::prompt(GenerationType::Image, "a lighthouse");

        let result = adapter().generate(&config, &prompt, &GenerateOptions::default()).await;
        assert_eq!(result.url(), Some("https://cdn.modelslab.test/out.png"));
        assert_eq!(result.metadata["seed"], json!(42));
    }

    #[tokio::test]
    async fn processing_response_is_polled_until_success() {
        let server = MockServer::start().await;
        let fetch_url = format!("{}/fetch/7", server.uri());
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "processing",
                "fetch_result": fetch_url,
                "eta": 3.0,
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/fetch/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/fetch/7"))
            .and(body_partial_json(json!({"key": "test-key"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "output": ["https://cdn.modelslab.test/late.png"],
            })))
            .mount(&server)
            .await;

        let config = testing::config(
            ProviderId::ModelsLabs,
            "flux",
            &format!("{}/generate", server.uri()),
            None,
        );
        let prompt = testing::prompt(GenerationType::Image, "a lighthouse");
        let result = adapter().generate(&config, &prompt, &GenerateOptions::default()).await;
        assert_eq!(result.url(), Some("https://cdn.modelslab.test/late.png"));
        assert_eq!(result.metadata["fetch_attempts"], json!(2));
    }

    #[tokio::test]
    async fn error_status_becomes_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "message": "Invalid model_id",
            })))
            .mount(&server)
            .await;

        let config = testing::config(ProviderId::ModelsLabs, "nope", &server.uri(), None);
        let prompt = testing::prompt(GenerationType::Image, "a lighthouse");
        let result = adapter().generate(&config, &prompt, &GenerateOptions::default()).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Rejected));
        assert_eq!(result.error_message(), Some("ModelsLabs API error: Invalid model_id"));
    }

    #[tokio::test]
    async fn edit_posts_init_image_and_strength() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v6/realtime/img2img"))
            .and(body_partial_json(json!({
                "init_image": "https://img.test/in.png",
                "strength": 0.35,
                "num_inference_steps": 35,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "output": ["https://cdn.modelslab.test/edit.png"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = testing::config(
            ProviderId::ModelsLabs,
            "nano-banana-pro",
            &format!("{}/api/v6/realtime/img2img", server.uri()),
            None,
        );
        config.parameters.insert("strength".into(), json!(0.35));
        let prompt = testing::prompt(GenerationType::Edit, "make it snowy");
        let input = EditInput {
            image_url: "https://img.test/in.png".into(),
            instructions: None,
        };
        let result = adapter().edit(&config, &prompt, &input).await;
        assert!(result.success());
    }

    #[tokio::test]
    async fn missing_key_fails_before_request() {
        let mut config = testing::config(ProviderId::ModelsLabs, "nano-banana-pro", "http://127.0.0.1:9", None);
        config.headers.clear();
        let prompt = testing::prompt(GenerationType::Image, "cat");
        let result = adapter().generate(&config, &prompt, &GenerateOptions::default()).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Configuration));
    }

    #[test]
    fn aspect_ratio_buckets() {
        assert_eq!(aspect_ratio_for(1024, 1024), "1:1");
        assert_eq!(aspect_ratio_for(1024, 576), "16:9");
        assert_eq!(aspect_ratio_for(576, 1024), "9:16");
        assert_eq!(aspect_ratio_for(1024, 768), "4:3");
        assert_eq!(aspect_ratio_for(700, 100), "1:1");
    }
}
