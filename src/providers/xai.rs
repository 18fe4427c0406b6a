use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::http::{parse_json, poll_json, post_json};
use super::{
    EditInput, FailureKind, GenerateOptions, GenerationResult, PollSettings, ProviderAdapter, ProviderFailure,
    VideoInput,
};
use crate::prompt::EnhancedPrompt;
use crate::request::{MAX_VIDEO_DURATION_SECS, MIN_VIDEO_DURATION_SECS};
use crate::router::ModelConfig;
use crate::types::ProviderId;

const IMAGE_TIMEOUT: Duration = Duration::from_secs(60);
const EDIT_TIMEOUT: Duration = Duration::from_secs(120);
const VIDEO_START_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL: PollSettings = PollSettings::new(Duration::from_secs(5), 120);

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    respect_moderation: Option<bool>,
    revised_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoStartResponse {
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum VideoStatus {
    Pending,
    Done,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct VideoStatusResponse {
    status: VideoStatus,
    video: Option<VideoPayload>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoPayload {
    url: Option<String>,
    duration: Option<f64>,
    respect_moderation: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct XaiAdapter {
    client: Client,
    poll: PollSettings,
}

impl XaiAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
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
            .ok_or_else(|| ProviderFailure::missing_credential(ProviderId::Xai))
    }

    async fn create_image(
        &self,
        config: &ModelConfig,
        payload: Value,
        timeout: Duration,
        label: &str,
    ) -> Result<GenerationResult, ProviderFailure> {
        let key = Self::api_key(config)?;
        let request = self.client.post(&config.endpoint).bearer_auth(key).timeout(timeout);
        let response = post_json(ProviderId::Xai, request, &payload).await?;
        let body: ImageResponse = parse_json(ProviderId::Xai, response).await?;

        let first = body.data.into_iter().next();
        match first {
            Some(ImageData {
                url: Some(url),
                revised_prompt,
                ..
            }) => {
                let mut result = GenerationResult::completed(url).with_entry("model_used", config.model.clone());
                if let Some(revised) = revised_prompt {
                    result = result.with_entry("revised_prompt", revised);
                }
                Ok(result)
            }
            Some(ImageData {
                respect_moderation: Some(false),
                ..
            }) => Err(ProviderFailure::new(
                FailureKind::Moderation,
                format!("{label} was blocked by content moderation. Try a different prompt."),
            )),
            _ => Err(ProviderFailure::new(
                FailureKind::InvalidResponse,
                "No image URL returned from xAI API",
            )),
        }
    }

    fn video_payload(config: &ModelConfig, prompt: &EnhancedPrompt, input: &VideoInput) -> Value {
        let mut payload = json!({
            "model": config.model,
            "prompt": prompt.enhanced,
        });
        if let Some(image_url) = &input.image_url {
            payload["image_url"] = json!(image_url);
        }

        // Video-to-video edits reject duration, aspect and resolution.
        if let Some(video_url) = &input.options.source_video_url {
            payload["video_url"] = json!(video_url);
            return payload;
        }

        let duration = input
            .options
            .duration
            .or_else(|| config.param_u64("duration").map(|value| u32::try_from(value).unwrap_or(u32::MAX)));
        if let Some(duration) = duration {
            payload["duration"] = json!(duration.clamp(MIN_VIDEO_DURATION_SECS, MAX_VIDEO_DURATION_SECS));
        }
        if let Some(aspect_ratio) = input
            .options
            .aspect_ratio
            .as_deref()
            .or_else(|| config.param_str("aspect_ratio"))
        {
            payload["aspect_ratio"] = json!(aspect_ratio);
        }
        if let Some(resolution) = input
            .options
            .resolution
            .as_deref()
            .or_else(|| config.param_str("resolution"))
        {
            payload["resolution"] = json!(resolution);
        }
        payload
    }

    async fn start_video(&self, config: &ModelConfig, payload: Value) -> Result<String, ProviderFailure> {
        let key = Self::api_key(config)?;
        let request = self
            .client
            .post(&config.endpoint)
            .bearer_auth(key)
            .timeout(VIDEO_START_TIMEOUT);
        let response = post_json(ProviderId::Xai, request, &payload).await?;
        let body: VideoStartResponse = parse_json(ProviderId::Xai, response).await?;
        body.request_id.filter(|id| !id.is_empty()).ok_or_else(|| {
            ProviderFailure::new(FailureKind::InvalidResponse, "No request_id in xAI video response")
        })
    }

    async fn poll_video(&self, config: &ModelConfig, request_id: &str) -> Result<GenerationResult, ProviderFailure> {
        let key = Self::api_key(config)?;
        let status_url = config.status_url(request_id).ok_or_else(|| {
            ProviderFailure::new(FailureKind::Configuration, "xAI video config has no status endpoint")
        })?;

        for attempt in 1..=self.poll.max_attempts {
            sleep(self.poll.interval).await;
            let request = self.client.get(&status_url).bearer_auth(key).timeout(STATUS_TIMEOUT);
            let Some(body) = poll_json::<VideoStatusResponse>(ProviderId::Xai, request).await else {
                continue;
            };
            debug!(request_id, attempt, status = ?body.status, "xAI video poll");

            let video = body.video.unwrap_or(VideoPayload {
                url: None,
                duration: None,
                respect_moderation: None,
            });
            match body.status {
                VideoStatus::Done => {
                    let Some(url) = video.url else {
                        return Err(ProviderFailure::new(
                            FailureKind::Moderation,
                            "Video was blocked by content moderation.",
                        ));
                    };
                    let mut result = GenerationResult::completed(url)
                        .with_entry("request_id", request_id)
                        .with_entry("poll_attempts", attempt);
                    if let Some(duration) = video.duration {
                        result = result.with_entry("duration", duration);
                    }
                    if let Some(model) = body.model {
                        result = result.with_entry("model_used", model);
                    }
                    if let Some(flag) = video.respect_moderation {
                        result = result.with_entry("respect_moderation", flag);
                    }
                    return Ok(result);
                }
                VideoStatus::Expired => {
                    return Err(ProviderFailure::new(
                        FailureKind::Expired,
                        "Video generation request expired. Please try again.",
                    ));
                }
                VideoStatus::Pending | VideoStatus::Unknown => {}
            }
        }

        warn!(request_id, attempts = self.poll.max_attempts, "xAI video poll exhausted");
        Err(ProviderFailure::new(
            FailureKind::Timeout,
            "Timeout waiting for video generation. The video may still be processing; check your history later.",
        ))
    }
}

#[async_trait]
impl ProviderAdapter for XaiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Xai
    }

    async fn generate(&self, config: &ModelConfig, prompt: &EnhancedPrompt, _options: &GenerateOptions) -> GenerationResult {
        let mut payload = json!({
            "model": config.model,
            "prompt": prompt.enhanced,
            "n": 1,
        });
        if let Some(aspect_ratio) = config.param_str("aspect_ratio") {
            payload["aspect_ratio"] = json!(aspect_ratio);
        }
        self.create_image(config, payload, IMAGE_TIMEOUT, "Image generation")
            .await
            .into()
    }

    async fn edit(&self, config: &ModelConfig, prompt: &EnhancedPrompt, input: &EditInput) -> GenerationResult {
        let edit_prompt = match input.instructions.as_deref().map(str::trim) {
            Some(instructions) if !instructions.is_empty() => {
                format!("{}. Additional instructions: {instructions}", prompt.enhanced)
            }
            _ => prompt.enhanced.clone(),
        };
        let mut payload = json!({
            "model": config.model,
            "prompt": edit_prompt,
            "image_url": input.image_url,
            "n": 1,
        });
        if let Some(aspect_ratio) = config.param_str("aspect_ratio") {
            payload["aspect_ratio"] = json!(aspect_ratio);
        }
        self.create_image(config, payload, EDIT_TIMEOUT, "Image edit").await.into()
    }

    async fn generate_video(&self, config: &ModelConfig, prompt: &EnhancedPrompt, input: &VideoInput) -> GenerationResult {
        let attempt = async {
            let payload = Self::video_payload(config, prompt, input);
            let request_id = self.start_video(config, payload).await?;
            info!(request_id = %request_id, model = %config.model, "xAI video started");
            self.poll_video(config, &request_id).await
        };
        attempt.await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing;
    use crate::request::VideoOptions;
    use crate::types::GenerationType;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> XaiAdapter {
        XaiAdapter::new(Client::new()).with_poll(PollSettings::new(Duration::from_millis(5), 5))
    }

    fn video_config(server: &MockServer) -> ModelConfig {
        testing::config(
            ProviderId::Xai,
            "grok-imagine-video",
            &format!("{}/videos/generations", server.uri()),
            Some(&format!("{}/videos/{{request_id}}", server.uri())),
        )
    }

    async fn mount_start(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/videos/generations"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "vid-1"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn image_generation_returns_first_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(body_partial_json(json!({"model": "grok-imagine-image", "n": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"url": "https://imgen.x.ai/a.jpg"}]
            })))
            .mount(&server)
            .await;

        let config = testing::config(
            ProviderId::Xai,
            "grok-imagine-image",
            &format!("{}/images/generations", server.uri()),
            None,
        );
        let prompt = testing::prompt(GenerationType::Image, "a fox");
        let result = adapter().generate(&config, &prompt, &GenerateOptions::default()).await;
        assert_eq!(result.url(), Some("https://imgen.x.ai/a.jpg"));
    }

    #[tokio::test]
    async fn edit_without_url_and_moderation_flag_is_moderation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"image_url": "https://img.test/in.png"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"respect_moderation": false}]
            })))
            .mount(&server)
            .await;

        let config = testing::config(ProviderId::Xai, "grok-imagine-image", &server.uri(), None);
        let prompt = testing::prompt(GenerationType::Edit, "remove the hat");
        let input = EditInput {
            image_url: "https://img.test/in.png".into(),
            instructions: Some("keep the background".into()),
        };
        let result = adapter().edit(&config, &prompt, &input).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Moderation));
    }

    #[tokio::test]
    async fn video_polls_until_done() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("GET"))
            .and(path("/videos/vid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "pending"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/videos/vid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "done",
                "video": {"url": "https://vidgen.x.ai/v.mp4", "duration": 5}
            })))
            .mount(&server)
            .await;

        let prompt = testing::prompt(GenerationType::Video, "waves");
        let result = adapter()
            .generate_video(&video_config(&server), &prompt, &VideoInput::default())
            .await;
        assert_eq!(result.url(), Some("https://vidgen.x.ai/v.mp4"));
        assert_eq!(result.metadata["poll_attempts"], json!(3));
    }

    #[tokio::test]
    async fn done_without_url_is_moderation() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "done",
                "video": {"respect_moderation": false}
            })))
            .mount(&server)
            .await;

        let prompt = testing::prompt(GenerationType::Video, "waves");
        let result = adapter()
            .generate_video(&video_config(&server), &prompt, &VideoInput::default())
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Moderation));
    }

    #[tokio::test]
    async fn transient_poll_errors_are_swallowed_until_exhaustion() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(5)
            .mount(&server)
            .await;

        let prompt = testing::prompt(GenerationType::Video, "waves");
        let result = adapter()
            .generate_video(&video_config(&server), &prompt, &VideoInput::default())
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        assert!(result.error_message().unwrap().starts_with("Timeout waiting for video generation"));
    }

    #[test]
    fn video_edit_omits_generation_only_fields() {
        let config = testing::config(ProviderId::Xai, "grok-imagine-video", "http://x", None);
        let prompt = testing::prompt(GenerationType::Video, "waves");
        let input = VideoInput {
            image_url: None,
            reference_images: Vec::new(),
            options: VideoOptions {
                duration: Some(10),
                aspect_ratio: Some("16:9".into()),
                resolution: Some("720p".into()),
                source_video_url: Some("https://v.test/in.mp4".into()),
            },
        };
        let payload = XaiAdapter::video_payload(&config, &prompt, &input);
        assert_eq!(payload["video_url"], "https://v.test/in.mp4");
        assert!(payload.get("duration").is_none());
        assert!(payload.get("aspect_ratio").is_none());
        assert!(payload.get("resolution").is_none());
    }

    #[test]
    fn video_duration_is_clamped() {
        let mut config = testing::config(ProviderId::Xai, "grok-imagine-video", "http://x", None);
        config.parameters.insert("duration".into(), json!(40));
        let prompt = testing::prompt(GenerationType::Video, "waves");
        let payload = XaiAdapter::video_payload(&config, &prompt, &VideoInput::default());
        assert_eq!(payload["duration"], json!(15));
    }

    #[test]
    fn oversized_duration_saturates_instead_of_wrapping() {
        let mut config = testing::config(ProviderId::Xai, "grok-imagine-video", "http://x", None);
        config.parameters.insert("duration".into(), json!(4_294_967_297_u64));
        let prompt = testing::prompt(GenerationType::Video, "waves");
        let payload = XaiAdapter::video_payload(&config, &prompt, &VideoInput::default());
        assert_eq!(payload["duration"], json!(15));
    }
}
