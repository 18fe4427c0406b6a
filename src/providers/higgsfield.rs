use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info};

use super::http::{parse_json, poll_json, post_json};
use super::{FailureKind, GenerationResult, PollSettings, ProviderAdapter, ProviderFailure, VideoInput};
use crate::config::DEFAULT_REFERENCE_IMAGE_PARAM;
use crate::prompt::EnhancedPrompt;
use crate::request::{MAX_VIDEO_DURATION_SECS, MIN_VIDEO_DURATION_SECS};
use crate::router::ModelConfig;
use crate::types::ProviderId;

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL: PollSettings = PollSettings::new(Duration::from_secs(1), 120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum HiggsfieldStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Nsfw,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl HiggsfieldStatus {
    fn as_str(&self) -> &'static str {
        match self {
            HiggsfieldStatus::Queued => "queued",
            HiggsfieldStatus::InProgress => "in_progress",
            HiggsfieldStatus::Completed => "completed",
            HiggsfieldStatus::Failed => "failed",
            HiggsfieldStatus::Nsfw => "nsfw",
            HiggsfieldStatus::Canceled => "canceled",
            HiggsfieldStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MediaUrl {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoContainer {
    video: Option<MediaUrl>,
    #[serde(default)]
    videos: Vec<MediaUrl>,
}

impl VideoContainer {
    fn url(self) -> Option<String> {
        self.video
            .and_then(|video| video.url)
            .or_else(|| self.videos.into_iter().find_map(|video| video.url))
    }
}

/// Submission and status bodies share one loosely-populated shape.
#[derive(Debug, Deserialize)]
struct HiggsfieldResponse {
    status: Option<HiggsfieldStatus>,
    #[serde(alias = "requestId", alias = "id")]
    request_id: Option<String>,
    #[serde(alias = "statusUrl")]
    status_url: Option<String>,
    #[serde(flatten)]
    top: VideoContainer,
    result: Option<VideoContainer>,
    output: Option<VideoContainer>,
    #[serde(default)]
    outputs: Vec<MediaUrl>,
    #[serde(default)]
    artifacts: Vec<MediaUrl>,
}

impl HiggsfieldResponse {
    fn video_url(self) -> Option<String> {
        self.top
            .url()
            .or_else(|| self.result.and_then(VideoContainer::url))
            .or_else(|| self.output.and_then(VideoContainer::url))
            .or_else(|| self.outputs.into_iter().find_map(|item| item.url))
            .or_else(|| self.artifacts.into_iter().find_map(|item| item.url))
    }
}

#[derive(Debug, Clone)]
pub struct HiggsfieldAdapter {
    client: Client,
    poll: PollSettings,
}

impl HiggsfieldAdapter {
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

    fn authorization(config: &ModelConfig) -> Result<&str, ProviderFailure> {
        config
            .headers
            .get("Authorization")
            .map(String::as_str)
            .filter(|value| value.starts_with("Key ") && value.len() > 4)
            .ok_or_else(|| ProviderFailure::missing_credential(ProviderId::Higgsfield))
    }

    fn application_url(config: &ModelConfig) -> Result<String, ProviderFailure> {
        let application = config
            .param_str("application")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ProviderFailure::new(
                    FailureKind::Configuration,
                    "Higgsfield application not configured. Set HIGGSFIELD_VIDEO_APP to your video app path.",
                )
            })?;
        if application.starts_with("http://") || application.starts_with("https://") {
            return Ok(application.to_string());
        }
        Ok(format!(
            "{}/{}",
            config.endpoint.trim_end_matches('/'),
            application.trim_start_matches('/')
        ))
    }

    fn payload(config: &ModelConfig, prompt: &EnhancedPrompt, input: &VideoInput) -> Value {
        let reference_param = config
            .param_str("reference_image_param")
            .unwrap_or(DEFAULT_REFERENCE_IMAGE_PARAM);
        // Reference-driven apps get the caller's words, not the enhanced prompt.
        let text = if input.reference_images.is_empty() {
            &prompt.enhanced
        } else {
            &prompt.original
        };
        let mut payload = json!({ "prompt": text });
        payload["duration"] = json!(
            input
                .options
                .duration
                .or_else(|| config.param_u64("duration").map(|value| u32::try_from(value).unwrap_or(u32::MAX)))
                .unwrap_or_else(|| input.options.effective_duration())
                .clamp(MIN_VIDEO_DURATION_SECS, MAX_VIDEO_DURATION_SECS)
        );
        if let Some(aspect_ratio) = input
            .options
            .aspect_ratio
            .as_deref()
            .or_else(|| config.param_str("aspect_ratio"))
        {
            payload["aspect_ratio"] = json!(aspect_ratio);
        }
        if !input.reference_images.is_empty() {
            payload[reference_param] = json!(input.reference_images);
        } else if let Some(image_url) = &input.image_url {
            payload["image_url"] = json!(image_url);
        }
        payload
    }

    async fn submit(
        &self,
        config: &ModelConfig,
        prompt: &EnhancedPrompt,
        input: &VideoInput,
    ) -> Result<GenerationResult, ProviderFailure> {
        if input.reference_images.is_empty() {
            return Err(ProviderFailure::new(
                FailureKind::Validation,
                "Higgsfield requires at least one reference image",
            ));
        }
        let authorization = Self::authorization(config)?;
        let url = Self::application_url(config)?;
        let payload = Self::payload(config, prompt, input);

        let request = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .timeout(SUBMIT_TIMEOUT);
        let response = post_json(ProviderId::Higgsfield, request, &payload).await?;
        let body: HiggsfieldResponse = parse_json(ProviderId::Higgsfield, response).await?;

        let request_id = body.request_id.clone();
        let status_url = body
            .status_url
            .clone()
            .or_else(|| request_id.as_deref().and_then(|id| config.status_url(id)));
        let Some(status_url) = status_url else {
            return body
                .video_url()
                .map(GenerationResult::completed)
                .ok_or_else(|| {
                    ProviderFailure::new(FailureKind::InvalidResponse, "No status URL returned by Higgsfield API.")
                });
        };

        info!(request_id = request_id.as_deref().unwrap_or_default(), "Higgsfield video submitted");
        let result = self.poll_result(&status_url, authorization).await?;
        Ok(match request_id {
            Some(id) => result.with_entry("request_id", id),
            None => result,
        })
    }

    async fn poll_result(&self, status_url: &str, authorization: &str) -> Result<GenerationResult, ProviderFailure> {
        for attempt in 1..=self.poll.max_attempts {
            sleep(self.poll.interval).await;
            let request = self
                .client
                .get(status_url)
                .header(reqwest::header::AUTHORIZATION, authorization)
                .timeout(STATUS_TIMEOUT);
            let Some(body) = poll_json::<HiggsfieldResponse>(ProviderId::Higgsfield, request).await else {
                continue;
            };
            let status = body.status.unwrap_or(HiggsfieldStatus::InProgress);
            debug!(attempt, status = status.as_str(), "Higgsfield poll");

            match status {
                HiggsfieldStatus::Completed => {
                    return body
                        .video_url()
                        .map(|url| GenerationResult::completed(url).with_entry("poll_attempts", attempt))
                        .ok_or_else(|| {
                            ProviderFailure::new(
                                FailureKind::InvalidResponse,
                                "Higgsfield completed but no video URL was found in the response.",
                            )
                        });
                }
                HiggsfieldStatus::Nsfw => {
                    return Err(ProviderFailure::new(FailureKind::Moderation, "Higgsfield request nsfw."));
                }
                HiggsfieldStatus::Failed | HiggsfieldStatus::Canceled => {
                    return Err(ProviderFailure::new(
                        FailureKind::Rejected,
                        format!("Higgsfield request {}.", status.as_str()),
                    ));
                }
                HiggsfieldStatus::Queued | HiggsfieldStatus::InProgress | HiggsfieldStatus::Unknown => {}
            }
        }
        Err(ProviderFailure::new(
            FailureKind::Timeout,
            "Timeout waiting for Higgsfield video generation.",
        ))
    }
}

#[async_trait]
impl ProviderAdapter for HiggsfieldAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Higgsfield
    }

    async fn generate_video(&self, config: &ModelConfig, prompt: &EnhancedPrompt, input: &VideoInput) -> GenerationResult {
        self.submit(config, prompt, input).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing;
    use crate::types::GenerationType;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> HiggsfieldAdapter {
        HiggsfieldAdapter::new(Client::new()).with_poll(PollSettings::new(Duration::from_millis(5), 5))
    }

    fn config(server: &MockServer) -> ModelConfig {
        let mut config = testing::config(
            ProviderId::Higgsfield,
            "higgsfield-soul-video",
            &server.uri(),
            Some(&format!("{}/requests/{{request_id}}/status", server.uri())),
        );
        config.parameters.insert("application".into(), json!("/soul/video"));
        config
            .parameters
            .insert("reference_image_param".into(), json!("reference_image_urls"));
        config
    }

    fn input(refs: &[&str]) -> VideoInput {
        VideoInput {
            reference_images: refs.iter().map(|url| url.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn zero_references_fail_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let prompt = testing::prompt(GenerationType::Video, "dance");
        let result = adapter().generate_video(&config(&server), &prompt, &input(&[])).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Validation));
        assert!(result.error_message().unwrap().contains("requires at least one reference image"));
    }

    #[tokio::test]
    async fn submission_polls_derived_status_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/soul/video"))
            .and(header("authorization", "Key test-key"))
            .and(body_partial_json(json!({
                "prompt": "dance",
                "reference_image_urls": ["https://img.test/ref.png"],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "hf-9"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/requests/hf-9/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/requests/hf-9/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "result": {"videos": [{"url": "https://cdn.higgsfield.test/v.mp4"}]}
            })))
            .mount(&server)
            .await;

        let prompt = testing::prompt(GenerationType::Video, "dance");
        let result = adapter()
            .generate_video(&config(&server), &prompt, &input(&["https://img.test/ref.png"]))
            .await;
        assert_eq!(result.url(), Some("https://cdn.higgsfield.test/v.mp4"));
        assert_eq!(result.metadata["request_id"], json!("hf-9"));
    }

    #[tokio::test]
    async fn nsfw_status_is_moderation() {
        let server = MockServer::start().await;
        let status_url = format!("{}/custom/status", server.uri());
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"statusUrl": status_url})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/custom/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "nsfw"})))
            .mount(&server)
            .await;

        let prompt = testing::prompt(GenerationType::Video, "dance");
        let result = adapter()
            .generate_video(&config(&server), &prompt, &input(&["https://img.test/ref.png"]))
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Moderation));
    }

    #[tokio::test]
    async fn direct_video_in_submission_skips_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "video": {"url": "https://cdn.higgsfield.test/now.mp4"}
            })))
            .mount(&server)
            .await;

        let prompt = testing::prompt(GenerationType::Video, "dance");
        let result = adapter()
            .generate_video(&config(&server), &prompt, &input(&["https://img.test/ref.png"]))
            .await;
        assert_eq!(result.url(), Some("https://cdn.higgsfield.test/now.mp4"));
    }

    #[test]
    fn oversized_duration_saturates_then_clamps() {
        let mut config = testing::config(ProviderId::Higgsfield, "m", "https://platform.test", None);
        config.parameters.insert("duration".into(), json!(4_294_967_297_u64));
        let prompt = testing::prompt(GenerationType::Video, "dance");
        let payload = HiggsfieldAdapter::payload(&config, &prompt, &input(&["https://img.test/a.png"]));
        assert_eq!(payload["duration"], json!(MAX_VIDEO_DURATION_SECS));
    }

    #[test]
    fn absolute_application_urls_are_used_verbatim() {
        let mut config = testing::config(ProviderId::Higgsfield, "m", "https://platform.test", None);
        config
            .parameters
            .insert("application".into(), json!("https://apps.test/soul"));
        assert_eq!(HiggsfieldAdapter::application_url(&config).unwrap(), "https://apps.test/soul");
        config.parameters.insert("application".into(), json!("/soul/video"));
        assert_eq!(
            HiggsfieldAdapter::application_url(&config).unwrap(),
            "https://platform.test/soul/video"
        );
    }
}
