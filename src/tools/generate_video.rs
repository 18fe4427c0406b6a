use rmcp::{ErrorData as McpError, handler::server::wrapper::Parameters, model::CallToolResult, schemars::JsonSchema};
use serde::Deserialize;

use crate::orchestrator::{DispatchMode, Orchestrator};
use crate::request::{GenerationRequest, VideoOptions};
use crate::tools::url_validation::{validate_http_url, validate_image_source};
use crate::tools::{DEFAULT_OWNER, dispatch_mode, orchestrator_error, record_result};
use crate::types::{GenerationType, Priority};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateVideoRequest {
    #[schemars(description = "What the clip should show")]
    pub prompt: String,
    #[schemars(description = "Optional first frame: an http(s) URL or a base64 data URL")]
    pub image_url: Option<String>,
    #[schemars(description = "Up to 5 reference images; some models require at least one")]
    pub reference_images: Option<Vec<String>>,
    #[schemars(description = "Existing video to edit instead of generating from scratch")]
    pub source_video_url: Option<String>,
    #[schemars(description = "Clip length in seconds, 1 to 15 (default 5)")]
    pub duration: Option<u32>,
    #[schemars(description = "Aspect ratio such as 16:9, 9:16 or 1:1")]
    pub aspect_ratio: Option<String>,
    #[schemars(description = "Output resolution such as 720p")]
    pub resolution: Option<String>,
    #[schemars(description = "Explicit model id; omit to let the router choose")]
    pub model: Option<String>,
    #[schemars(description = "Routing preference: speed, quality (default) or cost")]
    pub priority: Option<Priority>,
    #[schemars(description = "Return immediately and finish in the background")]
    pub background: Option<bool>,
    #[schemars(description = "Owner recorded on the generation history")]
    pub owner: Option<String>,
}

pub async fn generate_video(
    orchestrator: &Orchestrator,
    background_mode: DispatchMode,
    Parameters(request): Parameters<GenerateVideoRequest>,
) -> Result<CallToolResult, McpError> {
    let source_video_url = request
        .source_video_url
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|value| validate_http_url("source_video_url", value).map(String::from))
        .transpose()?;
    let mut reference_images = Vec::new();
    for reference in request.reference_images.unwrap_or_default() {
        reference_images.push(validate_image_source("reference_images", &reference)?);
    }

    let mode = dispatch_mode(request.background, background_mode);
    let mut generation = GenerationRequest::new(
        GenerationType::Video,
        request.owner.unwrap_or_else(|| DEFAULT_OWNER.to_string()),
        request.prompt,
    )
    .with_priority(request.priority.unwrap_or_default())
    .with_reference_images(reference_images)
    .with_video_options(VideoOptions {
        duration: request.duration,
        aspect_ratio: request.aspect_ratio,
        resolution: request.resolution,
        source_video_url,
    });
    if let Some(image_url) = request.image_url.filter(|value| !value.trim().is_empty()) {
        generation = generation.with_image(validate_image_source("image_url", &image_url)?);
    }
    if let Some(model) = request.model {
        generation = generation.with_model(model);
    }

    let record = orchestrator
        .submit(generation, mode)
        .await
        .map_err(orchestrator_error)?;
    record_result(&record)
}
