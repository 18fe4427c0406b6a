use rmcp::{ErrorData as McpError, handler::server::wrapper::Parameters, model::CallToolResult, schemars::JsonSchema};
use serde::Deserialize;

use crate::orchestrator::{DispatchMode, Orchestrator};
use crate::prompt::{QualityTier, Style};
use crate::request::GenerationRequest;
use crate::tools::{DEFAULT_OWNER, dispatch_mode, orchestrator_error, record_result};
use crate::types::{GenerationType, Priority};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateImageRequest {
    #[schemars(description = "What the image should show, at most 500 characters")]
    pub prompt: String,
    #[schemars(description = "Aspect ratio such as 1:1, 16:9, 9:16, 4:3 or 3:4, or explicit WxH dimensions like 1024x768")]
    pub resolution: Option<String>,
    #[schemars(description = "Explicit model id; omit to let the router choose")]
    pub model: Option<String>,
    #[schemars(description = "Routing preference: speed, quality (default) or cost")]
    pub priority: Option<Priority>,
    #[schemars(description = "Visual style applied to the prompt")]
    pub style: Option<Style>,
    #[schemars(description = "Quality tier: standard, high (default) or ultra")]
    pub quality: Option<QualityTier>,
    #[schemars(description = "Return immediately and finish in the background")]
    pub background: Option<bool>,
    #[schemars(description = "Owner recorded on the generation history")]
    pub owner: Option<String>,
}

pub async fn generate_image(
    orchestrator: &Orchestrator,
    background_mode: DispatchMode,
    Parameters(request): Parameters<GenerateImageRequest>,
) -> Result<CallToolResult, McpError> {
    let mode = dispatch_mode(request.background, background_mode);
    let mut generation = GenerationRequest::new(
        GenerationType::Image,
        request.owner.unwrap_or_else(|| DEFAULT_OWNER.to_string()),
        request.prompt,
    )
    .with_priority(request.priority.unwrap_or_default());
    generation.style = request.style;
    generation.quality = request.quality;
    if let Some(resolution) = request.resolution.filter(|value| !value.trim().is_empty()) {
        generation = generation.with_resolution(resolution.trim());
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
