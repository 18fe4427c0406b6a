use rmcp::{ErrorData as McpError, handler::server::wrapper::Parameters, model::CallToolResult, schemars::JsonSchema};
use serde::Deserialize;

use crate::orchestrator::{DispatchMode, Orchestrator};
use crate::request::GenerationRequest;
use crate::tools::url_validation::validate_image_source;
use crate::tools::{DEFAULT_OWNER, dispatch_mode, orchestrator_error, record_result};
use crate::types::{GenerationType, Priority};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditImageRequest {
    #[schemars(description = "Image to edit: an http(s) URL or a base64 data URL")]
    pub image_url: String,
    #[schemars(description = "Description of the desired result")]
    pub prompt: String,
    #[schemars(description = "Extra editing instructions appended for providers that accept them")]
    pub instructions: Option<String>,
    #[schemars(description = "Output aspect ratio or WxH dimensions")]
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

pub async fn edit_image(
    orchestrator: &Orchestrator,
    background_mode: DispatchMode,
    Parameters(request): Parameters<EditImageRequest>,
) -> Result<CallToolResult, McpError> {
    let image_url = validate_image_source("image_url", &request.image_url)?;
    let mode = dispatch_mode(request.background, background_mode);
    let mut generation = GenerationRequest::new(
        GenerationType::Edit,
        request.owner.unwrap_or_else(|| DEFAULT_OWNER.to_string()),
        request.prompt,
    )
    .with_image(image_url)
    .with_priority(request.priority.unwrap_or_default());
    generation.instructions = request.instructions.filter(|value| !value.trim().is_empty());
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
