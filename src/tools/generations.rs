use rmcp::{ErrorData as McpError, handler::server::wrapper::Parameters, model::CallToolResult, schemars::JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::orchestrator::Orchestrator;
use crate::store::GenerationFilter;
use crate::tools::{json_result, record_result};
use crate::types::{GenerationType, ProviderId};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetGenerationRequest {
    #[schemars(description = "Generation id returned by generate_image, edit_image or generate_video")]
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListGenerationsRequest {
    #[schemars(description = "Only records created by this owner")]
    pub owner: Option<String>,
    #[schemars(description = "Only records of this type: image, edit or video")]
    pub kind: Option<GenerationType>,
    #[schemars(description = "Maximum number of records, default 20")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListModelsRequest {
    #[schemars(description = "Only models serving this type: image, edit or video")]
    pub kind: Option<GenerationType>,
}

#[derive(Serialize)]
struct ModelSummary<'a> {
    id: &'a str,
    name: &'a str,
    provider: ProviderId,
    kinds: &'a [GenerationType],
    resolutions: &'a [String],
    cost_per_generation: f64,
    average_time_secs: u32,
    requires_reference_images: bool,
}

pub async fn get_generation(
    orchestrator: &Orchestrator,
    Parameters(request): Parameters<GetGenerationRequest>,
) -> Result<CallToolResult, McpError> {
    let id = Uuid::parse_str(request.id.trim())
        .map_err(|err| McpError::invalid_params("id is not a valid generation id", Some(Value::String(err.to_string()))))?;
    let record = orchestrator
        .records()
        .get(id)
        .await
        .map_err(|err| McpError::internal_error("load generation failed", Some(Value::String(err.to_string()))))?
        .ok_or_else(|| McpError::invalid_params(format!("generation {id} not found"), None))?;
    record_result(&record)
}

pub async fn list_generations(
    orchestrator: &Orchestrator,
    Parameters(request): Parameters<ListGenerationsRequest>,
) -> Result<CallToolResult, McpError> {
    let mut filter = GenerationFilter {
        owner: request.owner.filter(|value| !value.trim().is_empty()),
        kind: request.kind,
        ..Default::default()
    };
    if let Some(limit) = request.limit {
        filter.limit = limit.max(1) as usize;
    }
    let records = orchestrator
        .records()
        .list_recent(&filter)
        .await
        .map_err(|err| McpError::internal_error("list generations failed", Some(Value::String(err.to_string()))))?;
    json_result(&records)
}

pub async fn list_models(
    orchestrator: &Orchestrator,
    Parameters(request): Parameters<ListModelsRequest>,
) -> Result<CallToolResult, McpError> {
    let models: Vec<ModelSummary<'_>> = orchestrator
        .router()
        .list_models(request.kind)
        .into_iter()
        .map(|model| ModelSummary {
            id: &model.id,
            name: &model.name,
            provider: model.provider,
            kinds: &model.kinds,
            resolutions: &model.resolutions,
            cost_per_generation: model.cost_per_generation,
            average_time_secs: model.average_time_secs,
            requires_reference_images: model.requires_reference_images,
        })
        .collect();
    json_result(&models)
}
