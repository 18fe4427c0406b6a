pub mod edit_image;
pub mod generate_image;
pub mod generate_video;
pub mod generations;
pub mod url_validation;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;
use serde_json::Value;

use crate::error::OrchestratorError;
use crate::orchestrator::DispatchMode;
use crate::store::Generation;
use crate::types::{GenerationStatus, ProviderId};

pub const DEFAULT_OWNER: &str = "mcp";

#[derive(Serialize)]
pub struct ToolResponse {
    pub id: String,
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub text: String,
}

impl ToolResponse {
    fn from_record(record: &Generation) -> Self {
        let text = match record.status {
            GenerationStatus::Completed => format!("{} finished.", record.kind),
            GenerationStatus::Failed => format!("{} failed.", record.kind),
            GenerationStatus::Pending | GenerationStatus::Processing => format!(
                "{} is {}. Check back with get_generation using id {}.",
                record.kind, record.status, record.id
            ),
        };
        Self {
            id: record.id.to_string(),
            status: record.status,
            url: record.output_url.clone(),
            model: record.model.clone(),
            provider: record.provider,
            error: record.error.clone(),
            text,
        }
    }
}

pub use edit_image::{EditImageRequest, edit_image};
pub use generate_image::{GenerateImageRequest, generate_image};
pub use generate_video::{GenerateVideoRequest, generate_video};
pub use generations::{
    GetGenerationRequest, ListGenerationsRequest, ListModelsRequest, get_generation, list_generations, list_models,
};
pub use url_validation::validate_http_url;

/// Chooses between waiting on the provider and handing the work off.
pub fn dispatch_mode(background: Option<bool>, background_mode: DispatchMode) -> DispatchMode {
    if background.unwrap_or(false) {
        background_mode
    } else {
        DispatchMode::Inline
    }
}

/// Renders a generation record; a failed generation is reported as a tool error.
pub fn record_result(record: &Generation) -> Result<CallToolResult, McpError> {
    let response = ToolResponse::from_record(record);
    let json = serde_json::to_string(&response).map_err(|err| {
        McpError::internal_error("serialize tool response failed", Some(Value::String(err.to_string())))
    })?;
    if record.status == GenerationStatus::Failed {
        Ok(CallToolResult::error(vec![Content::text(json)]))
    } else {
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

pub fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string(value).map_err(|err| {
        McpError::internal_error("serialize tool response failed", Some(Value::String(err.to_string())))
    })?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

pub fn orchestrator_error(err: OrchestratorError) -> McpError {
    if err.is_client_error() {
        McpError::invalid_params(err.to_string(), None)
    } else {
        tracing::error!(error = %err, "generation request failed");
        McpError::internal_error("generation request failed", Some(Value::String(err.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::store::{GenerationStore, MemoryGenerationStore, new_generation};
    use crate::types::GenerationType;

    #[test]
    fn background_flag_selects_configured_mode() {
        assert_eq!(dispatch_mode(None, DispatchMode::Queued), DispatchMode::Inline);
        assert_eq!(dispatch_mode(Some(true), DispatchMode::Queued), DispatchMode::Queued);
        assert_eq!(dispatch_mode(Some(true), DispatchMode::Detached), DispatchMode::Detached);
    }

    #[test]
    fn validation_errors_become_invalid_params() {
        let err = orchestrator_error(ValidationError::EmptyPrompt.into());
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn pending_record_points_at_get_generation() {
        let store = MemoryGenerationStore::new();
        let record = store.create(new_generation("u1", GenerationType::Video)).await.unwrap();
        let response = ToolResponse::from_record(&record);
        assert!(response.text.contains("get_generation"));
        assert!(response.url.is_none());
    }
}
