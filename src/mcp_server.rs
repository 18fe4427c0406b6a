use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};

use crate::orchestrator::{DispatchMode, Orchestrator};
use crate::tools::{
    EditImageRequest, GenerateImageRequest, GenerateVideoRequest, GetGenerationRequest, ListGenerationsRequest,
    ListModelsRequest,
};

#[derive(Clone)]
pub struct StudioServer {
    tool_router: ToolRouter<Self>,
    orchestrator: Orchestrator,
    background_mode: DispatchMode,
}

impl StudioServer {
    pub fn new(orchestrator: Orchestrator, background_mode: DispatchMode) -> Self {
        Self {
            tool_router: Self::tool_router(),
            orchestrator,
            background_mode,
        }
    }
}

#[tool_router]
impl StudioServer {
    #[tool(
        description = "Generate an image from a text prompt. The router picks a model unless one is given. Generation can take a while; show the result with ![](url)"
    )]
    async fn generate_image(
        &self,
        Parameters(request): Parameters<GenerateImageRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::generate_image(&self.orchestrator, self.background_mode, Parameters(request)).await
    }

    #[tool(
        description = "Edit an existing image (http(s) URL or data URL) according to a prompt. Show the result with ![](url)"
    )]
    async fn edit_image(
        &self,
        Parameters(request): Parameters<EditImageRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::edit_image(&self.orchestrator, self.background_mode, Parameters(request)).await
    }

    #[tool(
        description = "Generate a short video from a prompt, optional first frame and reference images, or edit an existing video. Videos take minutes; prefer background=true and poll get_generation"
    )]
    async fn generate_video(
        &self,
        Parameters(request): Parameters<GenerateVideoRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::generate_video(&self.orchestrator, self.background_mode, Parameters(request)).await
    }

    #[tool(description = "Look up one generation by id, including its status and output URL")]
    async fn get_generation(
        &self,
        Parameters(request): Parameters<GetGenerationRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::get_generation(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "List recent generations, newest first, optionally filtered by owner and type")]
    async fn list_generations(
        &self,
        Parameters(request): Parameters<ListGenerationsRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::list_generations(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "List the models available for routing with their cost and speed")]
    async fn list_models(
        &self,
        Parameters(request): Parameters<ListModelsRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::list_models(&self.orchestrator, Parameters(request)).await
    }
}

#[tool_handler]
impl ServerHandler for StudioServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
