use uuid::Uuid;

use crate::types::{GenerationType, ProviderId};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{setting} is not configured")]
    Missing { setting: &'static str },

    #[error("API key not configured for provider {provider}. Please set {setting} environment variable.")]
    MissingCredential {
        provider: ProviderId,
        setting: &'static str,
    },

    #[error("invalid value for {setting}: {message}")]
    Invalid {
        setting: &'static str,
        message: String,
    },

    #[error("model {model} advertises {kind} but provider {provider} cannot serve it")]
    UnservableModel {
        model: String,
        kind: GenerationType,
        provider: ProviderId,
    },
}

/// Input problems detected before any network call is made.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Prompt is required")]
    EmptyPrompt,

    #[error("Prompt is too long: {actual} characters (max {max})")]
    PromptTooLong { max: usize, actual: usize },

    #[error("Image is required for {0} requests")]
    ImageRequired(GenerationType),

    #[error("Too many reference images: {actual} (max {max})")]
    TooManyReferenceImages { max: usize, actual: usize },

    #[error("Model {model} requires at least one reference image")]
    ReferenceImagesRequired { model: String },

    #[error("Video duration must be between {min} and {max} seconds, got {actual}")]
    InvalidDuration { min: u32, max: u32, actual: u32 },

    #[error("Invalid image reference: {0}")]
    InvalidImage(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("No model available for type: {0}")]
    NoModelAvailable(GenerationType),

    #[error("{provider} does not support type: {kind}")]
    UnsupportedOperation {
        provider: ProviderId,
        kind: GenerationType,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("invalid data URL")]
    InvalidDataUrl,

    #[error("object from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("generation not found: {0}")]
    RecordNotFound(Uuid),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job payload could not be encoded: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("job store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl OrchestratorError {
    /// Whether the caller supplied bad input, as opposed to a server-side fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Validation(_)
                | OrchestratorError::Router(RouterError::ModelNotFound(_))
                | OrchestratorError::Router(RouterError::NoModelAvailable(_))
                | OrchestratorError::Router(RouterError::UnsupportedOperation { .. })
        )
    }
}
