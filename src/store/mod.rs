//! Persistence for generation records.

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use file::FileGenerationStore;
pub use memory::MemoryGenerationStore;

use crate::error::StorageError;
use crate::types::{GenerationStatus, GenerationType, ProviderId};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub id: Uuid,
    pub owner: String,
    #[serde(rename = "type")]
    pub kind: GenerationType,
    pub status: GenerationStatus,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub model: Option<String>,
    pub provider: Option<ProviderId>,
    pub resolution: Option<String>,
    pub duration: Option<u32>,
    pub cost_estimate: f64,
    pub output_url: Option<String>,
    pub input_image_url: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Generation {
    fn from_new(new: NewGeneration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: new.owner,
            kind: new.kind,
            status: new.status,
            prompt: new.prompt,
            enhanced_prompt: new.enhanced_prompt,
            model: new.model,
            provider: new.provider,
            resolution: new.resolution,
            duration: new.duration,
            cost_estimate: new.cost_estimate,
            output_url: None,
            input_image_url: new.input_image_url,
            metadata: new.metadata,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn apply(&mut self, update: GenerationUpdate, now: DateTime<Utc>) {
        if let Some(status) = update.status {
            self.status = status;
            if status.is_terminal() {
                self.completed_at = Some(now);
            }
        }
        if let Some(model) = update.model {
            self.model = Some(model);
        }
        if let Some(provider) = update.provider {
            self.provider = Some(provider);
        }
        if let Some(cost) = update.cost_estimate {
            self.cost_estimate = cost;
        }
        if let Some(url) = update.output_url {
            self.output_url = Some(url);
        }
        if let Some(error) = update.error {
            self.error = error;
        }
        self.metadata.extend(update.metadata);
        self.updated_at = now;
    }
}

/// Fields supplied when a generation is first recorded.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub owner: String,
    pub kind: GenerationType,
    pub status: GenerationStatus,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub model: Option<String>,
    pub provider: Option<ProviderId>,
    pub resolution: Option<String>,
    pub duration: Option<u32>,
    pub cost_estimate: f64,
    pub input_image_url: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Partial update; `None` leaves a field untouched, metadata is merged.
#[derive(Debug, Clone, Default)]
pub struct GenerationUpdate {
    pub status: Option<GenerationStatus>,
    pub model: Option<String>,
    pub provider: Option<ProviderId>,
    pub cost_estimate: Option<f64>,
    pub output_url: Option<String>,
    pub error: Option<Option<String>>,
    pub metadata: Map<String, Value>,
}

impl GenerationUpdate {
    pub fn status(status: GenerationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn completed(output_url: impl Into<String>) -> Self {
        Self {
            status: Some(GenerationStatus::Completed),
            output_url: Some(output_url.into()),
            error: Some(None),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(GenerationStatus::Failed),
            error: Some(Some(error.into())),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn with_model(mut self, provider: ProviderId, model: impl Into<String>) -> Self {
        self.provider = Some(provider);
        self.model = Some(model.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_estimate = Some(cost);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

#[derive(Debug, Clone)]
pub struct GenerationFilter {
    pub owner: Option<String>,
    pub kind: Option<GenerationType>,
    pub status: Option<GenerationStatus>,
    pub limit: usize,
}

impl Default for GenerationFilter {
    fn default() -> Self {
        Self {
            owner: None,
            kind: None,
            status: None,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl GenerationFilter {
    fn matches(&self, record: &Generation) -> bool {
        self.owner.as_deref().is_none_or(|owner| record.owner == owner)
            && self.kind.is_none_or(|kind| record.kind == kind)
            && self.status.is_none_or(|status| record.status == status)
    }

    /// Every record in `status`, regardless of owner or type.
    pub fn unfinished(status: GenerationStatus) -> Self {
        Self {
            status: Some(status),
            limit: usize::MAX,
            ..Default::default()
        }
    }

    /// Newest first, filtered and capped.
    fn select(&self, mut records: Vec<Generation>) -> Vec<Generation> {
        records.retain(|record| self.matches(record));
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(self.limit);
        records
    }
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn create(&self, new: NewGeneration) -> Result<Generation, StorageError>;

    async fn update(&self, id: Uuid, update: GenerationUpdate) -> Result<Generation, StorageError>;

    async fn get(&self, id: Uuid) -> Result<Option<Generation>, StorageError>;

    async fn list_recent(&self, filter: &GenerationFilter) -> Result<Vec<Generation>, StorageError>;
}

#[cfg(test)]
pub(crate) fn new_generation(owner: &str, kind: GenerationType) -> NewGeneration {
    NewGeneration {
        owner: owner.to_string(),
        kind,
        status: GenerationStatus::Pending,
        prompt: "a lighthouse at dusk".to_string(),
        enhanced_prompt: None,
        model: Some("nano-banana-pro".to_string()),
        provider: Some(ProviderId::ModelsLabs),
        resolution: None,
        duration: None,
        cost_estimate: 0.002,
        input_image_url: None,
        metadata: Map::new(),
    }
}
