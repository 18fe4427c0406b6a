use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Generation, GenerationFilter, GenerationStore, GenerationUpdate, NewGeneration};
use crate::error::StorageError;

#[derive(Debug, Default)]
pub struct MemoryGenerationStore {
    records: RwLock<HashMap<Uuid, Generation>>,
}

impl MemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GenerationStore for MemoryGenerationStore {
    async fn create(&self, new: NewGeneration) -> Result<Generation, StorageError> {
        let record = Generation::from_new(new, Utc::now());
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, update: GenerationUpdate) -> Result<Generation, StorageError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StorageError::RecordNotFound(id))?;
        record.apply(update, Utc::now());
        Ok(record.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Generation>, StorageError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_recent(&self, filter: &GenerationFilter) -> Result<Vec<Generation>, StorageError> {
        let records = self.records.read().await.values().cloned().collect();
        Ok(filter.select(records))
    }
}
