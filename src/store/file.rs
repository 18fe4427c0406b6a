use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{Generation, GenerationFilter, GenerationStore, GenerationUpdate, NewGeneration};
use crate::error::StorageError;

const GENERATION_DIR: &str = "generations";

/// One pretty-printed JSON document per generation under `<data_dir>/generations`.
///
/// The data directory is kept apart from the served asset root.
#[derive(Debug)]
pub struct FileGenerationStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileGenerationStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            dir: data_dir.join(GENERATION_DIR),
            write_lock: Mutex::new(()),
        }
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn save(&self, record: &Generation) -> Result<(), StorageError> {
        let payload = serde_json::to_vec_pretty(record)?;
        fs::create_dir_all(&self.dir).await?;
        fs::write(self.record_path(record.id), payload).await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Generation>, StorageError> {
        match fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl GenerationStore for FileGenerationStore {
    async fn create(&self, new: NewGeneration) -> Result<Generation, StorageError> {
        let record = Generation::from_new(new, Utc::now());
        let _guard = self.write_lock.lock().await;
        self.save(&record).await?;
        Ok(record)
    }

    async fn update(&self, id: Uuid, update: GenerationUpdate) -> Result<Generation, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(id).await?.ok_or(StorageError::RecordNotFound(id))?;
        record.apply(update, Utc::now());
        self.save(&record).await?;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Generation>, StorageError> {
        self.load(id).await
    }

    async fn list_recent(&self, filter: &GenerationFilter) -> Result<Vec<Generation>, StorageError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<Generation>(&bytes) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable generation record"),
            }
        }
        Ok(filter.select(records))
    }
}
