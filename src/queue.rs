//! Priority job queue with claim-on-dequeue, bounded retries and a dead-letter set.
//!
//! Three sorted sets mirror a Redis layout: pending jobs scored by
//! `now + priority * unit`, processing jobs scored by claim time, and
//! dead-lettered jobs scored by failure time. Every operation that moves a
//! job between sets holds the single state lock, so a job is never visible in
//! two sets and never handed to two workers.
//!
//! A queue opened over a file rewrites a JSON snapshot after every change and
//! restores it on the next start; jobs that were claimed when the process
//! stopped go back to the pending set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::types::GenerationType;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_PRIORITY_UNIT_MS: i64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub generation_id: Uuid,
    pub kind: GenerationType,
    pub payload: Value,
    pub priority: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn payload<P: DeserializeOwned>(&self) -> Result<P, QueueError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub exists: bool,
    pub in_queue: bool,
    pub in_processing: bool,
    pub in_dlq: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    Requeued { attempts: u32, retry_at: DateTime<Utc> },
    DeadLettered { attempts: u32 },
    /// The job was not in the processing set (already completed or never claimed).
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub priority_unit_ms: i64,
    /// Extra priority applied to video jobs so quick image jobs drain first.
    pub video_priority_weight: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            priority_unit_ms: DEFAULT_PRIORITY_UNIT_MS,
            video_priority_weight: 0,
        }
    }
}

/// Score-ordered set with FIFO tie-breaking on insertion sequence.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<Uuid, (i64, u64)>,
    order: BTreeSet<(i64, u64, Uuid)>,
}

impl SortedSet {
    fn insert(&mut self, id: Uuid, score: i64, seq: u64) {
        self.remove(id);
        self.scores.insert(id, (score, seq));
        self.order.insert((score, seq, id));
    }

    fn remove(&mut self, id: Uuid) -> bool {
        match self.scores.remove(&id) {
            Some((score, seq)) => self.order.remove(&(score, seq, id)),
            None => false,
        }
    }

    fn pop_first(&mut self) -> Option<Uuid> {
        let (_, _, id) = self.order.pop_first()?;
        self.scores.remove(&id);
        Some(id)
    }

    fn contains(&self, id: Uuid) -> bool {
        self.scores.contains_key(&id)
    }

    fn older_than(&self, cutoff: i64) -> Vec<Uuid> {
        self.order
            .iter()
            .take_while(|(score, _, _)| *score < cutoff)
            .map(|(_, _, id)| *id)
            .collect()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn entries(&self) -> Vec<(Uuid, i64)> {
        self.order.iter().map(|(score, _, id)| (*id, *score)).collect()
    }

    fn clear(&mut self) {
        self.scores.clear();
        self.order.clear();
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<Uuid, Job>,
    pending: SortedSet,
    processing: SortedSet,
    dead_letter: SortedSet,
    seq: u64,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self.jobs.values().cloned().collect(),
            pending: self.pending.entries(),
            processing: self.processing.entries(),
            dead_letter: self.dead_letter.entries(),
        }
    }

    /// Rebuilds state from a snapshot; interrupted claims become pending again.
    fn restore(snapshot: QueueSnapshot) -> Self {
        let mut state = QueueState::default();
        for job in snapshot.jobs {
            state.jobs.insert(job.id, job);
        }
        let now = now_ms();
        let pending = snapshot
            .pending
            .into_iter()
            .chain(snapshot.processing.into_iter().map(|(id, _)| (id, now)));
        for (id, score) in pending {
            if state.jobs.contains_key(&id) {
                let seq = state.next_seq();
                state.pending.insert(id, score, seq);
            }
        }
        for (id, score) in snapshot.dead_letter {
            if state.jobs.contains_key(&id) {
                let seq = state.next_seq();
                state.dead_letter.insert(id, score, seq);
            }
        }
        state
            .jobs
            .retain(|id, _| state.pending.contains(*id) || state.dead_letter.contains(*id));
        state
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueSnapshot {
    jobs: Vec<Job>,
    pending: Vec<(Uuid, i64)>,
    processing: Vec<(Uuid, i64)>,
    dead_letter: Vec<(Uuid, i64)>,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    snapshot_path: Option<PathBuf>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            snapshot_path: None,
        }
    }

    /// Opens a queue persisted at `path`, restoring whatever it held.
    pub async fn open(config: QueueConfig, path: PathBuf) -> Result<Self, QueueError> {
        let snapshot = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<QueueSnapshot>(&bytes)?,
            Err(err) if err.kind() == ErrorKind::NotFound => QueueSnapshot::default(),
            Err(err) => return Err(err.into()),
        };
        let interrupted = snapshot.processing.len();
        let state = QueueState::restore(snapshot);
        info!(
            path = %path.display(),
            queued = state.pending.len(),
            dead_lettered = state.dead_letter.len(),
            interrupted,
            "job queue restored"
        );
        let queue = Self {
            config,
            state: Mutex::new(state),
            snapshot_path: Some(path),
        };
        {
            let state = queue.state.lock().await;
            queue.persist(&state).await?;
        }
        Ok(queue)
    }

    async fn persist(&self, state: &QueueState) -> Result<(), QueueError> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };
        let payload = serde_json::to_vec(&state.snapshot())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, payload).await?;
        fs::rename(&staging, path).await?;
        Ok(())
    }

    async fn persist_or_warn(&self, state: &QueueState) {
        if let Err(err) = self.persist(state).await {
            warn!(error = %err, "failed to persist job queue");
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Adds a job; lower `priority` values are served first.
    pub async fn enqueue<P: Serialize>(
        &self,
        kind: GenerationType,
        generation_id: Uuid,
        payload: &P,
        priority: i64,
    ) -> Result<Uuid, QueueError> {
        let payload = serde_json::to_value(payload)?;
        let priority = match kind {
            GenerationType::Video => priority + self.config.video_priority_weight,
            GenerationType::Image | GenerationType::Edit => priority,
        };
        let job = Job {
            id: Uuid::new_v4(),
            generation_id,
            kind,
            payload,
            priority,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            created_at: Utc::now(),
            last_error: None,
        };
        let score = now_ms() + priority * self.config.priority_unit_ms;
        let id = job.id;

        let mut state = self.state.lock().await;
        let seq = state.next_seq();
        state.jobs.insert(id, job);
        state.pending.insert(id, score, seq);
        if let Err(err) = self.persist(&state).await {
            state.pending.remove(id);
            state.jobs.remove(&id);
            return Err(err);
        }
        debug!(job_id = %id, generation_id = %generation_id, kind = %kind, priority, "job enqueued");
        Ok(id)
    }

    /// Claims the lowest-scored pending job, moving it to processing.
    pub async fn dequeue(&self) -> Option<Job> {
        let mut state = self.state.lock().await;
        loop {
            let id = state.pending.pop_first()?;
            let Some(job) = state.jobs.get(&id).cloned() else {
                warn!(job_id = %id, "pending entry without job data, dropping");
                continue;
            };
            let seq = state.next_seq();
            state.processing.insert(id, now_ms(), seq);
            self.persist_or_warn(&state).await;
            return Some(job);
        }
    }

    /// Removes a finished job; repeated calls are no-ops.
    pub async fn complete(&self, job_id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.processing.remove(job_id);
        if removed {
            state.jobs.remove(&job_id);
            self.persist_or_warn(&state).await;
            debug!(job_id = %job_id, "job completed");
        }
        removed
    }

    pub async fn fail(&self, job_id: Uuid, error: &str) -> FailOutcome {
        let mut state = self.state.lock().await;
        if !state.processing.remove(job_id) {
            return FailOutcome::Unknown;
        }
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return FailOutcome::Unknown;
        };
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        let attempts = job.attempts;
        let exhausted = attempts >= job.max_attempts;
        let seq = state.next_seq();

        if exhausted {
            state.dead_letter.insert(job_id, now_ms(), seq);
            self.persist_or_warn(&state).await;
            warn!(job_id = %job_id, attempts, error, "job moved to dead-letter set");
            return FailOutcome::DeadLettered { attempts };
        }

        let delay = backoff_delay(attempts);
        let retry_at = Utc::now() + delay;
        state.pending.insert(job_id, retry_at.timestamp_millis(), seq);
        self.persist_or_warn(&state).await;
        info!(job_id = %job_id, attempts, retry_in_ms = delay.num_milliseconds(), "job requeued");
        FailOutcome::Requeued { attempts, retry_at }
    }

    /// Returns processing jobs claimed longer than `older_than` ago to the pending set.
    pub async fn requeue_stale(&self, older_than: Duration) -> Vec<Job> {
        let cutoff = now_ms() - older_than.as_millis() as i64;
        let mut state = self.state.lock().await;
        let stale = state.processing.older_than(cutoff);
        let mut requeued = Vec::with_capacity(stale.len());
        for id in stale {
            state.processing.remove(id);
            let seq = state.next_seq();
            state.pending.insert(id, now_ms(), seq);
            if let Some(job) = state.jobs.get(&id) {
                requeued.push(job.clone());
            }
        }
        if !requeued.is_empty() {
            self.persist_or_warn(&state).await;
            warn!(count = requeued.len(), "requeued stale processing jobs");
        }
        requeued
    }

    /// Generations that still have a queued or claimed job.
    pub async fn live_generations(&self) -> HashSet<Uuid> {
        let state = self.state.lock().await;
        state
            .jobs
            .values()
            .filter(|job| state.pending.contains(job.id) || state.processing.contains(job.id))
            .map(|job| job.generation_id)
            .collect()
    }

    pub async fn queue_size(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn processing_size(&self) -> usize {
        self.state.lock().await.processing.len()
    }

    pub async fn dlq_size(&self) -> usize {
        self.state.lock().await.dead_letter.len()
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            queued: state.pending.len(),
            processing: state.processing.len(),
            dead_lettered: state.dead_letter.len(),
        }
    }

    pub async fn job_status(&self, job_id: Uuid) -> JobStatus {
        let state = self.state.lock().await;
        let attempts = state.jobs.get(&job_id).map(|job| job.attempts);
        JobStatus {
            exists: attempts.is_some(),
            in_queue: state.pending.contains(job_id),
            in_processing: state.processing.contains(job_id),
            in_dlq: state.dead_letter.contains(job_id),
            attempts: attempts.unwrap_or(0),
        }
    }

    pub async fn dead_letters(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        state
            .dead_letter
            .order
            .iter()
            .filter_map(|(_, _, id)| state.jobs.get(id).cloned())
            .collect()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.jobs.clear();
        state.pending.clear();
        state.processing.clear();
        state.dead_letter.clear();
        self.persist_or_warn(&state).await;
    }
}

/// Retry delay after the `attempts`-th failure: 2^attempts seconds.
pub fn backoff_delay(attempts: u32) -> chrono::Duration {
    chrono::Duration::milliseconds(2_i64.saturating_pow(attempts).saturating_mul(1_000))
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
