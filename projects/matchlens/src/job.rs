//! Job records, their state machine and the in-process registry.
//!
//! Every transition is mirrored to `outputs/<id>/job.json` under the media
//! root and announced on the job's broadcast channel.

use crate::error::PipelineError;
use crate::pipeline::types::Product;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use walkdir::WalkDir;

pub const OUTPUTS_DIR: &str = "outputs";
const RECORD_FILE: &str = "job.json";
const EVENT_CAPACITY: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// pending -> processing -> {done, failed}; a pending job may also fail
    /// directly.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product -> output path relative to the media root.
pub type OutputMap = BTreeMap<Product, String>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: u64,
    pub status: JobStatus,
    pub produce: BTreeSet<Product>,
    pub outputs: OutputMap,
    pub error: Option<String>,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    /// Uploaded clip
    pub original: PathBuf,
}

/// Pushed to subscribers on every change.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub progress: u8,
    pub outputs: Option<OutputMap>,
}

impl From<&JobRecord> for StatusUpdate {
    fn from(record: &JobRecord) -> Self {
        Self {
            status: record.status,
            progress: record.progress,
            outputs: (record.status == JobStatus::Done).then(|| record.outputs.clone()),
        }
    }
}

/// Relative output path for a product of a job.
pub fn output_rel_path(id: u64, product: Product) -> String {
    format!("{}/{}/{}", OUTPUTS_DIR, id, product.file_name())
}

/// Shared, lock-guarded state of one job.
pub struct JobHandle {
    record: RwLock<JobRecord>,
    events: broadcast::Sender<StatusUpdate>,
    dir: PathBuf,
}

impl JobHandle {
    fn new(record: JobRecord, dir: PathBuf) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            record: RwLock::new(record),
            events,
            dir,
        }
    }

    pub fn id(&self) -> u64 {
        self.snapshot().id
    }

    pub fn snapshot(&self) -> JobRecord {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.events.subscribe()
    }

    /// `outputs/<id>` under the media root.
    pub fn output_dir(&self) -> &Path {
        &self.dir
    }

    /// Apply `change` under the write lock, then persist and notify.
    fn update<F>(&self, change: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut JobRecord) -> Result<bool, PipelineError>,
    {
        let snapshot = {
            let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
            if !change(&mut *record)? {
                return Ok(());
            }
            record.clone()
        };
        self.persist(&snapshot);
        // No subscribers is fine
        let _ = self.events.send(StatusUpdate::from(&snapshot));
        Ok(())
    }

    fn transition(
        record: &mut JobRecord,
        next: JobStatus,
    ) -> Result<(), PipelineError> {
        if !record.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: record.status,
                to: next,
            });
        }
        record.status = next;
        Ok(())
    }

    /// pending -> processing, progress 0.
    pub fn start(&self) -> Result<(), PipelineError> {
        self.update(|record| {
            Self::transition(record, JobStatus::Processing)?;
            record.progress = 0;
            Ok(true)
        })
    }

    /// Raise progress. Lower values are ignored and 100 is reserved for `done`.
    pub fn set_progress(&self, progress: u8) {
        let _ = self.update(|record| {
            let next = progress.min(99);
            if record.status != JobStatus::Processing || next <= record.progress {
                return Ok(false);
            }
            record.progress = next;
            Ok(true)
        });
    }

    /// processing -> done with the final output map.
    pub fn complete(&self, outputs: OutputMap) -> Result<(), PipelineError> {
        self.update(|record| {
            Self::transition(record, JobStatus::Done)?;
            record.outputs = outputs;
            record.progress = 100;
            record.error = None;
            Ok(true)
        })
    }

    /// Any non-terminal state -> failed. Outputs are cleared.
    pub fn fail(&self, message: impl Into<String>) -> Result<(), PipelineError> {
        let message = message.into();
        self.update(|record| {
            Self::transition(record, JobStatus::Failed)?;
            record.error = Some(message);
            record.outputs.clear();
            Ok(true)
        })
    }

    fn persist(&self, record: &JobRecord) {
        let path = self.dir.join(RECORD_FILE);
        let result = serde_json::to_string_pretty(record)
            .map_err(anyhow::Error::from)
            .and_then(|content| fs::write(&path, content).map_err(anyhow::Error::from));
        if let Err(e) = result {
            tracing::warn!("Failed to write {}: {}", path.display(), e);
        }
    }
}

/// All jobs known to this process.
pub struct JobRegistry {
    media_root: PathBuf,
    next_id: AtomicU64,
    jobs: RwLock<HashMap<u64, Arc<JobHandle>>>,
}

impl JobRegistry {
    /// Open the registry under `media_root`, reloading earlier jobs. Jobs that
    /// were still running when the process stopped are marked failed.
    pub fn load(media_root: &Path) -> Result<Self> {
        let outputs_root = media_root.join(OUTPUTS_DIR);
        fs::create_dir_all(&outputs_root)
            .with_context(|| format!("Failed to create {}", outputs_root.display()))?;

        let mut jobs = HashMap::new();
        let mut max_id = 0;
        for entry in WalkDir::new(&outputs_root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() == RECORD_FILE)
        {
            let content = fs::read_to_string(entry.path())?;
            let record: JobRecord = match serde_json::from_str(&content) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping unreadable {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let dir = outputs_root.join(record.id.to_string());
            max_id = max_id.max(record.id);

            let interrupted = !record.status.is_terminal();
            let id = record.id;
            let handle = Arc::new(JobHandle::new(record, dir));
            if interrupted {
                tracing::warn!("Job {} was interrupted by a restart", id);
                handle.update(|record| {
                    record.status = JobStatus::Failed;
                    record.error = Some("interrupted by restart".to_string());
                    record.outputs.clear();
                    Ok(true)
                })?;
            }
            jobs.insert(id, handle);
        }

        tracing::info!("Loaded {} jobs from {}", jobs.len(), outputs_root.display());
        Ok(Self {
            media_root: media_root.to_path_buf(),
            next_id: AtomicU64::new(max_id + 1),
            jobs: RwLock::new(jobs),
        })
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// Register a new pending job for an accepted upload.
    pub fn create(&self, original: PathBuf, produce: BTreeSet<Product>) -> Result<Arc<JobHandle>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let dir = self.media_root.join(OUTPUTS_DIR).join(id.to_string());
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let record = JobRecord {
            id,
            status: JobStatus::Pending,
            produce,
            outputs: OutputMap::new(),
            error: None,
            progress: 0,
            created_at: Utc::now(),
            original,
        };
        let handle = Arc::new(JobHandle::new(record.clone(), dir));
        handle.persist(&record);

        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle.clone());
        tracing::info!("Created job {}", id);
        Ok(handle)
    }

    pub fn get(&self, id: u64) -> Option<Arc<JobHandle>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Forget a job. Its files are left to the caller.
    pub fn remove(&self, id: u64) -> Option<Arc<JobHandle>> {
        let removed = self
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            tracing::info!("Removed job {}", id);
        }
        removed
    }

    /// Snapshots of every job, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|h| h.snapshot())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }
}
