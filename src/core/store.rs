//! Append-only recording store with file-based persistence.
//!
//! Each recording owns a directory containing an `events.jsonl` log; current
//! state is derived by replaying the log. Appends flush before returning, so
//! a crash mid-step leaves the recording observable in its last durable
//! state. An in-process claim registry serializes advancement per recording.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Recording, RecordingEvent, RecordingEventKind};

/// Errors from the recording store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Recording not found: {0}")]
    NotFound(Uuid),

    #[error("Recording {0} is already being advanced by another worker")]
    Claimed(Uuid),

    #[error("Corrupt event log for {id}: {detail}")]
    Corrupt { id: Uuid, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// File-based recording store using one JSONL event log per recording
#[derive(Clone)]
pub struct RecordingStore {
    /// Directory containing one subdirectory per recording
    root: PathBuf,

    /// Recording ids currently claimed by a worker in this process
    claims: Arc<Mutex<HashSet<Uuid>>>,
}

impl RecordingStore {
    /// Create a store rooted at the given directory
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Open the store at the configured default location
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::recordings_dir()?))
    }

    fn events_path(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string()).join("events.jsonl")
    }

    /// Register a new submission and return the initial recording state
    pub async fn submit(
        &self,
        tenant_id: String,
        audio_path: PathBuf,
        audio_size: u64,
        content_hash: String,
        entity_hint: Option<String>,
    ) -> Result<Recording, StoreError> {
        let id = Uuid::new_v4();
        let event = RecordingEvent::new(
            id,
            RecordingEventKind::Submitted {
                tenant_id,
                audio_path,
                audio_size,
                content_hash,
                entity_hint,
            },
        );

        self.append(&event).await?;
        self.get(id).await
    }

    /// Append an event to a recording's log, flushing before return
    pub async fn append(&self, event: &RecordingEvent) -> Result<(), StoreError> {
        let path = self.events_path(event.recording_id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events for a recording in order
    pub async fn replay(&self, id: Uuid) -> Result<Vec<RecordingEvent>, StoreError> {
        let path = self.events_path(id);

        if !path.exists() {
            return Err(StoreError::NotFound(id));
        }

        let file = File::open(&path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: RecordingEvent =
                serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                    id,
                    detail: e.to_string(),
                })?;
            events.push(event);
        }

        Ok(events)
    }

    /// Get the current state of a recording by replaying its log
    pub async fn get(&self, id: Uuid) -> Result<Recording, StoreError> {
        let events = self.replay(id).await?;

        Recording::from_events(&events).ok_or(StoreError::Corrupt {
            id,
            detail: "log does not start with a submitted event".to_string(),
        })
    }

    /// List all recordings, most recently created first
    pub async fn list(&self) -> Result<Vec<Recording>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut recordings = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(&name) else {
                continue;
            };
            if let Ok(recording) = self.get(id).await {
                recordings.push(recording);
            }
        }

        recordings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(recordings)
    }

    /// Take the single-writer claim for a recording.
    ///
    /// The claim is released when the returned guard drops. A second claim
    /// while one is outstanding fails with `StoreError::Claimed`, which is
    /// how concurrent workers are kept off the same recording.
    pub fn claim(&self, id: Uuid) -> Result<Claim, StoreError> {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());

        if !claims.insert(id) {
            return Err(StoreError::Claimed(id));
        }

        Ok(Claim {
            id,
            claims: Arc::clone(&self.claims),
        })
    }

    /// The directory this store is rooted at
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// RAII guard for the per-recording advancement claim
pub struct Claim {
    id: Uuid,
    claims: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims.remove(&self.id);
    }
}
