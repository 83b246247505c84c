//! Recording state and reconstruction from events.
//!
//! A Recording represents one voice-note submission moving through the
//! pipeline. Its current state is derived by replaying the events in its log.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::events::{RecordingEvent, RecordingEventKind};
use super::schema::CrmPayload;

/// Pipeline status of a recording.
///
/// Transitions are monotonic along the pipeline except for the explicit
/// reprocess reset back to `Uploaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    /// Audio stored, nothing processed yet (also the reprocess re-entry point)
    Uploaded,

    /// Transcription call in flight
    Transcribing,

    /// Transcript stored
    Transcribed,

    /// Structured data extracted
    Processing,

    /// Validation against the tenant schema in flight
    Validating,

    /// CRM-ready payload stored, write call pending or in flight
    Syncing,

    /// External record created (terminal success)
    Synced,

    /// Pipeline halted with a stored failure (terminal)
    Error,
}

impl RecordingStatus {
    /// Terminal states accept no further `advance` calls
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Synced | Self::Error)
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uploaded => "uploaded",
            Self::Transcribing => "transcribing",
            Self::Transcribed => "transcribed",
            Self::Processing => "processing",
            Self::Validating => "validating",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        };
        f.pad(s)
    }
}

/// Failure taxonomy for a halted pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TranscriptionFailed,
    ExtractionFailed,
    ValidationFailed,
    AuthFailed,
    SyncFailed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TranscriptionFailed => "transcription_failed",
            Self::ExtractionFailed => "extraction_failed",
            Self::ValidationFailed => "validation_failed",
            Self::AuthFailed => "auth_failed",
            Self::SyncFailed => "sync_failed",
        };
        f.pad(s)
    }
}

/// A stored, typed pipeline failure.
///
/// Failures are never thrown past the orchestrator; collaborators read this
/// from the recording instead of catching errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub kind: FailureKind,

    /// Human-readable detail, always non-empty
    pub message: String,

    /// Field name -> reason, present for `ValidationFailed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

/// Confidence grade reported by the transcription and extraction engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Low
    }
}

/// Transcript produced by a Transcriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: Confidence,
}

/// Structured key/value data produced by an Extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Detected entity type (e.g. "animal")
    pub entity_type: String,

    pub confidence: Confidence,

    /// Extracted canonical field -> raw value
    pub fields: Map<String, Value>,
}

/// One status transition, kept for the full history of a recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: RecordingStatus,
    pub at: DateTime<Utc>,
}

/// A voice-note submission and everything the pipeline has produced for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,

    pub tenant_id: String,

    /// Opaque handle to the raw audio (a path under the storage layer)
    pub audio_path: PathBuf,

    pub audio_size: u64,

    /// SHA-256 of the audio content (first 12 hex chars), for diagnostics
    pub content_hash: String,

    /// Entity-type hint supplied at submission (e.g. "animal")
    pub entity_hint: Option<String>,

    pub status: RecordingStatus,

    pub transcript: Option<Transcript>,

    pub extraction: Option<Extraction>,

    /// Validated, externally-addressed payload (present from `Syncing` on)
    pub payload: Option<CrmPayload>,

    /// Identifier of the created external record (present iff `Synced`)
    pub external_id: Option<String>,

    /// Last failure (present iff `Error`)
    pub failure: Option<PipelineFailure>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// When the recording reached `Synced`
    pub processed_at: Option<DateTime<Utc>>,

    /// Every status transition in order, including reprocess resets
    pub transitions: Vec<StatusChange>,
}

impl Recording {
    /// Reconstruct recording state from its event log.
    ///
    /// Returns `None` when the log is empty or does not start with a
    /// `Submitted` event.
    pub fn from_events(events: &[RecordingEvent]) -> Option<Self> {
        let first = events.first()?;
        let RecordingEventKind::Submitted {
            ref tenant_id,
            ref audio_path,
            audio_size,
            ref content_hash,
            ref entity_hint,
        } = first.kind
        else {
            return None;
        };

        let mut recording = Self {
            id: first.recording_id,
            tenant_id: tenant_id.clone(),
            audio_path: audio_path.clone(),
            audio_size,
            content_hash: content_hash.clone(),
            entity_hint: entity_hint.clone(),
            status: RecordingStatus::Uploaded,
            transcript: None,
            extraction: None,
            payload: None,
            external_id: None,
            failure: None,
            created_at: first.timestamp,
            updated_at: first.timestamp,
            processed_at: None,
            transitions: vec![StatusChange {
                status: RecordingStatus::Uploaded,
                at: first.timestamp,
            }],
        };

        for event in &events[1..] {
            recording.apply_event(event);
        }

        Some(recording)
    }

    /// Apply a single event to update recording state
    pub fn apply_event(&mut self, event: &RecordingEvent) {
        self.updated_at = event.timestamp;

        match &event.kind {
            RecordingEventKind::Submitted { .. } => {
                // Only valid as the first event; ignored on replay otherwise
            }
            RecordingEventKind::StepStarted { status } => {
                self.set_status(*status, event.timestamp);
            }
            RecordingEventKind::Transcribed { text, confidence } => {
                self.transcript = Some(Transcript {
                    text: text.clone(),
                    confidence: *confidence,
                });
                self.set_status(RecordingStatus::Transcribed, event.timestamp);
            }
            RecordingEventKind::Extracted {
                entity_type,
                confidence,
                fields,
            } => {
                self.extraction = Some(Extraction {
                    entity_type: entity_type.clone(),
                    confidence: *confidence,
                    fields: fields.clone(),
                });
                self.set_status(RecordingStatus::Processing, event.timestamp);
            }
            RecordingEventKind::Validated { payload } => {
                self.payload = Some(payload.clone());
                self.set_status(RecordingStatus::Syncing, event.timestamp);
            }
            RecordingEventKind::Synced { external_id } => {
                self.external_id = Some(external_id.clone());
                self.processed_at = Some(event.timestamp);
                self.set_status(RecordingStatus::Synced, event.timestamp);
            }
            RecordingEventKind::Failed {
                kind,
                message,
                fields,
            } => {
                self.failure = Some(PipelineFailure {
                    kind: *kind,
                    message: message.clone(),
                    fields: fields.clone(),
                });
                self.set_status(RecordingStatus::Error, event.timestamp);
            }
            RecordingEventKind::Reprocessed => {
                self.transcript = None;
                self.extraction = None;
                self.payload = None;
                self.external_id = None;
                self.failure = None;
                self.processed_at = None;
                self.set_status(RecordingStatus::Uploaded, event.timestamp);
            }
        }
    }

    fn set_status(&mut self, status: RecordingStatus, at: DateTime<Utc>) {
        self.status = status;
        self.transitions.push(StatusChange { status, at });
    }

    /// Check if the recording is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitted(id: Uuid) -> RecordingEvent {
        RecordingEvent::new(
            id,
            RecordingEventKind::Submitted {
                tenant_id: "greenfields".to_string(),
                audio_path: PathBuf::from("/tmp/note.m4a"),
                audio_size: 2048,
                content_hash: "ab12cd34ef56".to_string(),
                entity_hint: Some("animal".to_string()),
            },
        )
    }

    #[test]
    fn test_replay_fresh_submission() {
        let id = Uuid::new_v4();
        let recording = Recording::from_events(&[submitted(id)]).unwrap();

        assert_eq!(recording.id, id);
        assert_eq!(recording.status, RecordingStatus::Uploaded);
        assert!(recording.transcript.is_none());
        assert!(recording.failure.is_none());
        assert_eq!(recording.transitions.len(), 1);
    }

    #[test]
    fn test_replay_through_transcription() {
        let id = Uuid::new_v4();
        let events = vec![
            submitted(id),
            RecordingEvent::new(
                id,
                RecordingEventKind::StepStarted {
                    status: RecordingStatus::Transcribing,
                },
            ),
            RecordingEvent::new(
                id,
                RecordingEventKind::Transcribed {
                    text: "Add a new heifer, ear tag 1234".to_string(),
                    confidence: Confidence::High,
                },
            ),
        ];

        let recording = Recording::from_events(&events).unwrap();
        assert_eq!(recording.status, RecordingStatus::Transcribed);
        assert_eq!(
            recording.transcript.as_ref().unwrap().text,
            "Add a new heifer, ear tag 1234"
        );
    }

    #[test]
    fn test_replay_failure_sets_error() {
        let id = Uuid::new_v4();
        let events = vec![
            submitted(id),
            RecordingEvent::new(
                id,
                RecordingEventKind::Failed {
                    kind: FailureKind::TranscriptionFailed,
                    message: "backend unavailable".to_string(),
                    fields: None,
                },
            ),
        ];

        let recording = Recording::from_events(&events).unwrap();
        assert_eq!(recording.status, RecordingStatus::Error);
        let failure = recording.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::TranscriptionFailed);
        assert_eq!(failure.message, "backend unavailable");
    }

    #[test]
    fn test_reprocess_clears_artifacts() {
        let id = Uuid::new_v4();
        let events = vec![
            submitted(id),
            RecordingEvent::new(
                id,
                RecordingEventKind::Transcribed {
                    text: "New cow".to_string(),
                    confidence: Confidence::Low,
                },
            ),
            RecordingEvent::new(
                id,
                RecordingEventKind::Failed {
                    kind: FailureKind::ValidationFailed,
                    message: "missing fields".to_string(),
                    fields: None,
                },
            ),
            RecordingEvent::new(id, RecordingEventKind::Reprocessed),
        ];

        let recording = Recording::from_events(&events).unwrap();
        assert_eq!(recording.status, RecordingStatus::Uploaded);
        assert!(recording.transcript.is_none());
        assert!(recording.failure.is_none());
        assert!(recording.external_id.is_none());
    }

    #[test]
    fn test_replay_requires_submitted_first() {
        let id = Uuid::new_v4();
        let events = vec![RecordingEvent::new(id, RecordingEventKind::Reprocessed)];
        assert!(Recording::from_events(&events).is_none());
        assert!(Recording::from_events(&[]).is_none());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RecordingStatus::Transcribing).unwrap();
        assert_eq!(json, "\"transcribing\"");

        let parsed: RecordingStatus = serde_json::from_str("\"synced\"").unwrap();
        assert_eq!(parsed, RecordingStatus::Synced);
    }
}
