//! Event types for the recording event log.
//!
//! All state changes are recorded as immutable events in an append-only log.
//! The current state of a recording is reconstructed by replaying its events
//! in order; the orchestrator appends exactly one durable event per step.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::recording::{Confidence, FailureKind, RecordingStatus};
use super::schema::CrmPayload;

/// A single entry in a recording's append-only event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingEvent {
    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The recording this event belongs to
    pub recording_id: Uuid,

    /// What happened, with the step's artifact where one was produced
    #[serde(flatten)]
    pub kind: RecordingEventKind,
}

impl RecordingEvent {
    /// Create a new event with the current timestamp
    pub fn new(recording_id: Uuid, kind: RecordingEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            recording_id,
            kind,
        }
    }
}

/// Types of events that can occur during a recording's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum RecordingEventKind {
    /// A voice note was submitted (always the first event in a log)
    Submitted {
        tenant_id: String,
        audio_path: PathBuf,
        audio_size: u64,
        content_hash: String,
        entity_hint: Option<String>,
    },

    /// A step began; records the durable in-flight status
    /// (`transcribing`, `validating`, `syncing`)
    StepStarted { status: RecordingStatus },

    /// Transcription succeeded
    Transcribed { text: String, confidence: Confidence },

    /// Extraction succeeded
    Extracted {
        entity_type: String,
        confidence: Confidence,
        fields: Map<String, Value>,
    },

    /// Validation produced a CRM-ready payload
    Validated { payload: CrmPayload },

    /// The external record was created
    Synced { external_id: String },

    /// A step failed; halts the run with a typed cause
    Failed {
        kind: FailureKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<BTreeMap<String, String>>,
    },

    /// Explicit operator reset back to `uploaded`
    Reprocessed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip() {
        let event = RecordingEvent::new(
            Uuid::new_v4(),
            RecordingEventKind::Transcribed {
                text: "ear tag 1234".to_string(),
                confidence: Confidence::High,
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: RecordingEvent = serde_json::from_str(&json).unwrap();

        match parsed.kind {
            RecordingEventKind::Transcribed { text, confidence } => {
                assert_eq!(text, "ear tag 1234");
                assert_eq!(confidence, Confidence::High);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_event_tag_is_snake_case() {
        let event = RecordingEvent::new(
            Uuid::new_v4(),
            RecordingEventKind::StepStarted {
                status: RecordingStatus::Syncing,
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"step_started\""));
        assert!(json.contains("\"status\":\"syncing\""));
    }

    #[test]
    fn test_failed_event_carries_field_detail() {
        let mut fields = BTreeMap::new();
        fields.insert("ear_tag".to_string(), "required, not provided".to_string());

        let event = RecordingEvent::new(
            Uuid::new_v4(),
            RecordingEventKind::Failed {
                kind: FailureKind::ValidationFailed,
                message: "2 fields missing or invalid".to_string(),
                fields: Some(fields),
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: RecordingEvent = serde_json::from_str(&json).unwrap();
        match parsed.kind {
            RecordingEventKind::Failed { fields, .. } => {
                assert_eq!(
                    fields.unwrap().get("ear_tag").map(String::as_str),
                    Some("required, not provided")
                );
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
