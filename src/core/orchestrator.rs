//! Pipeline orchestrator for recordings.
//!
//! Drives one recording at a time through transcription, extraction,
//! validation and CRM sync. Every `advance` call performs exactly one step
//! for the recording's current state and appends one durable event before
//! returning, so a crash never loses more than the in-flight step. Failures
//! become stored, typed errors on the recording; they are not propagated as
//! Rust errors past this boundary.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::store::{RecordingStore, StoreError};
use super::validate;
use crate::adapters::{EntitySink, Extractor, SinkError, Transcriber};
use crate::domain::{FailureKind, Recording, RecordingEvent, RecordingEventKind, RecordingStatus};
use crate::tenants::{TenantDirectory, TenantError};

/// Bounded timeouts for the three external call sites
#[derive(Debug, Clone)]
pub struct StepTimeouts {
    pub transcription: Duration,
    pub extraction: Duration,
    pub sync: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            transcription: Duration::from_secs(300),
            extraction: Duration::from_secs(60),
            sync: Duration::from_secs(30),
        }
    }
}

/// Errors returned to callers of the orchestrator commands.
///
/// These are infrastructure and command errors only; pipeline step failures
/// are stored on the recording instead.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Recording not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid state: recording {id} is {status}")]
    InvalidState { id: Uuid, status: RecordingStatus },

    #[error("Recording {0} is already being advanced by another worker")]
    Busy(Uuid),

    #[error("Corrupt recording state: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The pipeline state machine
pub struct Orchestrator {
    store: RecordingStore,
    tenants: TenantDirectory,
    transcriber: Arc<dyn Transcriber>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn EntitySink>,
    timeouts: StepTimeouts,
}

impl Orchestrator {
    pub fn new(
        store: RecordingStore,
        tenants: TenantDirectory,
        transcriber: Arc<dyn Transcriber>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn EntitySink>,
        timeouts: StepTimeouts,
    ) -> Self {
        Self {
            store,
            tenants,
            transcriber,
            extractor,
            sink,
            timeouts,
        }
    }

    /// Perform exactly one pipeline step for the recording's current state.
    ///
    /// Holds the single-writer claim for the duration of the step. Returns
    /// the recording's state after the step, which is `error` when the step
    /// failed.
    #[instrument(skip(self), fields(recording = %id))]
    pub async fn advance(&self, id: Uuid) -> Result<Recording, CommandError> {
        let _claim = match self.store.claim(id) {
            Ok(claim) => claim,
            Err(StoreError::Claimed(_)) => return Err(CommandError::Busy(id)),
            Err(e) => return Err(e.into()),
        };

        let recording = self.load(id).await?;

        match recording.status {
            RecordingStatus::Uploaded | RecordingStatus::Transcribing => {
                self.step_transcribe(recording).await
            }
            RecordingStatus::Transcribed => self.step_extract(recording).await,
            RecordingStatus::Processing | RecordingStatus::Validating => {
                self.step_validate(recording).await
            }
            RecordingStatus::Syncing => self.step_sync(recording).await,
            RecordingStatus::Synced | RecordingStatus::Error => Err(CommandError::InvalidState {
                id,
                status: recording.status,
            }),
        }
    }

    /// Advance a recording until it reaches a terminal state
    #[instrument(skip(self), fields(recording = %id))]
    pub async fn process(&self, id: Uuid) -> Result<Recording, CommandError> {
        let mut recording = self.load(id).await?;

        while !recording.is_terminal() {
            recording = self.advance(id).await?;
        }

        Ok(recording)
    }

    /// Reset a terminal recording back to `uploaded` for a fresh run.
    ///
    /// Transcription and extraction deliberately re-run: a reprocess usually
    /// follows a corrected recording with different audio. Rejected with
    /// `InvalidState` while the recording is mid-pipeline.
    #[instrument(skip(self), fields(recording = %id))]
    pub async fn reprocess(&self, id: Uuid) -> Result<Recording, CommandError> {
        let _claim = match self.store.claim(id) {
            Ok(claim) => claim,
            Err(StoreError::Claimed(_)) => return Err(CommandError::Busy(id)),
            Err(e) => return Err(e.into()),
        };

        let recording = self.load(id).await?;

        if !recording.is_terminal() {
            return Err(CommandError::InvalidState {
                id,
                status: recording.status,
            });
        }

        self.store
            .append(&RecordingEvent::new(id, RecordingEventKind::Reprocessed))
            .await?;

        info!("Recording reset for reprocessing");

        self.load(id).await
    }

    /// Current state of a recording
    pub async fn status(&self, id: Uuid) -> Result<Recording, CommandError> {
        self.load(id).await
    }

    async fn load(&self, id: Uuid) -> Result<Recording, CommandError> {
        match self.store.get(id).await {
            Ok(recording) => Ok(recording),
            Err(StoreError::NotFound(_)) => Err(CommandError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// uploaded/transcribing -> transcribed
    async fn step_transcribe(&self, recording: Recording) -> Result<Recording, CommandError> {
        let id = recording.id;

        self.mark_started(id, RecordingStatus::Transcribing).await?;

        let audio = match tokio::fs::read(&recording.audio_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .fail(
                        id,
                        FailureKind::TranscriptionFailed,
                        format!(
                            "Could not read audio {}: {}",
                            recording.audio_path.display(),
                            e
                        ),
                        None,
                    )
                    .await;
            }
        };

        let file_name = recording
            .audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        info!(backend = self.transcriber.name(), "Transcribing audio");

        match self
            .transcriber
            .transcribe(&audio, &file_name, self.timeouts.transcription)
            .await
        {
            Ok(transcript) => {
                self.store
                    .append(&RecordingEvent::new(
                        id,
                        RecordingEventKind::Transcribed {
                            text: transcript.text,
                            confidence: transcript.confidence,
                        },
                    ))
                    .await?;
                info!("Transcription stored");
                self.load(id).await
            }
            Err(e) => {
                self.fail(
                    id,
                    FailureKind::TranscriptionFailed,
                    format!("Transcription failed: {:#}", e),
                    None,
                )
                .await
            }
        }
    }

    /// transcribed -> processing
    async fn step_extract(&self, recording: Recording) -> Result<Recording, CommandError> {
        let id = recording.id;

        let transcript = recording
            .transcript
            .as_ref()
            .ok_or_else(|| CommandError::Corrupt(format!("recording {} has no transcript", id)))?;

        let schemas = match self.tenants.schema_mappings(&recording.tenant_id).await {
            Ok(schemas) => schemas,
            Err(e) => {
                return self
                    .fail(
                        id,
                        FailureKind::ExtractionFailed,
                        format!("Could not load schema mappings: {}", e),
                        None,
                    )
                    .await;
            }
        };

        if schemas.is_empty() {
            return self
                .fail(
                    id,
                    FailureKind::ValidationFailed,
                    format!(
                        "No schema mappings configured for tenant {}",
                        recording.tenant_id
                    ),
                    None,
                )
                .await;
        }

        info!(backend = self.extractor.name(), "Extracting structured data");

        match self
            .extractor
            .extract(
                &transcript.text,
                recording.entity_hint.as_deref(),
                &schemas,
                self.timeouts.extraction,
            )
            .await
        {
            Ok(extraction) => {
                info!(entity_type = %extraction.entity_type, "Extraction stored");
                self.store
                    .append(&RecordingEvent::new(
                        id,
                        RecordingEventKind::Extracted {
                            entity_type: extraction.entity_type,
                            confidence: extraction.confidence,
                            fields: extraction.fields,
                        },
                    ))
                    .await?;
                self.load(id).await
            }
            Err(e) => {
                self.fail(
                    id,
                    FailureKind::ExtractionFailed,
                    format!("Extraction failed: {:#}", e),
                    None,
                )
                .await
            }
        }
    }

    /// processing/validating -> syncing
    async fn step_validate(&self, recording: Recording) -> Result<Recording, CommandError> {
        let id = recording.id;

        self.mark_started(id, RecordingStatus::Validating).await?;

        let extraction = recording
            .extraction
            .as_ref()
            .ok_or_else(|| CommandError::Corrupt(format!("recording {} has no extraction", id)))?;

        let schema = match self
            .tenants
            .schema_for(&recording.tenant_id, &extraction.entity_type)
            .await
        {
            Ok(schema) => schema,
            Err(e @ TenantError::SchemaNotFound { .. }) => {
                return self
                    .fail(id, FailureKind::ValidationFailed, e.to_string(), None)
                    .await;
            }
            Err(e) => {
                return self
                    .fail(
                        id,
                        FailureKind::ValidationFailed,
                        format!("Could not load schema mapping: {}", e),
                        None,
                    )
                    .await;
            }
        };

        match validate::validate(&extraction.fields, &schema) {
            Ok(payload) => {
                info!(entity_set = %payload.entity_set, "Validation passed");
                self.store
                    .append(&RecordingEvent::new(
                        id,
                        RecordingEventKind::Validated { payload },
                    ))
                    .await?;
                self.load(id).await
            }
            Err(errors) => {
                warn!(fields = errors.reasons.len(), "Validation failed");
                self.fail(
                    id,
                    FailureKind::ValidationFailed,
                    errors.render(),
                    Some(errors.reasons),
                )
                .await
            }
        }
    }

    /// syncing -> synced
    async fn step_sync(&self, recording: Recording) -> Result<Recording, CommandError> {
        let id = recording.id;

        let payload = recording
            .payload
            .as_ref()
            .ok_or_else(|| CommandError::Corrupt(format!("recording {} has no payload", id)))?;

        // Credentials are resolved fresh on every attempt so a rotation by
        // an administrator takes effect immediately.
        let credentials = match self.tenants.resolve_credentials(&recording.tenant_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                return self
                    .fail(
                        id,
                        FailureKind::AuthFailed,
                        format!("Could not resolve tenant credentials: {}", e),
                        None,
                    )
                    .await;
            }
        };

        info!(backend = self.sink.name(), entity_set = %payload.entity_set, "Syncing to CRM");

        match self
            .sink
            .create_entity(
                &recording.tenant_id,
                &credentials,
                &payload.entity_set,
                &payload.attributes,
                self.timeouts.sync,
            )
            .await
        {
            Ok(external_id) => {
                info!(%external_id, "Synced to CRM");
                self.store
                    .append(&RecordingEvent::new(
                        id,
                        RecordingEventKind::Synced { external_id },
                    ))
                    .await?;
                self.load(id).await
            }
            Err(e) => {
                let kind = Self::classify_sink_error(&e);
                self.fail(id, kind, e.to_string(), None).await
            }
        }
    }

    /// Append the durable in-flight marker for a step
    async fn mark_started(
        &self,
        id: Uuid,
        status: RecordingStatus,
    ) -> Result<(), CommandError> {
        self.store
            .append(&RecordingEvent::new(
                id,
                RecordingEventKind::StepStarted { status },
            ))
            .await?;
        Ok(())
    }

    /// Record a step failure and return the halted recording
    async fn fail(
        &self,
        id: Uuid,
        kind: FailureKind,
        message: String,
        fields: Option<std::collections::BTreeMap<String, String>>,
    ) -> Result<Recording, CommandError> {
        error!(%kind, %message, "Pipeline step failed");

        self.store
            .append(&RecordingEvent::new(
                id,
                RecordingEventKind::Failed {
                    kind,
                    message,
                    fields,
                },
            ))
            .await?;

        self.load(id).await
    }

    /// Sink errors map onto the failure taxonomy; exposed for collaborators
    /// that surface sink problems outside a pipeline run.
    pub fn classify_sink_error(error: &SinkError) -> FailureKind {
        if error.is_auth() {
            FailureKind::AuthFailed
        } else {
            FailureKind::SyncFailed
        }
    }
}
