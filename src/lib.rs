//! fieldnote - voice-note to farm-record pipeline
//!
//! Turns a spoken voice note into a validated record in an external
//! CRM-style farm-management system, one tenant at a time.
//!
//! # Architecture
//!
//! Each recording moves through a persisted state machine:
//!
//! ```text
//! uploaded -> transcribing -> transcribed -> processing
//!          -> validating -> syncing -> synced | error
//! ```
//!
//! - Every state change is recorded as an immutable event
//! - Current state is derived by replaying a recording's events
//! - A crash mid-step is observed as the last durable state and resumed
//!   from there; a terminal recording can be explicitly reprocessed
//!
//! # Modules
//!
//! - `adapters`: external engines (transcription, extraction, CRM)
//! - `core`: orchestration logic (RecordingStore, validation, Orchestrator)
//! - `domain`: data structures (Recording, events, schemas, credentials)
//! - `tenants`: per-tenant credential and schema-mapping lookup
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a voice note and run the pipeline
//! fieldnote submit note.m4a --tenant greenfields --process
//!
//! # Check a recording
//! fieldnote status <recording-id>
//!
//! # Re-run a failed recording after fixing the cause
//! fieldnote reprocess <recording-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod tenants;

// Re-export main types at crate root for convenience
pub use crate::core::{CommandError, Orchestrator, RecordingStore, StepTimeouts, StoreError};
pub use domain::{
    Confidence, CrmPayload, Extraction, FailureKind, PipelineFailure, Recording, RecordingEvent,
    RecordingEventKind, RecordingStatus, SchemaMapping, TenantCredentials, Transcript,
};
pub use tenants::{TenantDirectory, TenantError};

// Adapter seams
pub use adapters::{EntitySink, Extractor, SinkError, TokenCache, Transcriber};
