//! Domain types for the fieldnote pipeline.
//!
//! This module contains the core data structures:
//! - Recording: a voice-note submission and its pipeline state
//! - Events: immutable records of state changes
//! - Schema: per-tenant field mappings for the external CRM
//! - Tenant: per-tenant CRM credentials

pub mod events;
pub mod recording;
pub mod schema;
pub mod tenant;

// Re-export commonly used types
pub use events::{RecordingEvent, RecordingEventKind};
pub use recording::{
    Confidence, Extraction, FailureKind, PipelineFailure, Recording, RecordingStatus, StatusChange,
    Transcript,
};
pub use schema::{CrmPayload, FieldDef, FieldKind, SchemaMapping};
pub use tenant::TenantCredentials;
