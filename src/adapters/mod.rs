//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the pipeline's three external
//! call sites: speech-to-text, structured-data extraction, and the CRM
//! write API. Each carries a bounded timeout supplied by the caller.

pub mod dynamics;
pub mod extractor;
pub mod token;
pub mod whisper_local;
pub mod whisper_remote;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

// Re-export the concrete adapters
pub use dynamics::DynamicsClient;
pub use extractor::ChatExtractor;
pub use token::TokenCache;
pub use whisper_local::LocalWhisper;
pub use whisper_remote::RemoteWhisper;

use crate::domain::{Extraction, SchemaMapping, TenantCredentials, Transcript};

/// Speech-to-text capability: audio bytes in, transcript out
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Transcribe an audio file's bytes.
    ///
    /// `file_name` carries the original name so backends can infer the
    /// container format from its extension.
    async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
        timeout: Duration,
    ) -> Result<Transcript>;
}

/// Structured-data extraction capability: transcript in, key/value mapping out
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Extract structured fields from a transcript.
    ///
    /// The tenant's schema mappings constrain the output contract; the
    /// entity hint, when present, biases detection but the extractor's
    /// detected entity type wins.
    async fn extract(
        &self,
        transcript: &str,
        entity_hint: Option<&str>,
        schemas: &[SchemaMapping],
        timeout: Duration,
    ) -> Result<Extraction>;
}

/// Write seam to the external CRM entity API
#[async_trait]
pub trait EntitySink: Send + Sync {
    fn name(&self) -> &str;

    /// Create a record in the given entity collection, returning its
    /// external identifier.
    ///
    /// `tenant_id` keys the token cache; credentials are resolved fresh by
    /// the caller for every attempt.
    async fn create_entity(
        &self,
        tenant_id: &str,
        credentials: &TenantCredentials,
        entity_set: &str,
        attributes: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<String, SinkError>;
}

/// Typed failures from the CRM seam.
///
/// Authentication problems are distinguished from remote rejections so the
/// orchestrator can store the right failure kind; both halt the run.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("Authentication failed: {detail}")]
    Auth { detail: String },

    #[error("Remote rejected the request ({status}): {body}")]
    Remote { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SinkError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Clamp a response body to a storable diagnostic fragment
pub(crate) fn body_snippet(body: &str) -> String {
    const MAX: usize = 500;

    if body.len() <= MAX {
        return body.to_string();
    }

    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_snippet_clamps_long_bodies() {
        let short = "not much";
        assert_eq!(body_snippet(short), short);

        let long = "x".repeat(2000);
        let snippet = body_snippet(&long);
        assert!(snippet.len() < long.len());
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_sink_error_auth_detection() {
        let auth = SinkError::Auth {
            detail: "bad secret".to_string(),
        };
        let remote = SinkError::Remote {
            status: 400,
            body: "{}".to_string(),
        };

        assert!(auth.is_auth());
        assert!(!remote.is_auth());
    }
}
