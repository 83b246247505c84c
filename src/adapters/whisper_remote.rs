//! Remote transcription backend for OpenAI-compatible APIs.
//!
//! Talks to `/v1/audio/transcriptions`-shaped endpoints (OpenAI, Groq and
//! others share the contract): multipart upload with `model` and `file`
//! fields, bearer auth, JSON response with a `text` field.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{body_snippet, Transcriber};
use crate::domain::{Confidence, Transcript};

/// Transcriber backed by an OpenAI-compatible transcription API
pub struct RemoteWhisper {
    /// Full endpoint URL (e.g. "https://api.openai.com/v1/audio/transcriptions")
    api_url: String,

    /// Model name (e.g. "whisper-1")
    model: String,

    /// Bearer token
    api_key: String,

    /// HTTP client
    client: reqwest::Client,
}

/// Response structure shared by OpenAI-compatible transcription APIs
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl RemoteWhisper {
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn mime_for(file_name: &str) -> &'static str {
        match file_name.rsplit('.').next() {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("ogg") => "audio/ogg",
            Some("flac") => "audio/flac",
            _ => "audio/mp4",
        }
    }
}

#[async_trait]
impl Transcriber for RemoteWhisper {
    fn name(&self) -> &str {
        "whisper-remote"
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
        timeout: Duration,
    ) -> Result<Transcript> {
        let file_part = Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str(Self::mime_for(file_name))?;

        let form = Form::new()
            .text("model", self.model.clone())
            .part("file", file_part);

        let response = self
            .client
            .post(&self.api_url)
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .context("Failed to reach transcription API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Transcription API error ({}): {}",
                status,
                body_snippet(&body)
            );
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;

        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            anyhow::bail!("Transcription API returned an empty transcript");
        }

        Ok(Transcript {
            text,
            // The API reports no usable confidence signal; grade
            // conservatively and let extraction judge the content.
            confidence: Confidence::Medium,
        })
    }
}
