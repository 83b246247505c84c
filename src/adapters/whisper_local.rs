//! Local whisper transcription backend.
//!
//! Shells out to a local whisper binary and parses its JSON output. Useful
//! where audio must not leave the machine, at the cost of local model setup.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use super::Transcriber;
use crate::domain::{Confidence, Transcript};

/// Transcriber backed by a local whisper binary
pub struct LocalWhisper {
    /// Path to the whisper binary
    binary_path: String,

    /// Model name passed to the binary (e.g. "base", "small")
    model: String,
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    avg_logprob: f64,
}

impl LocalWhisper {
    pub fn new(binary_path: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
        }
    }

    /// Run the whisper binary over an audio file already on disk
    async fn run_whisper(&self, audio_path: &Path, step_timeout: Duration) -> Result<WhisperOutput> {
        let out_dir = tempfile::tempdir().context("Failed to create whisper output dir")?;

        let child = Command::new(&self.binary_path)
            .arg(audio_path)
            .args(["--model", &self.model])
            .arg("--output_dir")
            .arg(out_dir.path())
            .args(["--output_format", "json"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn whisper binary '{}'", self.binary_path))?;

        let output = timeout(step_timeout, child.wait_with_output())
            .await
            .with_context(|| format!("Whisper timed out after {:?}", step_timeout))?
            .context("Failed to wait for whisper process")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Whisper failed: {}", stderr.trim());
        }

        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = out_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .context("Failed to read whisper output")?;

        serde_json::from_str(&json_content).context("Failed to parse whisper JSON")
    }
}

#[async_trait]
impl Transcriber for LocalWhisper {
    fn name(&self) -> &str {
        "whisper-local"
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
        timeout: Duration,
    ) -> Result<Transcript> {
        // The binary wants a file; stage the bytes under the original name
        // so it can infer the container format.
        let staging = tempfile::tempdir().context("Failed to create staging dir")?;
        let audio_path = staging.path().join(file_name);
        tokio::fs::write(&audio_path, audio)
            .await
            .context("Failed to stage audio for whisper")?;

        let output = self.run_whisper(&audio_path, timeout).await?;

        let text = output.text.trim().to_string();
        if text.is_empty() {
            anyhow::bail!("Whisper produced an empty transcript");
        }

        Ok(Transcript {
            confidence: grade_confidence(&output.segments),
            text,
        })
    }
}

/// Grade transcript confidence from segment average log-probabilities
fn grade_confidence(segments: &[WhisperSegment]) -> Confidence {
    if segments.is_empty() {
        return Confidence::Low;
    }

    let mean: f64 =
        segments.iter().map(|s| s.avg_logprob).sum::<f64>() / segments.len() as f64;

    if mean > -0.3 {
        Confidence::High
    } else if mean > -0.7 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}
