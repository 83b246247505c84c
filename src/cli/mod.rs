//! Command-line interface for fieldnote.
//!
//! Provides commands for submitting voice notes, advancing them through the
//! pipeline, inspecting status, and reprocessing terminal recordings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::adapters::{
    ChatExtractor, DynamicsClient, EntitySink, Extractor, LocalWhisper, RemoteWhisper, Transcriber,
};
use crate::config::{self, TranscriptionMode};
use crate::core::{CommandError, Orchestrator, RecordingStore};
use crate::domain::{Recording, RecordingStatus};
use crate::tenants::TenantDirectory;

/// fieldnote - voice-note to farm-record pipeline
#[derive(Parser, Debug)]
#[command(name = "fieldnote")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a voice note for a tenant
    Submit {
        /// Path to the audio file
        audio: PathBuf,

        /// Tenant the note belongs to
        #[arg(short, long)]
        tenant: String,

        /// Entity-type hint (e.g. "animal")
        #[arg(long)]
        hint: Option<String>,

        /// Run the pipeline to completion after submitting
        #[arg(long)]
        process: bool,
    },

    /// Run a recording's pipeline to a terminal state
    Process {
        /// Recording ID (omit with --all)
        recording_id: Option<String>,

        /// Process every recording that is not yet terminal
        #[arg(long)]
        all: bool,
    },

    /// Show the status of a recording
    Status {
        /// Recording ID
        recording_id: String,
    },

    /// List recordings, most recent first
    List {
        /// Maximum number of recordings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Reset a synced or failed recording back to uploaded
    Reprocess {
        /// Recording ID
        recording_id: String,
    },

    /// Fetch a synced recording's record back from the CRM
    Verify {
        /// Recording ID
        recording_id: String,

        /// Attributes to select (comma-separated)
        #[arg(long)]
        select: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                audio,
                tenant,
                hint,
                process,
            } => submit(&audio, &tenant, hint, process).await,
            Commands::Process { recording_id, all } => process_command(recording_id, all).await,
            Commands::Status { recording_id } => show_status(&recording_id).await,
            Commands::List { limit } => list_recordings(limit).await,
            Commands::Reprocess { recording_id } => reprocess(&recording_id).await,
            Commands::Verify {
                recording_id,
                select,
            } => verify(&recording_id, select.as_deref()).await,
            Commands::Config => show_config(),
        }
    }
}

/// Wire the orchestrator from the resolved configuration
fn build_orchestrator() -> Result<(Orchestrator, RecordingStore)> {
    let cfg = config::config()?;

    let store = RecordingStore::open_default()?;
    let tenants = TenantDirectory::open_default()?;

    let transcriber: Arc<dyn Transcriber> = match cfg.transcription.mode {
        TranscriptionMode::Local => Arc::new(LocalWhisper::new(
            cfg.transcription.binary_path.clone(),
            cfg.transcription.local_model.clone(),
        )),
        TranscriptionMode::Remote => Arc::new(RemoteWhisper::new(
            cfg.transcription.api_url.clone(),
            cfg.transcription.model.clone(),
            cfg.transcription.api_key.clone(),
        )),
    };

    let extractor: Arc<dyn Extractor> = Arc::new(ChatExtractor::new(
        cfg.extraction.api_url.clone(),
        cfg.extraction.model.clone(),
        cfg.extraction.api_key.clone(),
        cfg.extraction.temperature,
    ));

    let sink: Arc<dyn EntitySink> = Arc::new(DynamicsClient::new(cfg.sync.token_margin));

    let orchestrator = Orchestrator::new(
        store.clone(),
        tenants,
        transcriber,
        extractor,
        sink,
        cfg.timeouts.step_timeouts(),
    );

    Ok((orchestrator, store))
}

/// Submit a voice note: stage the audio under the fieldnote home and
/// register the recording
async fn submit(audio: &PathBuf, tenant: &str, hint: Option<String>, run: bool) -> Result<()> {
    let (orchestrator, store) = build_orchestrator()?;

    let bytes = tokio::fs::read(audio)
        .await
        .with_context(|| format!("Failed to read audio file: {}", audio.display()))?;

    if bytes.is_empty() {
        anyhow::bail!("Audio file is empty: {}", audio.display());
    }

    let hash = content_hash(&bytes);
    let file_name = audio
        .file_name()
        .context("Audio path has no file name")?
        .to_string_lossy()
        .to_string();

    let audio_dir = config::audio_dir()?;
    tokio::fs::create_dir_all(&audio_dir).await?;
    let staged = audio_dir.join(format!("{}_{}", hash, file_name));
    tokio::fs::write(&staged, &bytes)
        .await
        .with_context(|| format!("Failed to stage audio: {}", staged.display()))?;

    let recording = store
        .submit(
            tenant.to_string(),
            staged,
            bytes.len() as u64,
            hash,
            hint,
        )
        .await?;

    println!("Submitted recording {}", recording.id);

    if run {
        let finished = orchestrator.process(recording.id).await?;
        print_outcome(&finished);
    }

    Ok(())
}

/// Process one recording, or everything that is not yet terminal
async fn process_command(recording_id: Option<String>, all: bool) -> Result<()> {
    let (orchestrator, store) = build_orchestrator()?;

    if all {
        let pending: Vec<Recording> = store
            .list()
            .await?
            .into_iter()
            .filter(|r| !r.is_terminal())
            .collect();

        if pending.is_empty() {
            println!("Nothing to process");
            return Ok(());
        }

        let mut failed = 0usize;
        for recording in &pending {
            let finished = orchestrator.process(recording.id).await?;
            print_outcome(&finished);
            if finished.status == RecordingStatus::Error {
                failed += 1;
            }
        }

        println!("\nProcessed {} recording(s), {} failed", pending.len(), failed);
        return Ok(());
    }

    let id = parse_id(recording_id.as_deref().context("Provide a recording ID or --all")?)?;
    let finished = orchestrator.process(id).await?;
    print_outcome(&finished);

    if finished.status == RecordingStatus::Error {
        std::process::exit(1);
    }

    Ok(())
}

/// Show the status of a recording
async fn show_status(recording_id: &str) -> Result<()> {
    let (orchestrator, _store) = build_orchestrator()?;
    let id = parse_id(recording_id)?;

    let recording = match orchestrator.status(id).await {
        Ok(recording) => recording,
        Err(CommandError::NotFound(_)) => anyhow::bail!("Recording not found: {}", id),
        Err(e) => return Err(e.into()),
    };

    println!("Recording: {}", recording.id);
    println!("Tenant: {}", recording.tenant_id);
    println!("Status: {}", recording.status);
    println!(
        "Audio: {} ({} bytes, sha256 {})",
        recording.audio_path.display(),
        recording.audio_size,
        recording.content_hash
    );
    if let Some(hint) = &recording.entity_hint {
        println!("Hint: {}", hint);
    }
    println!("Created: {}", recording.created_at);

    if let Some(transcript) = &recording.transcript {
        println!(
            "\nTranscript ({:?} confidence):\n  {}",
            transcript.confidence, transcript.text
        );
    }

    if let Some(extraction) = &recording.extraction {
        println!(
            "\nExtracted ({}, {:?} confidence):",
            extraction.entity_type, extraction.confidence
        );
        for (field, value) in &extraction.fields {
            println!("  {}: {}", field, value);
        }
    }

    if let Some(external_id) = &recording.external_id {
        println!("\nExternal record: {}", external_id);
    }

    if let Some(failure) = &recording.failure {
        println!("\nError ({}): {}", failure.kind, failure.message);
        if let Some(fields) = &failure.fields {
            for (field, reason) in fields {
                println!("  {}: {}", field, reason);
            }
        }
    }

    println!("\nTransitions:");
    for change in &recording.transitions {
        println!("  {} -> {}", change.at, change.status);
    }

    Ok(())
}

/// List recordings
async fn list_recordings(limit: usize) -> Result<()> {
    let (_orchestrator, store) = build_orchestrator()?;

    let recordings = store.list().await?;

    if recordings.is_empty() {
        println!("No recordings yet");
        return Ok(());
    }

    for recording in recordings.iter().take(limit) {
        let note = match (&recording.external_id, &recording.failure) {
            (Some(external_id), _) => format!("-> {}", external_id),
            (None, Some(failure)) => format!("({})", failure.kind),
            _ => String::new(),
        };

        println!(
            "{}  {:12}  {:12}  {}  {}",
            recording.id, recording.tenant_id, recording.status, recording.created_at, note
        );
    }

    Ok(())
}

/// Reset a terminal recording back to uploaded
async fn reprocess(recording_id: &str) -> Result<()> {
    let (orchestrator, _store) = build_orchestrator()?;
    let id = parse_id(recording_id)?;

    match orchestrator.reprocess(id).await {
        Ok(recording) => {
            println!("Recording {} reset to {}", recording.id, recording.status);
            Ok(())
        }
        Err(CommandError::NotFound(_)) => anyhow::bail!("Recording not found: {}", id),
        Err(CommandError::InvalidState { status, .. }) => anyhow::bail!(
            "Recording is {} (mid-pipeline); only synced or error recordings can be reprocessed",
            status
        ),
        Err(e) => Err(e.into()),
    }
}

/// Fetch the external record a synced recording created
async fn verify(recording_id: &str, select: Option<&str>) -> Result<()> {
    let cfg = config::config()?;
    let (orchestrator, _store) = build_orchestrator()?;
    let id = parse_id(recording_id)?;

    let recording = orchestrator.status(id).await?;

    let external_id = recording
        .external_id
        .as_deref()
        .context("Recording has no external record yet (not synced)")?;
    let payload = recording
        .payload
        .as_ref()
        .context("Recording has no stored payload")?;

    let tenants = TenantDirectory::open_default()?;
    let credentials = tenants.resolve_credentials(&recording.tenant_id).await?;

    let selected: Option<Vec<&str>> = select.map(|s| s.split(',').map(str::trim).collect());

    let client = DynamicsClient::new(cfg.sync.token_margin);
    let record = client
        .get_entity(
            &recording.tenant_id,
            &credentials,
            &payload.entity_set,
            external_id,
            selected.as_deref(),
            cfg.timeouts.sync,
        )
        .await
        .map_err(|e| anyhow::anyhow!("CRM read failed: {}", e))?;

    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Home: {}", cfg.home.display());
    match &cfg.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none, defaults)"),
    }
    println!("Transcription mode: {:?}", cfg.transcription.mode);
    println!("Transcription model: {}", cfg.transcription.model);
    println!("Extraction model: {}", cfg.extraction.model);
    println!("Token margin: {:?}", cfg.sync.token_margin);
    println!(
        "Timeouts: transcription {:?}, extraction {:?}, sync {:?}",
        cfg.timeouts.transcription, cfg.timeouts.extraction, cfg.timeouts.sync
    );

    Ok(())
}

fn print_outcome(recording: &Recording) {
    match recording.status {
        RecordingStatus::Synced => {
            let external_id = recording.external_id.as_deref().unwrap_or("?");
            println!("[{}] synced -> {}", recording.id, external_id);
        }
        RecordingStatus::Error => {
            if let Some(failure) = &recording.failure {
                eprintln!("[{}] {}: {}", recording.id, failure.kind, failure.message);
            } else {
                eprintln!("[{}] error", recording.id);
            }
        }
        status => println!("[{}] {}", recording.id, status),
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid recording ID: {}", raw))
}

/// SHA-256 of the audio content, first 12 hex chars
fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}
