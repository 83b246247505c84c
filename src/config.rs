//! Configuration for fieldnote.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FIELDNOTE_HOME, WHISPER_API_KEY, EXTRACTOR_API_KEY)
//! 2. Config file (.fieldnote/config.yaml)
//! 3. Defaults (~/.fieldnote)
//!
//! Config file discovery:
//! - Searches current directory and parents for .fieldnote/config.yaml
//!
//! Secrets (API keys) never live in the config file; they come from the
//! environment only.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::StepTimeouts;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub transcription: Option<TranscriptionConfig>,
    #[serde(default)]
    pub extraction: Option<ExtractionConfig>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
    #[serde(default)]
    pub timeouts: Option<TimeoutConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionConfig {
    pub mode: Option<TranscriptionMode>,
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub binary_path: Option<String>,
    pub local_model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionConfig {
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    pub token_margin_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutConfig {
    pub transcription_seconds: Option<u64>,
    pub extraction_seconds: Option<u64>,
    pub sync_seconds: Option<u64>,
}

/// Which transcription backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionMode {
    /// Local whisper binary
    Local,

    /// OpenAI-compatible transcription API
    Remote,
}

impl Default for TranscriptionMode {
    fn default() -> Self {
        Self::Remote
    }
}

/// Resolved configuration with defaults applied
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to fieldnote home (recordings, tenants)
    pub home: PathBuf,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    pub transcription: TranscriptionSettings,
    pub extraction: ExtractionSettings,
    pub sync: SyncSettings,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone)]
pub struct TranscriptionSettings {
    pub mode: TranscriptionMode,
    pub api_url: String,
    pub model: String,
    pub api_key: String,
    pub binary_path: String,
    pub local_model: String,
}

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub api_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub token_margin: Duration,
}

#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    pub transcription: Duration,
    pub extraction: Duration,
    pub sync: Duration,
}

impl TimeoutSettings {
    pub fn step_timeouts(&self) -> StepTimeouts {
        StepTimeouts {
            transcription: self.transcription,
            extraction: self.extraction,
            sync: self.sync,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".fieldnote").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".fieldnote");

    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    let home = if let Ok(env_home) = std::env::var("FIELDNOTE_HOME") {
        PathBuf::from(env_home)
    } else if let Some(home) = file.as_ref().and_then(|f| f.home.clone()) {
        PathBuf::from(home)
    } else {
        default_home
    };

    let t = file
        .as_ref()
        .and_then(|f| f.transcription.clone())
        .unwrap_or_default();
    let transcription = TranscriptionSettings {
        mode: t.mode.unwrap_or_default(),
        api_url: t
            .api_url
            .unwrap_or_else(|| "https://api.openai.com/v1/audio/transcriptions".to_string()),
        model: t.model.unwrap_or_else(|| "whisper-1".to_string()),
        api_key: std::env::var("WHISPER_API_KEY").unwrap_or_default(),
        binary_path: t.binary_path.unwrap_or_else(|| "whisper".to_string()),
        local_model: t.local_model.unwrap_or_else(|| "base".to_string()),
    };

    let e = file
        .as_ref()
        .and_then(|f| f.extraction.clone())
        .unwrap_or_default();
    let extraction = ExtractionSettings {
        api_url: e
            .api_url
            .unwrap_or_else(|| "https://api.groq.com/openai/v1/chat/completions".to_string()),
        model: e.model.unwrap_or_else(|| "llama-3.1-70b-versatile".to_string()),
        api_key: std::env::var("EXTRACTOR_API_KEY").unwrap_or_default(),
        temperature: e.temperature.unwrap_or(0.1),
    };

    let s = file.as_ref().and_then(|f| f.sync.clone()).unwrap_or_default();
    let sync = SyncSettings {
        token_margin: Duration::from_secs(s.token_margin_seconds.unwrap_or(300)),
    };

    let to = file
        .as_ref()
        .and_then(|f| f.timeouts.clone())
        .unwrap_or_default();
    let timeouts = TimeoutSettings {
        transcription: Duration::from_secs(to.transcription_seconds.unwrap_or(300)),
        extraction: Duration::from_secs(to.extraction_seconds.unwrap_or(60)),
        sync: Duration::from_secs(to.sync_seconds.unwrap_or(30)),
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        transcription,
        extraction,
        sync,
        timeouts,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the fieldnote home directory
pub fn home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the recordings directory ($FIELDNOTE_HOME/recordings)
pub fn recordings_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("recordings"))
}

/// Get the audio staging directory ($FIELDNOTE_HOME/audio)
pub fn audio_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("audio"))
}

/// Get the tenants directory ($FIELDNOTE_HOME/tenants)
pub fn tenants_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("tenants"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".fieldnote");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
transcription:
  mode: local
  binary_path: /opt/whisper/bin/whisper
  local_model: small
extraction:
  model: llama-3.3-70b
  temperature: 0.2
sync:
  token_margin_seconds: 120
timeouts:
  sync_seconds: 10
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");

        let t = config.transcription.unwrap();
        assert_eq!(t.mode, Some(TranscriptionMode::Local));
        assert_eq!(t.binary_path.as_deref(), Some("/opt/whisper/bin/whisper"));

        assert_eq!(config.sync.unwrap().token_margin_seconds, Some(120));
        assert_eq!(config.timeouts.unwrap().sync_seconds, Some(10));
    }

    #[test]
    fn test_defaults_without_file() {
        // load_config falls back to defaults when no file is discovered;
        // the home may still come from FIELDNOTE_HOME in the environment.
        let config = load_config().unwrap();

        assert_eq!(config.transcription.model, "whisper-1");
        assert_eq!(config.extraction.temperature, 0.1);
        assert_eq!(config.sync.token_margin, Duration::from_secs(300));
    }

    #[test]
    fn test_timeout_settings_bridge() {
        let timeouts = TimeoutSettings {
            transcription: Duration::from_secs(120),
            extraction: Duration::from_secs(45),
            sync: Duration::from_secs(15),
        };

        let step = timeouts.step_timeouts();
        assert_eq!(step.transcription, Duration::from_secs(120));
        assert_eq!(step.extraction, Duration::from_secs(45));
        assert_eq!(step.sync, Duration::from_secs(15));
    }

    #[test]
    fn test_default_transcription_mode_is_remote() {
        assert_eq!(TranscriptionMode::default(), TranscriptionMode::Remote);
    }
}
