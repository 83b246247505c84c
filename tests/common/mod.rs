//! Shared test harness: a seeded tenant directory, a temp recording store,
//! and scripted adapter implementations.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::TempDir;

use fieldnote::adapters::{EntitySink, Extractor, SinkError, Transcriber};
use fieldnote::domain::{
    Confidence, Extraction, Recording, SchemaMapping, TenantCredentials, Transcript,
};
use fieldnote::{Orchestrator, RecordingStore, StepTimeouts, TenantDirectory};

pub const TENANT: &str = "greenfields";

const CREDENTIALS_YAML: &str = r#"
base_url: https://org.crm.dynamics.com
client_id: client-1
client_secret: secret-1
directory_id: dir-1
"#;

const ANIMAL_SCHEMA_YAML: &str = r#"
entity_type: animal
entity_set: cr4f2_animals
detection_keywords: [cow, heifer, calf, "ear tag"]
fields:
  - name: ear_tag
    target: cr4f2_eartag
    required: true
  - name: birth_date
    target: cr4f2_birthdate
    required: true
    kind:
      type: date
  - name: sex
    target: cr4f2_sex
    required: true
    kind:
      type: enum
      options: [Bull, Steer, Cow, Heifer]
    aliases: [gender]
"#;

/// A temp-dir environment with one seeded tenant
pub struct TestEnv {
    pub temp: TempDir,
    pub store: RecordingStore,
    pub tenants: TenantDirectory,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();

        let tenant_dir = temp.path().join("tenants").join(TENANT);
        std::fs::create_dir_all(tenant_dir.join("schemas")).unwrap();
        std::fs::write(tenant_dir.join("credentials.yaml"), CREDENTIALS_YAML).unwrap();
        std::fs::write(tenant_dir.join("schemas/animal.yaml"), ANIMAL_SCHEMA_YAML).unwrap();

        Self {
            store: RecordingStore::new(temp.path().join("recordings")),
            tenants: TenantDirectory::new(temp.path().join("tenants")),
            temp,
        }
    }

    /// Write a fake audio file and register it as a recording
    pub async fn submit(&self) -> Recording {
        self.submit_for(TENANT).await
    }

    pub async fn submit_for(&self, tenant: &str) -> Recording {
        let audio_path = self.temp.path().join("note.m4a");
        tokio::fs::write(&audio_path, b"fake audio content")
            .await
            .unwrap();

        self.store
            .submit(
                tenant.to_string(),
                audio_path,
                18,
                "ab12cd34ef56".to_string(),
                Some("animal".to_string()),
            )
            .await
            .unwrap()
    }

    pub fn orchestrator(
        &self,
        transcriber: Arc<dyn Transcriber>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn EntitySink>,
    ) -> Orchestrator {
        Orchestrator::new(
            self.store.clone(),
            self.tenants.clone(),
            transcriber,
            extractor,
            sink,
            StepTimeouts::default(),
        )
    }
}

/// Transcriber returning a fixed transcript, or failing on demand
pub struct StaticTranscriber {
    pub text: String,
    pub fail: bool,
}

impl StaticTranscriber {
    pub fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: String::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl Transcriber for StaticTranscriber {
    fn name(&self) -> &str {
        "static-transcriber"
    }

    async fn transcribe(
        &self,
        _audio: &[u8],
        _file_name: &str,
        _timeout: Duration,
    ) -> Result<Transcript> {
        if self.fail {
            anyhow::bail!("transcription backend unavailable");
        }
        Ok(Transcript {
            text: self.text.clone(),
            confidence: Confidence::High,
        })
    }
}

/// Extractor returning fixed fields, or failing on demand
pub struct StaticExtractor {
    pub entity_type: String,
    pub fields: Map<String, Value>,
    pub fail: bool,
}

impl StaticExtractor {
    pub fn ok(entity_type: &str, fields: Value) -> Arc<Self> {
        Arc::new(Self {
            entity_type: entity_type.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            entity_type: String::new(),
            fields: Map::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    fn name(&self) -> &str {
        "static-extractor"
    }

    async fn extract(
        &self,
        _transcript: &str,
        _entity_hint: Option<&str>,
        _schemas: &[SchemaMapping],
        _timeout: Duration,
    ) -> Result<Extraction> {
        if self.fail {
            anyhow::bail!("malformed model output");
        }
        Ok(Extraction {
            entity_type: self.entity_type.clone(),
            confidence: Confidence::Medium,
            fields: self.fields.clone(),
        })
    }
}

/// One CRM create call as seen by the memory sink
#[derive(Debug, Clone)]
pub struct CreatedRecord {
    pub tenant_id: String,
    pub entity_set: String,
    pub attributes: Map<String, Value>,
}

/// How the memory sink responds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Succeed,
    AuthError,
    RemoteError,
}

/// EntitySink that records calls in memory
pub struct MemorySink {
    pub mode: SinkMode,
    pub created: Mutex<Vec<CreatedRecord>>,
}

impl MemorySink {
    pub fn new(mode: SinkMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<CreatedRecord> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitySink for MemorySink {
    fn name(&self) -> &str {
        "memory-sink"
    }

    async fn create_entity(
        &self,
        tenant_id: &str,
        _credentials: &TenantCredentials,
        entity_set: &str,
        attributes: &Map<String, Value>,
        _timeout: Duration,
    ) -> Result<String, SinkError> {
        match self.mode {
            SinkMode::AuthError => Err(SinkError::Auth {
                detail: "invalid client secret".to_string(),
            }),
            SinkMode::RemoteError => Err(SinkError::Remote {
                status: 400,
                body: "{\"error\":\"bad request\"}".to_string(),
            }),
            SinkMode::Succeed => {
                let mut created = self.created.lock().unwrap();
                created.push(CreatedRecord {
                    tenant_id: tenant_id.to_string(),
                    entity_set: entity_set.to_string(),
                    attributes: attributes.clone(),
                });
                Ok(format!("ext-{}", created.len()))
            }
        }
    }
}
