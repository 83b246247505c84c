//! Tenant directory: credential resolution and schema mapping lookup.
//!
//! Each tenant owns a directory under `<home>/tenants/<tenant_id>/`:
//!
//! ```text
//! tenants/
//!   greenfields/
//!     credentials.yaml     CRM endpoint + OAuth client credentials
//!     schemas/
//!       animal.yaml        schema mapping per entity type
//! ```
//!
//! Reads are side-effect-free and never cached: an administrator can rotate
//! credentials or edit a mapping at any time, and the next pipeline step
//! picks the change up.

use std::path::{Path, PathBuf};

use anyhow::Result;
use thiserror::Error;
use tokio::fs;

use crate::domain::{SchemaMapping, TenantCredentials};

/// Errors from tenant lookups
#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("No schema mapping configured for entity type '{entity_type}' of tenant {tenant_id}")]
    SchemaNotFound {
        tenant_id: String,
        entity_type: String,
    },

    #[error("Invalid tenant file {path}: {detail}")]
    Invalid { path: PathBuf, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File-backed store of tenant credentials and schema mappings
#[derive(Clone)]
pub struct TenantDirectory {
    root: PathBuf,
}

impl TenantDirectory {
    /// Create a directory rooted at the given path
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Open the directory at the configured default location
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::tenants_dir()?))
    }

    fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        self.root.join(tenant_id)
    }

    /// Resolve a tenant's CRM credentials, reading fresh from disk
    pub async fn resolve_credentials(
        &self,
        tenant_id: &str,
    ) -> Result<TenantCredentials, TenantError> {
        let path = self.tenant_dir(tenant_id).join("credentials.yaml");

        if !path.exists() {
            return Err(TenantError::NotFound(tenant_id.to_string()));
        }

        let content = fs::read_to_string(&path).await?;

        serde_yaml::from_str(&content).map_err(|e| TenantError::Invalid {
            path,
            detail: e.to_string(),
        })
    }

    /// All schema mappings configured for a tenant, ordered by entity type.
    ///
    /// A tenant with no `schemas/` directory has no mappings; that is a
    /// configuration gap the pipeline reports, not an IO error.
    pub async fn schema_mappings(&self, tenant_id: &str) -> Result<Vec<SchemaMapping>, TenantError> {
        let dir = self.tenant_dir(tenant_id).join("schemas");

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut mappings = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_yaml(&path) {
                continue;
            }

            let content = fs::read_to_string(&path).await?;
            let mapping =
                SchemaMapping::from_yaml(&content).map_err(|e| TenantError::Invalid {
                    path: path.clone(),
                    detail: e.to_string(),
                })?;
            mappings.push(mapping);
        }

        mappings.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));

        Ok(mappings)
    }

    /// The schema mapping for one (tenant, entity type) pair
    pub async fn schema_for(
        &self,
        tenant_id: &str,
        entity_type: &str,
    ) -> Result<SchemaMapping, TenantError> {
        self.schema_mappings(tenant_id)
            .await?
            .into_iter()
            .find(|m| m.entity_type == entity_type)
            .ok_or_else(|| TenantError::SchemaNotFound {
                tenant_id: tenant_id.to_string(),
                entity_type: entity_type.to_string(),
            })
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
