//! Per-tenant credentials for the external CRM.

use serde::{Deserialize, Serialize};

/// OAuth client credentials and endpoint for one tenant's CRM instance.
///
/// Owned by the credential resolver; the orchestrator only ever reads these,
/// and re-resolves them on every sync attempt so rotated credentials take
/// effect immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredentials {
    /// Base endpoint of the CRM instance (e.g. "https://org.crm.dynamics.com")
    pub base_url: String,

    /// OAuth client (application) id
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,

    /// Identity directory id the client is registered in
    pub directory_id: String,
}

impl TenantCredentials {
    /// Identity endpoint for the client-credentials grant
    pub fn token_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.directory_id
        )
    }

    /// OAuth scope for the target resource
    pub fn scope(&self) -> String {
        format!("{}/.default", self.base_url.trim_end_matches('/'))
    }

    /// Entity collection URL on the CRM Web API
    pub fn collection_url(&self, entity_set: &str) -> String {
        format!(
            "{}/api/data/v9.2/{}",
            self.base_url.trim_end_matches('/'),
            entity_set
        )
    }

    /// Single-record URL on the CRM Web API
    pub fn record_url(&self, entity_set: &str, record_id: &str) -> String {
        format!("{}({})", self.collection_url(entity_set), record_id)
    }
}
