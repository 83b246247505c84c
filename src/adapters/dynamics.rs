//! Dynamics-style CRM client.
//!
//! Speaks the OData v4 Web API dialect: bearer-authenticated JSON CRUD
//! against entity collections, with OAuth2 client-credentials tokens fetched
//! from the tenant's identity endpoint and cached per tenant.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::token::{TokenCache, TokenResponse};
use super::{body_snippet, EntitySink, SinkError};
use crate::domain::TenantCredentials;

/// Client for a Dynamics-style OData entity API
pub struct DynamicsClient {
    client: reqwest::Client,
    tokens: TokenCache,
}

/// Token endpoint response for the client-credentials grant
#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,

    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl DynamicsClient {
    /// Create a client whose cached tokens refresh `token_margin` before
    /// their declared expiry
    pub fn new(token_margin: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens: TokenCache::new(token_margin),
        }
    }

    /// Fetch a fresh token from the tenant's identity endpoint
    async fn fetch_token(
        &self,
        credentials: &TenantCredentials,
        timeout: Duration,
    ) -> Result<TokenResponse, SinkError> {
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", &credentials.scope()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .client
            .post(credentials.token_url())
            .timeout(timeout)
            .form(&params)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Auth {
                detail: format!("token request failed ({}): {}", status, body_snippet(&body)),
            });
        }

        let token: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Auth {
                detail: format!("malformed token response: {}", e),
            })?;

        debug!(expires_in = token.expires_in, "Acquired CRM access token");

        Ok(TokenResponse {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }

    /// Get a bearer token, reusing the tenant's cached one when still valid
    async fn bearer(
        &self,
        tenant_id: &str,
        credentials: &TenantCredentials,
        timeout: Duration,
    ) -> Result<String, SinkError> {
        self.tokens
            .bearer(tenant_id, || self.fetch_token(credentials, timeout))
            .await
    }

    /// Retrieve a single record, optionally selecting specific attributes
    pub async fn get_entity(
        &self,
        tenant_id: &str,
        credentials: &TenantCredentials,
        entity_set: &str,
        record_id: &str,
        select: Option<&[&str]>,
        timeout: Duration,
    ) -> Result<Value, SinkError> {
        let bearer = self.bearer(tenant_id, credentials, timeout).await?;

        let mut url = credentials.record_url(entity_set, record_id);
        if let Some(fields) = select {
            url.push_str(&format!("?$select={}", fields.join(",")));
        }

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .bearer_auth(&bearer)
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        self.read_json(tenant_id, response).await
    }

    /// Query a collection with OData `$filter`/`$select`/`$top`
    pub async fn query_entities(
        &self,
        tenant_id: &str,
        credentials: &TenantCredentials,
        entity_set: &str,
        filter: Option<&str>,
        select: Option<&[&str]>,
        top: usize,
        timeout: Duration,
    ) -> Result<Vec<Value>, SinkError> {
        let bearer = self.bearer(tenant_id, credentials, timeout).await?;

        let mut params = vec![format!("$top={}", top)];
        if let Some(filter) = filter {
            params.push(format!("$filter={}", filter));
        }
        if let Some(fields) = select {
            params.push(format!("$select={}", fields.join(",")));
        }

        let url = format!(
            "{}?{}",
            credentials.collection_url(entity_set),
            params.join("&")
        );

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .bearer_auth(&bearer)
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let body = self.read_json(tenant_id, response).await?;

        Ok(body
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Turn a response into JSON, mapping non-2xx to a typed remote error
    async fn read_json(
        &self,
        tenant_id: &str,
        response: reqwest::Response,
    ) -> Result<Value, SinkError> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                // The cached token was rejected; drop it so the next
                // attempt starts with a fresh one.
                self.tokens.invalidate(tenant_id).await;
            }
            return Err(SinkError::Remote {
                status: status.as_u16(),
                body: body_snippet(&body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

#[async_trait]
impl EntitySink for DynamicsClient {
    fn name(&self) -> &str {
        "dynamics"
    }

    async fn create_entity(
        &self,
        tenant_id: &str,
        credentials: &TenantCredentials,
        entity_set: &str,
        attributes: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<String, SinkError> {
        let bearer = self.bearer(tenant_id, credentials, timeout).await?;

        let response = self
            .client
            .post(credentials.collection_url(entity_set))
            .timeout(timeout)
            .bearer_auth(&bearer)
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .header("Accept", "application/json")
            .header("Prefer", "return=representation")
            .json(attributes)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.tokens.invalidate(tenant_id).await;
            }
            warn!(%status, entity_set, "CRM create rejected");
            return Err(SinkError::Remote {
                status: status.as_u16(),
                body: body_snippet(&body),
            });
        }

        // With return=representation the body carries the record; otherwise
        // the id arrives in the OData-EntityId header as "...set(<id>)".
        let entity_header = response
            .headers()
            .get("OData-EntityId")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body: Value = response.json().await.unwrap_or(Value::Null);

        let record_id = body
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| entity_header.as_deref().and_then(parse_entity_id))
            .or_else(|| primary_key_from_body(&body, entity_set))
            .ok_or_else(|| SinkError::Remote {
                status: status.as_u16(),
                body: "created record carried no identifier".to_string(),
            })?;

        info!(entity_set, record_id = %record_id, "Created CRM record");

        Ok(record_id)
    }
}

/// Extract the id from an OData-EntityId header value:
/// `https://org.crm.dynamics.com/api/data/v9.2/cr4f2_animals(guid)` -> `guid`
fn parse_entity_id(header: &str) -> Option<String> {
    let start = header.rfind('(')?;
    let end = header.rfind(')')?;
    if end <= start + 1 {
        return None;
    }
    Some(header[start + 1..end].to_string())
}

/// Fall back to the `<singular>id` attribute convention in the returned
/// representation ("cr4f2_animals" -> "cr4f2_animalid")
fn primary_key_from_body(body: &Value, entity_set: &str) -> Option<String> {
    let singular = entity_set.strip_suffix('s').unwrap_or(entity_set);
    body.get(format!("{}id", singular))
        .and_then(Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_entity_id_from_header() {
        let header = "https://org.crm.dynamics.com/api/data/v9.2/cr4f2_animals(7a9f2c9e-0001)";
        assert_eq!(parse_entity_id(header), Some("7a9f2c9e-0001".to_string()));

        assert_eq!(parse_entity_id("no parens here"), None);
        assert_eq!(parse_entity_id("empty()"), None);
    }

    #[test]
    fn test_primary_key_convention() {
        let body = json!({"cr4f2_animalid": "guid-9", "cr4f2_eartag": "1234"});
        assert_eq!(
            primary_key_from_body(&body, "cr4f2_animals"),
            Some("guid-9".to_string())
        );
        assert_eq!(primary_key_from_body(&body, "cr4f2_herds"), None);
    }

    #[test]
    fn test_sink_name() {
        let client = DynamicsClient::new(Duration::from_secs(300));
        assert_eq!(client.name(), "dynamics");
    }
}
