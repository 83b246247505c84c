//! Per-tenant OAuth token cache.
//!
//! Tokens are cached in memory keyed by tenant id and reused until a
//! configurable margin before their declared expiry. Refreshing is mutually
//! exclusive per tenant: a second caller arriving mid-refresh waits on the
//! tenant's slot and then reuses the fresh token instead of issuing a
//! duplicate request. Tenants never serialize each other.
//!
//! The cache is deliberately fetch-agnostic; the caller supplies the actual
//! token request, which keeps the expiry and locking behavior testable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;

use super::SinkError;

/// Raw result of a client-credentials token request
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,

    /// Lifetime in seconds as declared by the identity endpoint
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    bearer: String,
    expires_at: DateTime<Utc>,
}

/// In-memory, per-tenant token cache with expiry-aware reuse
pub struct TokenCache {
    /// Refresh this long before declared expiry
    margin: Duration,

    /// One slot per tenant; the slot mutex guards the refresh
    slots: Mutex<HashMap<String, Arc<AsyncMutex<Option<CachedToken>>>>>,
}

impl TokenCache {
    pub fn new(margin: StdDuration) -> Self {
        Self {
            margin: Duration::from_std(margin).unwrap_or_else(|_| Duration::seconds(300)),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, tenant_id: &str) -> Arc<AsyncMutex<Option<CachedToken>>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(tenant_id.to_string()).or_default())
    }

    /// Get a bearer token for a tenant, fetching only when the cached one is
    /// absent or within the expiry margin.
    pub async fn bearer<F, Fut>(&self, tenant_id: &str, fetch: F) -> Result<String, SinkError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TokenResponse, SinkError>>,
    {
        let slot = self.slot(tenant_id);
        let mut guard = slot.lock().await;

        if let Some(token) = guard.as_ref() {
            if Utc::now() + self.margin < token.expires_at {
                return Ok(token.bearer.clone());
            }
        }

        let fresh = fetch().await?;
        let expires_at = Utc::now() + Duration::seconds(fresh.expires_in as i64);
        let bearer = fresh.access_token;

        *guard = Some(CachedToken {
            bearer: bearer.clone(),
            expires_at,
        });

        Ok(bearer)
    }

    /// Drop a tenant's cached token so the next call fetches a fresh one.
    /// Used after the remote rejects a token that should still be valid.
    pub async fn invalidate(&self, tenant_id: &str) {
        let slot = self.slot(tenant_id);
        let mut guard = slot.lock().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetch(
        counter: &Arc<AtomicUsize>,
        expires_in: u64,
    ) -> impl std::future::Future<Output = Result<TokenResponse, SinkError>> {
        let counter = Arc::clone(counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenResponse {
                access_token: format!("token-{}", n),
                expires_in,
            })
        }
    }

    #[tokio::test]
    async fn test_token_reused_within_validity_window() {
        let cache = TokenCache::new(StdDuration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .bearer("greenfields", || counting_fetch(&calls, 3600))
            .await
            .unwrap();
        let second = cache
            .bearer("greenfields", || counting_fetch(&calls, 3600))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_triggers_exactly_one_refresh() {
        let cache = TokenCache::new(StdDuration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));

        // expires_in shorter than the margin, so it is stale immediately
        let first = cache
            .bearer("greenfields", || counting_fetch(&calls, 10))
            .await
            .unwrap();
        let second = cache
            .bearer("greenfields", || counting_fetch(&calls, 3600))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tenants_have_independent_tokens() {
        let cache = TokenCache::new(StdDuration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));

        let a = cache
            .bearer("tenant-a", || counting_fetch(&calls, 3600))
            .await
            .unwrap();
        let b = cache
            .bearer("tenant-b", || counting_fetch(&calls, 3600))
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = Arc::new(TokenCache::new(StdDuration::from_secs(300)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .bearer("greenfields", || counting_fetch(&calls, 3600))
                    .await
                    .unwrap()
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = TokenCache::new(StdDuration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .bearer("greenfields", || counting_fetch(&calls, 3600))
            .await
            .unwrap();
        cache.invalidate("greenfields").await;
        cache
            .bearer("greenfields", || counting_fetch(&calls, 3600))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates_and_caches_nothing() {
        let cache = TokenCache::new(StdDuration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache
            .bearer("greenfields", || async {
                Err(SinkError::Auth {
                    detail: "bad secret".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(SinkError::Auth { .. })));

        // A later valid fetch still runs
        cache
            .bearer("greenfields", || counting_fetch(&calls, 3600))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
