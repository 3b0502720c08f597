//! Process-wide single-slot token cache.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::{AuthResult, Credential, TokenProvider};

/// Shared cache for the current bearer token.
///
/// The lock guards only the slot, never the network call: concurrent callers
/// that both observe an empty slot may both refresh, which is accepted
/// duplicate work. Each write replaces the credential wholesale.
///
/// No expiry is tracked. A cached token is reused until [`invalidate`] is
/// called; the upstream client does so when a call is rejected as
/// unauthorized.
///
/// [`invalidate`]: TokenCache::invalidate
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    slot: Mutex<Option<Credential>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached token, acquiring one from the provider on a miss.
    pub async fn get_or_refresh(&self) -> AuthResult<String> {
        if let Some(credential) = self.slot.lock().await.as_ref() {
            return Ok(credential.token.clone());
        }

        debug!("no cached access token, acquiring a new one");
        let credential = self.provider.acquire().await?;
        let token = credential.token.clone();
        *self.slot.lock().await = Some(credential);
        Ok(token)
    }

    /// Drop the cached token so the next call acquires a fresh one.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            debug!("invalidated cached access token");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::identity::{AuthError, AuthResult};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingProvider {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn acquire(&self) -> AuthResult<Credential> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(AuthError::MissingConfig("identity.static_token"));
            }
            Ok(Credential {
                token: format!("token-{call}"),
            })
        }
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let provider = Arc::new(CountingProvider::new(false));
        let cache = TokenCache::new(provider.clone());

        assert_eq!(cache.get_or_refresh().await.unwrap(), "token-1");
        assert_eq!(cache.get_or_refresh().await.unwrap(), "token-1");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let provider = Arc::new(CountingProvider::new(false));
        let cache = TokenCache::new(provider.clone());

        assert_eq!(cache.get_or_refresh().await.unwrap(), "token-1");
        cache.invalidate().await;
        assert_eq!(cache.get_or_refresh().await.unwrap(), "token-2");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_acquire_failure_leaves_slot_empty() {
        let provider = Arc::new(CountingProvider::new(true));
        let cache = TokenCache::new(provider.clone());

        assert!(cache.get_or_refresh().await.is_err());
        assert!(cache.get_or_refresh().await.is_err());
        // Every call hits the provider because nothing was cached.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
