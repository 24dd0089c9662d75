//! Per-process limiter registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::LimiterSettings;
use crate::limiter::RateLimit;
use crate::store::CounterStore;

/// Hands out one [`RateLimit`] per client id.
///
/// Every call site asking for the same client gets the same instance, so the
/// in-process flush clock and the locally cached limit stay coherent.
/// Creating a limiter publishes its configured limit to the store once.
pub struct LimiterRegistry {
    store: Arc<dyn CounterStore>,
    settings: LimiterSettings,
    limiters: Mutex<HashMap<String, Arc<RateLimit>>>,
}

impl LimiterRegistry {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_settings(store, LimiterSettings::default())
    }

    pub fn with_settings(store: Arc<dyn CounterStore>, settings: LimiterSettings) -> Self {
        Self {
            store,
            settings,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the limiter for `client_id`.
    ///
    /// An existing limiter has its local limit refreshed to
    /// `max_active_requests` without touching the store. A newly created one
    /// runs the registration flush; if that flush fails the limiter is
    /// registered anyway and its first admission retries.
    pub async fn obtain(&self, client_id: &str, max_active_requests: u64) -> Arc<RateLimit> {
        {
            let limiters = self.limiters.lock().await;
            if let Some(existing) = limiters.get(client_id) {
                existing.set_max_active_requests(max_active_requests);
                return Arc::clone(existing);
            }
        }

        let created = Arc::new(RateLimit::with_settings(
            client_id,
            max_active_requests,
            Arc::clone(&self.store),
            self.settings.clone(),
        ));

        // The lock is not held across the registration flush, so a racing
        // obtain may have registered the client first.
        let (limiter, inserted) = {
            let mut limiters = self.limiters.lock().await;
            match limiters.get(client_id) {
                Some(existing) => {
                    existing.set_max_active_requests(max_active_requests);
                    (Arc::clone(existing), false)
                }
                None => {
                    limiters.insert(client_id.to_string(), Arc::clone(&created));
                    (created, true)
                }
            }
        };

        if inserted
            && let Err(e) = limiter.flush_cache(true).await
        {
            tracing::warn!(
                client_id = %limiter.client_id(),
                error = %e,
                "Registration flush failed - first admission will retry"
            );
            limiter.clear_flush_clock();
        }

        limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::LimitError;
    use crate::store::testing::{FailingStore, RecordingStore};
    use crate::store::{MemoryStore, StoreError};

    #[tokio::test]
    async fn obtain_publishes_the_configured_limit() {
        let store = Arc::new(MemoryStore::new());
        let registry = LimiterRegistry::new(Arc::clone(&store) as Arc<dyn CounterStore>);

        let limiter = registry.obtain("appA", 3).await;

        assert_eq!(limiter.max_active_requests(), 3);
        let central = store.get("rate_limit:appA:max_active_requests").await.unwrap();
        assert_eq!(central, Some("3".to_string()));
    }

    #[tokio::test]
    async fn obtain_returns_the_same_limiter_and_refreshes_its_limit() {
        let store = Arc::new(MemoryStore::new());
        let registry = LimiterRegistry::new(Arc::clone(&store) as Arc<dyn CounterStore>);

        let first = registry.obtain("appA", 3).await;
        let second = registry.obtain("appA", 7).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.max_active_requests(), 7);
        // Only creation publishes; the refresh stays local until the next
        // flush.
        let central = store.get("rate_limit:appA:max_active_requests").await.unwrap();
        assert_eq!(central, Some("3".to_string()));
    }

    #[tokio::test]
    async fn concurrent_obtains_register_one_limiter() {
        let registry = Arc::new(LimiterRegistry::new(Arc::new(MemoryStore::new())));

        let (a, b) = tokio::join!(registry.obtain("appA", 2), registry.obtain("appA", 2));

        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn failed_registration_flush_still_registers() {
        let registry = LimiterRegistry::new(Arc::new(FailingStore));

        let limiter = registry.obtain("appA", 2).await;
        assert_eq!(limiter.max_active_requests(), 2);

        // The first admission retries the flush and surfaces the failure.
        assert!(matches!(
            limiter.enter(None).await,
            Err(LimitError::Store(StoreError::Unavailable(_)))
        ));

        let again = registry.obtain("appA", 2).await;
        assert!(Arc::ptr_eq(&limiter, &again));
    }

    #[tokio::test]
    async fn obtain_for_a_disabled_client_touches_nothing() {
        let store = Arc::new(RecordingStore::new());
        let registry = LimiterRegistry::new(Arc::clone(&store) as Arc<dyn CounterStore>);

        let limiter = registry.obtain("appA", 0).await;

        assert!(limiter.disabled());
        assert_eq!(store.calls(), 0);
    }
}
