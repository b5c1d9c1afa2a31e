use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::db::{Destination, DestinationKey};
use crate::error::RelayError;
use crate::platform::{ChatPlatform, WebhookHandle, WebhookIdentity};
use crate::web::metrics::Metrics;

/// One reusable webhook per destination channel.
///
/// Entries are created lazily and dropped by [`WebhookCache::evict`] after any
/// failed send, so a stale entry survives at most one failed delivery.
pub struct WebhookCache {
    platform: Arc<dyn ChatPlatform>,
    entries: RwLock<HashMap<DestinationKey, WebhookHandle>>,
    resolve_locks: Mutex<HashMap<DestinationKey, Arc<AsyncMutex<()>>>>,
}

impl WebhookCache {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            platform,
            entries: RwLock::new(HashMap::new()),
            resolve_locks: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_lock(&self, key: &DestinationKey) -> Arc<AsyncMutex<()>> {
        self.resolve_locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drops the resolve lock of `key` once no other resolve holds it.
    fn release_resolve_lock(&self, key: &DestinationKey) {
        let mut locks = self.resolve_locks.lock();
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    fn cached(&self, key: &DestinationKey) -> Option<WebhookHandle> {
        self.entries.read().get(key).cloned()
    }

    pub async fn get_or_create(
        &self,
        destination: &Destination,
        identity_name: &str,
        avatar_url: &str,
    ) -> Result<WebhookHandle, RelayError> {
        let key = destination.key();
        if let Some(handle) = self.cached(&key) {
            Metrics::webhook_cache_hit();
            return Ok(handle);
        }

        let lock = self.resolve_lock(&key);
        let resolved = {
            let _guard = lock.lock().await;
            self.resolve(destination, identity_name, avatar_url).await
        };
        drop(lock);
        self.release_resolve_lock(&key);
        resolved
    }

    async fn resolve(
        &self,
        destination: &Destination,
        identity_name: &str,
        avatar_url: &str,
    ) -> Result<WebhookHandle, RelayError> {
        let key = destination.key();
        // another delivery may have resolved it while we waited
        if let Some(handle) = self.cached(&key) {
            Metrics::webhook_cache_hit();
            return Ok(handle);
        }
        Metrics::webhook_cache_miss();

        let channel_id = destination.channel_id.as_str();
        let unavailable = |reason: String| RelayError::WebhookUnavailable {
            channel_id: channel_id.to_string(),
            reason,
        };

        let listed = self
            .platform
            .list_webhooks(channel_id)
            .await
            .map_err(|e| unavailable(format!("failed to list webhooks: {e}")))?;

        // only webhooks this bot owns carry a token; same-named ones owned by
        // other applications are neither reused nor deleted
        let (mut candidates, foreign): (Vec<WebhookIdentity>, Vec<WebhookIdentity>) = listed
            .into_iter()
            .filter(|hook| hook.name.as_deref() == Some(identity_name))
            .partition(|hook| hook.token.is_some());
        for hook in &foreign {
            debug!(
                "ignoring tokenless webhook id={} named {} in channel={}",
                hook.id, identity_name, channel_id
            );
        }
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let identity = if candidates.is_empty() {
            let created = self
                .platform
                .create_webhook(channel_id, identity_name, avatar_url)
                .await
                .map_err(|e| unavailable(format!("failed to create webhook: {e}")))?;
            info!(
                "created webhook id={} for channel={}",
                created.id, channel_id
            );
            created
        } else {
            let survivor = candidates.remove(0);
            for duplicate in candidates {
                match self.platform.delete_webhook(&duplicate.id).await {
                    Ok(()) => info!(
                        "deleted duplicate webhook id={} channel={} keeping id={}",
                        duplicate.id, channel_id, survivor.id
                    ),
                    Err(err) => warn!(
                        "failed to delete duplicate webhook id={} channel={}: {}",
                        duplicate.id, channel_id, err
                    ),
                }
            }
            survivor
        };

        let handle = into_handle(identity)
            .ok_or_else(|| unavailable("webhook has no token".to_string()))?;

        self.entries.write().insert(key, handle.clone());
        debug!(
            "cached webhook id={} for destination={}",
            handle.id,
            destination.key()
        );
        Ok(handle)
    }

    /// Idempotent; a later `get_or_create` re-resolves from the platform.
    pub fn evict(&self, destination: &Destination) {
        if self.entries.write().remove(&destination.key()).is_some() {
            Metrics::webhook_cache_eviction();
            debug!("evicted webhook for destination={}", destination.key());
        }
    }

    pub fn contains(&self, destination: &Destination) -> bool {
        self.entries.read().contains_key(&destination.key())
    }
}

fn into_handle(identity: WebhookIdentity) -> Option<WebhookHandle> {
    Some(WebhookHandle {
        token: identity.token?,
        id: identity.id,
        channel_id: identity.channel_id,
        created_at: identity.created_at,
    })
}
