use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, info};

use crate::db::{Destination, StreamerMapping, StreamerStore, normalize_source_id};
use crate::error::RelayError;

/// Source channel → destination list, kept in memory and written through to a
/// [`StreamerStore`].
///
/// Reads never wait on writers. Writers are serialized per source id, and the
/// store write happens before the in-memory map changes, so a failed store
/// write leaves the registry as it was.
pub struct MappingRegistry {
    mappings: RwLock<HashMap<String, Arc<StreamerMapping>>>,
    write_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    store: Arc<dyn StreamerStore>,
    sources_tx: watch::Sender<BTreeSet<String>>,
}

impl MappingRegistry {
    pub fn new(store: Arc<dyn StreamerStore>) -> Self {
        let (sources_tx, _) = watch::channel(BTreeSet::new());
        Self {
            mappings: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
            store,
            sources_tx,
        }
    }

    /// Builds a registry from everything the store holds.
    pub async fn hydrate(store: Arc<dyn StreamerStore>) -> Result<Self, RelayError> {
        let registry = Self::new(store.clone());
        let loaded = store.load_all().await?;
        {
            let mut mappings = registry.mappings.write();
            for mut mapping in loaded {
                mapping.source_id = normalize_source_id(&mapping.source_id);
                if mapping.destinations.is_empty() {
                    continue;
                }
                mappings.insert(mapping.source_id.clone(), Arc::new(mapping));
            }
        }
        registry.publish_sources();
        info!("mapping registry loaded {} streamers", registry.len());
        Ok(registry)
    }

    fn write_lock(&self, source_id: &str) -> Arc<AsyncMutex<()>> {
        self.write_locks
            .lock()
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drops the write lock of a source that has no mapping once no other
    /// writer holds it.
    fn release_write_lock(&self, source_id: &str) {
        if self.mappings.read().contains_key(source_id) {
            return;
        }
        let mut locks = self.write_locks.lock();
        if locks.get(source_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(source_id);
        }
    }

    fn publish_sources(&self) {
        let sources = self.source_ids();
        self.sources_tx.send_replace(sources);
    }

    pub async fn add_destination(
        &self,
        source_id: &str,
        destination: Destination,
    ) -> Result<StreamerMapping, RelayError> {
        let source_id = normalize_source_id(source_id);
        if source_id.is_empty() {
            return Err(RelayError::InvalidDestination(
                "source id cannot be empty".to_string(),
            ));
        }
        if destination.community_id.is_empty() || destination.channel_id.is_empty() {
            return Err(RelayError::InvalidDestination(
                "community id and channel id are required".to_string(),
            ));
        }
        if !destination.has_consistent_channel_names() {
            return Err(RelayError::InvalidDestination(
                "live and offline channel names must be given together".to_string(),
            ));
        }

        let lock = self.write_lock(&source_id);
        let added = {
            let _guard = lock.lock().await;
            self.add_locked(source_id.clone(), destination).await
        };
        drop(lock);
        self.release_write_lock(&source_id);
        added
    }

    async fn add_locked(
        &self,
        source_id: String,
        destination: Destination,
    ) -> Result<StreamerMapping, RelayError> {
        let mut updated = match self.mappings.read().get(&source_id) {
            Some(existing) => existing.as_ref().clone(),
            None => StreamerMapping::new(&source_id),
        };

        if updated
            .find_destination(&destination.community_id, &destination.channel_id)
            .is_some()
        {
            return Err(RelayError::DuplicateDestination {
                source_id,
                community_id: destination.community_id,
                channel_id: destination.channel_id,
            });
        }

        updated.destinations.push(destination);
        updated.updated_at = Utc::now();

        self.store.upsert(&updated).await?;
        self.mappings
            .write()
            .insert(source_id.clone(), Arc::new(updated.clone()));
        self.publish_sources();

        debug!(
            "added destination source_id={} destinations={}",
            source_id,
            updated.destinations.len()
        );
        Ok(updated)
    }

    /// Removes one destination, deleting the mapping once it has none left.
    pub async fn remove_destination(
        &self,
        source_id: &str,
        community_id: &str,
        channel_id: &str,
    ) -> Result<bool, RelayError> {
        let source_id = normalize_source_id(source_id);
        let lock = self.write_lock(&source_id);
        let removed = {
            let _guard = lock.lock().await;
            self.remove_locked(&source_id, community_id, channel_id).await
        };
        drop(lock);
        self.release_write_lock(&source_id);
        removed
    }

    async fn remove_locked(
        &self,
        source_id: &str,
        community_id: &str,
        channel_id: &str,
    ) -> Result<bool, RelayError> {
        let Some(existing) = self.mappings.read().get(source_id).cloned() else {
            return Err(RelayError::NotFound(format!("streamer {source_id}")));
        };

        if existing.find_destination(community_id, channel_id).is_none() {
            return Err(RelayError::NotFound(format!(
                "destination {community_id}/{channel_id} of {source_id}"
            )));
        }

        let mut updated = existing.as_ref().clone();
        updated
            .destinations
            .retain(|destination| !destination.matches(community_id, channel_id));
        updated.updated_at = Utc::now();

        if updated.destinations.is_empty() {
            self.store.delete(source_id).await?;
            self.mappings.write().remove(source_id);
            info!("removed last destination, streamer {} is no longer monitored", source_id);
        } else {
            self.store.upsert(&updated).await?;
            self.mappings
                .write()
                .insert(source_id.to_string(), Arc::new(updated));
        }
        self.publish_sources();

        Ok(true)
    }

    pub fn list_destinations_for_community(&self, community_id: &str) -> CommunityDestinations {
        let mut snapshot: Vec<Arc<StreamerMapping>> =
            self.mappings.read().values().cloned().collect();
        snapshot.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        CommunityDestinations {
            community_id: community_id.to_string(),
            snapshot,
        }
    }

    pub fn find_by_source(&self, source_id: &str) -> Option<StreamerMapping> {
        self.mappings
            .read()
            .get(&normalize_source_id(source_id))
            .map(|mapping| mapping.as_ref().clone())
    }

    pub fn source_ids(&self) -> BTreeSet<String> {
        self.mappings.read().keys().cloned().collect()
    }

    /// Notified with the full source set after every change.
    pub fn subscribe_sources(&self) -> watch::Receiver<BTreeSet<String>> {
        self.sources_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.mappings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Snapshot of the registry filtered to one community. Iterating is lazy and
/// can be repeated.
pub struct CommunityDestinations {
    community_id: String,
    snapshot: Vec<Arc<StreamerMapping>>,
}

impl CommunityDestinations {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Destination)> + '_ {
        self.snapshot.iter().flat_map(move |mapping| {
            mapping
                .destinations
                .iter()
                .filter(move |destination| destination.community_id == self.community_id)
                .map(move |destination| (mapping.source_id.as_str(), destination))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a CommunityDestinations {
    type Item = (&'a str, &'a Destination);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a Destination)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
