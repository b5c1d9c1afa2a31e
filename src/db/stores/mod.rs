use async_trait::async_trait;

use super::DatabaseError;
use super::models::StreamerMapping;

/// Persistence for the mapping registry. `upsert` replaces the stored
/// destination list for the mapping's source wholesale.
#[async_trait]
pub trait StreamerStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<StreamerMapping>, DatabaseError>;
    async fn upsert(&self, mapping: &StreamerMapping) -> Result<(), DatabaseError>;
    async fn delete(&self, source_id: &str) -> Result<(), DatabaseError>;
}
