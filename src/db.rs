pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::memory::MemoryStreamerStore;
pub use self::models::{Destination, DestinationKey, StreamerMapping, normalize_source_id};
pub use self::stores::StreamerStore;

pub mod error;
pub mod manager;
pub mod memory;
pub mod models;
pub mod stores;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
pub mod schema_sqlite;
