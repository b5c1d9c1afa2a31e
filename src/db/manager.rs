use crate::config::{DatabaseConfig as ConfigDatabaseConfig, DbType as ConfigDbType};
use crate::db::{DatabaseError, MemoryStreamerStore, StreamerStore};
use std::sync::Arc;

#[cfg(feature = "postgres")]
use crate::db::postgres::PostgresStreamerStore;
#[cfg(feature = "postgres")]
use diesel::RunQueryDsl;
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "postgres")]
use diesel::r2d2::{self, ConnectionManager};

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::SqliteStreamerStore;
#[cfg(feature = "sqlite")]
use diesel::Connection;
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    streamer_store: Arc<dyn StreamerStore>,
    db_type: DbType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
    Memory,
}

impl From<ConfigDbType> for DbType {
    fn from(value: ConfigDbType) -> Self {
        match value {
            ConfigDbType::Postgres => DbType::Postgres,
            ConfigDbType::Sqlite => DbType::Sqlite,
            ConfigDbType::Memory => DbType::Memory,
        }
    }
}

impl DatabaseManager {
    pub async fn new(config: &ConfigDatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = DbType::from(config.db_type());

        match db_type {
            DbType::Memory => Ok(Self {
                #[cfg(feature = "postgres")]
                postgres_pool: None,
                #[cfg(feature = "sqlite")]
                sqlite_path: None,
                streamer_store: Arc::new(MemoryStreamerStore::new()),
                db_type,
            }),
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let connection_string = config.connection_string();
                let max_connections = config.max_connections();
                let min_connections = config.min_connections();

                let manager = ConnectionManager::<PgConnection>::new(connection_string);

                let builder = r2d2::Pool::builder()
                    .max_size(max_connections.unwrap_or(10))
                    .min_idle(Some(min_connections.unwrap_or(1)));

                let pool = builder
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                Ok(Self {
                    streamer_store: Arc::new(PostgresStreamerStore::new(pool.clone())),
                    postgres_pool: Some(pool),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    db_type,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config.sqlite_path().ok_or_else(|| {
                    DatabaseError::Connection("sqlite path is not configured".to_string())
                })?;

                Ok(Self {
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    streamer_store: Arc::new(SqliteStreamerStore::new(Arc::new(path.clone()))),
                    sqlite_path: Some(path),
                    db_type,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            DbType::Memory => Ok(()),
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("postgres pool is not initialized".to_string())
                })?;
                Self::migrate_postgres(pool).await
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("sqlite path is not initialized".to_string())
                })?;
                Self::migrate_sqlite(path).await
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: &Pool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS streamers (
                    source_id TEXT PRIMARY KEY,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS streamer_destinations (
                    id BIGSERIAL PRIMARY KEY,
                    source_id TEXT NOT NULL REFERENCES streamers(source_id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    community_id TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    thread_id TEXT,
                    live_channel_name TEXT,
                    offline_channel_name TEXT,
                    UNIQUE (source_id, community_id, channel_id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_streamer_destinations_source ON streamer_destinations(source_id)",
                "CREATE INDEX IF NOT EXISTS idx_streamer_destinations_community ON streamer_destinations(community_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        use diesel::RunQueryDsl;

        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS streamers (
                    source_id TEXT PRIMARY KEY NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS streamer_destinations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    source_id TEXT NOT NULL REFERENCES streamers(source_id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    community_id TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    thread_id TEXT,
                    live_channel_name TEXT,
                    offline_channel_name TEXT,
                    UNIQUE (source_id, community_id, channel_id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_streamer_destinations_source ON streamer_destinations(source_id)",
                "CREATE INDEX IF NOT EXISTS idx_streamer_destinations_community ON streamer_destinations(community_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn streamer_store(&self) -> Arc<dyn StreamerStore> {
        self.streamer_store.clone()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use chrono::Utc;
    use tempfile::NamedTempFile;

    use super::{DatabaseManager, DbType};
    use crate::config::DatabaseConfig;
    use crate::db::{Destination, StreamerMapping};

    fn sqlite_config(path: String) -> DatabaseConfig {
        DatabaseConfig {
            url: None,
            filename: Some(path),
            max_connections: Some(1),
            min_connections: Some(1),
        }
    }

    #[tokio::test]
    async fn sqlite_streamer_mapping_roundtrip() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = sqlite_config(file.path().to_string_lossy().to_string());

        let manager = DatabaseManager::new(&config).await.expect("db manager");
        assert_eq!(manager.db_type(), DbType::Sqlite);
        manager.migrate().await.expect("migrate");

        let mut mapping = StreamerMapping::new("SomeStreamer");
        let mut first = Destination::new("guild-1", "channel-1");
        first.live_channel_name = Some("🔴-live".to_string());
        first.offline_channel_name = Some("offline".to_string());
        let mut second = Destination::new("guild-2", "channel-2");
        second.thread_id = Some("thread-9".to_string());
        mapping.destinations = vec![first.clone(), second.clone()];

        manager
            .streamer_store()
            .upsert(&mapping)
            .await
            .expect("insert mapping");

        let loaded = manager.streamer_store().load_all().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].source_id, "somestreamer");
        assert_eq!(loaded[0].destinations, vec![first.clone(), second]);

        mapping.destinations = vec![first.clone()];
        mapping.updated_at = Utc::now();
        manager
            .streamer_store()
            .upsert(&mapping)
            .await
            .expect("update mapping");

        let reopened = DatabaseManager::new(&config).await.expect("db manager reopened");
        reopened.migrate().await.expect("migrate reopened");

        let persisted = reopened.streamer_store().load_all().await.expect("load after reopen");
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].destinations, vec![first]);

        reopened
            .streamer_store()
            .delete("somestreamer")
            .await
            .expect("delete mapping");

        let after_delete = reopened.streamer_store().load_all().await.expect("load after delete");
        assert!(after_delete.is_empty());
    }

    #[tokio::test]
    async fn memory_url_needs_no_migration() {
        let config = DatabaseConfig {
            url: Some("memory://".to_string()),
            filename: None,
            max_connections: None,
            min_connections: None,
        };

        let manager = DatabaseManager::new(&config).await.expect("db manager");
        assert_eq!(manager.db_type(), DbType::Memory);
        manager.migrate().await.expect("migrate is a no-op");
        assert!(manager.streamer_store().load_all().await.expect("load").is_empty());
    }
}
