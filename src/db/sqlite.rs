use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::schema_sqlite::{streamer_destinations, streamers};

use super::{
    DatabaseError,
    models::{Destination, StreamerMapping},
};

// SQLite keeps timestamps as RFC 3339 text
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = streamers)]
struct DbStreamer {
    source_id: String,
    created_at: String,
    updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = streamers)]
struct NewStreamer<'a> {
    source_id: &'a str,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = streamer_destinations)]
struct DbDestination {
    source_id: String,
    community_id: String,
    channel_id: String,
    thread_id: Option<String>,
    live_channel_name: Option<String>,
    offline_channel_name: Option<String>,
}

impl From<DbDestination> for Destination {
    fn from(value: DbDestination) -> Self {
        Self {
            community_id: value.community_id,
            channel_id: value.channel_id,
            thread_id: value.thread_id,
            live_channel_name: value.live_channel_name,
            offline_channel_name: value.offline_channel_name,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = streamer_destinations)]
struct NewDestination<'a> {
    source_id: &'a str,
    position: i32,
    community_id: &'a str,
    channel_id: &'a str,
    thread_id: Option<&'a str>,
    live_channel_name: Option<&'a str>,
    offline_channel_name: Option<&'a str>,
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

pub struct SqliteStreamerStore {
    db_path: Arc<String>,
}

impl SqliteStreamerStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::StreamerStore for SqliteStreamerStore {
    async fn load_all(&self) -> Result<Vec<StreamerMapping>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;

            let rows = streamers::table
                .order(streamers::source_id.asc())
                .select(DbStreamer::as_select())
                .load::<DbStreamer>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let destination_rows = streamer_destinations::table
                .order((
                    streamer_destinations::source_id.asc(),
                    streamer_destinations::position.asc(),
                ))
                .select(DbDestination::as_select())
                .load::<DbDestination>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let mut grouped: BTreeMap<String, Vec<Destination>> = BTreeMap::new();
            for row in destination_rows {
                grouped
                    .entry(row.source_id.clone())
                    .or_default()
                    .push(row.into());
            }

            rows.into_iter()
                .map(|row| -> Result<StreamerMapping, DatabaseError> {
                    Ok(StreamerMapping {
                        destinations: grouped.remove(&row.source_id).unwrap_or_default(),
                        created_at: string_to_datetime(&row.created_at)?,
                        updated_at: string_to_datetime(&row.updated_at)?,
                        source_id: row.source_id,
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert(&self, mapping: &StreamerMapping) -> Result<(), DatabaseError> {
        let mapping = mapping.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let new_streamer = NewStreamer {
                    source_id: &mapping.source_id,
                    created_at: datetime_to_string(&mapping.created_at),
                    updated_at: datetime_to_string(&mapping.updated_at),
                };

                diesel::insert_into(streamers::table)
                    .values(&new_streamer)
                    .on_conflict(streamers::source_id)
                    .do_update()
                    .set(streamers::updated_at.eq(datetime_to_string(&mapping.updated_at)))
                    .execute(conn)?;

                diesel::delete(
                    streamer_destinations::table
                        .filter(streamer_destinations::source_id.eq(mapping.source_id.as_str())),
                )
                .execute(conn)?;

                for (position, destination) in mapping.destinations.iter().enumerate() {
                    let row = NewDestination {
                        source_id: &mapping.source_id,
                        position: position as i32,
                        community_id: &destination.community_id,
                        channel_id: &destination.channel_id,
                        thread_id: destination.thread_id.as_deref(),
                        live_channel_name: destination.live_channel_name.as_deref(),
                        offline_channel_name: destination.offline_channel_name.as_deref(),
                    };
                    diesel::insert_into(streamer_destinations::table)
                        .values(&row)
                        .execute(conn)?;
                }

                Ok(())
            })
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete(&self, source_id: &str) -> Result<(), DatabaseError> {
        let source_id = source_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::delete(
                    streamer_destinations::table
                        .filter(streamer_destinations::source_id.eq(source_id.as_str())),
                )
                .execute(conn)?;
                diesel::delete(streamers::table.filter(streamers::source_id.eq(source_id.as_str())))
                    .execute(conn)?;
                Ok(())
            })
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
