use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::manager::Pool;
use crate::db::schema::{streamer_destinations, streamers};

use super::{
    DatabaseError,
    models::{Destination, StreamerMapping},
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = streamers)]
struct DbStreamer {
    source_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = streamers)]
struct NewStreamer<'a> {
    source_id: &'a str,
    created_at: &'a DateTime<Utc>,
    updated_at: &'a DateTime<Utc>,
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

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct PostgresStreamerStore {
    pool: Pool,
}

impl PostgresStreamerStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::StreamerStore for PostgresStreamerStore {
    async fn load_all(&self) -> Result<Vec<StreamerMapping>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            let rows = streamers::table
                .order(streamers::source_id.asc())
                .select(DbStreamer::as_select())
                .load::<DbStreamer>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let destination_rows = streamer_destinations::table
                .order((
                    streamer_destinations::source_id.asc(),
                    streamer_destinations::position.asc(),
                ))
                .select(DbDestination::as_select())
                .load::<DbDestination>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let mut grouped: BTreeMap<String, Vec<Destination>> = BTreeMap::new();
            for row in destination_rows {
                grouped
                    .entry(row.source_id.clone())
                    .or_default()
                    .push(row.into());
            }

            Ok(rows
                .into_iter()
                .map(|row| StreamerMapping {
                    destinations: grouped.remove(&row.source_id).unwrap_or_default(),
                    source_id: row.source_id,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                })
                .collect())
        })
        .await
    }

    async fn upsert(&self, mapping: &StreamerMapping) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let mapping = mapping.clone();
        with_connection(pool, move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let new_streamer = NewStreamer {
                    source_id: &mapping.source_id,
                    created_at: &mapping.created_at,
                    updated_at: &mapping.updated_at,
                };

                diesel::insert_into(streamers::table)
                    .values(&new_streamer)
                    .on_conflict(streamers::source_id)
                    .do_update()
                    .set(streamers::updated_at.eq(mapping.updated_at))
                    .execute(conn)?;

                diesel::delete(
                    streamer_destinations::table
                        .filter(streamer_destinations::source_id.eq(mapping.source_id.as_str())),
                )
                .execute(conn)?;

                let rows: Vec<NewDestination<'_>> = mapping
                    .destinations
                    .iter()
                    .enumerate()
                    .map(|(position, destination)| NewDestination {
                        source_id: &mapping.source_id,
                        position: position as i32,
                        community_id: &destination.community_id,
                        channel_id: &destination.channel_id,
                        thread_id: destination.thread_id.as_deref(),
                        live_channel_name: destination.live_channel_name.as_deref(),
                        offline_channel_name: destination.offline_channel_name.as_deref(),
                    })
                    .collect();

                if !rows.is_empty() {
                    diesel::insert_into(streamer_destinations::table)
                        .values(&rows)
                        .execute(conn)?;
                }

                Ok(())
            })
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete(&self, source_id: &str) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let source_id = source_id.to_string();
        with_connection(pool, move |conn| {
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
    }
}
