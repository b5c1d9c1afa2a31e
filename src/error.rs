use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{community_id}/{channel_id} is already a destination of {source_id}")]
    DuplicateDestination {
        source_id: String,
        community_id: String,
        channel_id: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error("webhook unavailable for channel {channel_id}: {reason}")]
    WebhookUnavailable { channel_id: String, reason: String },
    #[error("missing permissions in channel {channel_id}: {missing}")]
    PermissionDenied { channel_id: String, missing: String },
    #[error("failed to materialize emote {name}: {reason}")]
    EmoteMaterializationFailed { name: String, reason: String },
    #[error("delivery to channel {channel_id} failed: {reason}")]
    DeliveryFailed { channel_id: String, reason: String },
    #[error(transparent)]
    Store(#[from] DatabaseError),
}
