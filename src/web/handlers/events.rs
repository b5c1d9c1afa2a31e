use salvo::prelude::*;
use serde_json::json;
use tracing::{debug, warn};

use super::{render_error, render_not_ready};
use crate::events::IngestEvent;
use crate::web::web_state;

/// Queues events from producers the chat connection cannot observe.
#[handler]
pub async fn ingest_event(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = web_state(depot) else {
        return render_not_ready(res);
    };
    let ingest = match req.parse_json::<IngestEvent>().await {
        Ok(ingest) => ingest,
        Err(err) => {
            return render_error(res, StatusCode::BAD_REQUEST, &format!("invalid event: {err}"));
        }
    };

    let events = ingest.into_chat_events(&state.redemption);
    let queued = events.len();
    for event in events {
        debug!(
            "ingested {} for {} from {}",
            event.kind.as_str(),
            event.source_channel,
            event.source_user
        );
        if state.events_tx.send(event).await.is_err() {
            warn!("dispatcher is gone, dropping ingested event");
            return render_error(res, StatusCode::SERVICE_UNAVAILABLE, "dispatcher is not running");
        }
    }

    res.status_code(StatusCode::ACCEPTED);
    res.render(Json(json!({ "queued": queued })));
}
