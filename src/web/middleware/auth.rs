use salvo::prelude::*;
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::warn;

use crate::web::handlers::{
    events::ingest_event,
    health::health_check,
    provisioning::{add_destination, get_streamer, list_community_streamers, remove_destination},
};
use crate::web::metrics::metrics_endpoint;
use crate::web::web_state;

fn bearer_token(req: &Request) -> Option<String> {
    let value = req.header::<String>("authorization")?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// Rejects admin requests without the configured bearer token. Open when no
/// token is configured.
#[handler]
pub async fn require_admin_token(req: &mut Request, depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
    let Some(state) = web_state(depot) else {
        res.status_code(StatusCode::SERVICE_UNAVAILABLE);
        res.render(Json(json!({ "error": "relay is not ready" })));
        ctrl.skip_rest();
        return;
    };
    let Some(expected) = state.admin_token.as_ref() else {
        return;
    };

    if bearer_token(req).as_deref() != Some(expected.expose_secret()) {
        warn!("rejected admin request to {}", req.uri().path());
        res.status_code(StatusCode::UNAUTHORIZED);
        res.render(Json(json!({ "error": "missing or invalid bearer token" })));
        ctrl.skip_rest();
    }
}

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("metrics").get(metrics_endpoint))
        .push(
            Router::with_path("admin")
                .hoop(require_admin_token)
                .push(
                    Router::with_path("communities/{community_id}/streamers")
                        .get(list_community_streamers),
                )
                .push(Router::with_path("streamers/{source_id}").get(get_streamer))
                .push(Router::with_path("streamers/{source_id}/destinations").post(add_destination))
                .push(
                    Router::with_path("streamers/{source_id}/destinations/{community_id}/{channel_id}")
                        .delete(remove_destination),
                )
                .push(Router::with_path("events").post(ingest_event)),
        )
}
