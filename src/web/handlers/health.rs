use salvo::prelude::*;
use serde_json::json;

use super::render_not_ready;
use crate::web::web_state;

#[handler]
pub async fn health_check(depot: &mut Depot, res: &mut Response) {
    let Some(state) = web_state(depot) else {
        return render_not_ready(res);
    };

    res.render(Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "streamers": state.registry.len(),
        "version": env!("CARGO_PKG_VERSION"),
    })));
}
