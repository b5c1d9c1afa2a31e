use salvo::prelude::*;
use serde_json::json;

pub mod events;
pub mod health;
pub mod provisioning;

pub(crate) fn render_error(res: &mut Response, status: StatusCode, message: &str) {
    res.status_code(status);
    res.render(Json(json!({ "error": message })));
}

pub(crate) fn render_not_ready(res: &mut Response) {
    render_error(res, StatusCode::SERVICE_UNAVAILABLE, "relay is not ready");
}
