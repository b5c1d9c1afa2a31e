use salvo::prelude::*;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{render_error, render_not_ready};
use crate::db::{Destination, normalize_source_id};
use crate::error::RelayError;
use crate::twitch::is_valid_login;
use crate::web::web_state;

#[derive(Debug, Serialize)]
struct StreamerEntry<'a> {
    source_id: &'a str,
    destinations: Vec<&'a Destination>,
}

fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::DuplicateDestination { .. } => StatusCode::CONFLICT,
        RelayError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
        RelayError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn source_param(req: &mut Request, res: &mut Response) -> Option<String> {
    let source_id = normalize_source_id(&req.param::<String>("source_id").unwrap_or_default());
    if !is_valid_login(&source_id) {
        render_error(res, StatusCode::BAD_REQUEST, "invalid twitch channel name");
        return None;
    }
    Some(source_id)
}

#[handler]
pub async fn list_community_streamers(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = web_state(depot) else {
        return render_not_ready(res);
    };
    let community_id = req.param::<String>("community_id").unwrap_or_default();

    let listing = state.registry.list_destinations_for_community(&community_id);
    let mut streamers: Vec<StreamerEntry<'_>> = Vec::new();
    for (source_id, destination) in &listing {
        match streamers.last_mut() {
            Some(entry) if entry.source_id == source_id => entry.destinations.push(destination),
            _ => streamers.push(StreamerEntry {
                source_id,
                destinations: vec![destination],
            }),
        }
    }

    res.render(Json(json!({
        "community_id": community_id,
        "count": streamers.len(),
        "streamers": streamers,
    })));
}

#[handler]
pub async fn get_streamer(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = web_state(depot) else {
        return render_not_ready(res);
    };
    let Some(source_id) = source_param(req, res) else {
        return;
    };

    match state.registry.find_by_source(&source_id) {
        Some(mapping) => res.render(Json(json!({ "mapping": mapping }))),
        None => render_error(res, StatusCode::NOT_FOUND, "streamer is not monitored"),
    }
}

#[handler]
pub async fn add_destination(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = web_state(depot) else {
        return render_not_ready(res);
    };
    let Some(source_id) = source_param(req, res) else {
        return;
    };
    let destination = match req.parse_json::<Destination>().await {
        Ok(destination) => destination,
        Err(err) => {
            return render_error(res, StatusCode::BAD_REQUEST, &format!("invalid destination body: {err}"));
        }
    };

    match state.registry.add_destination(&source_id, destination).await {
        Ok(mapping) => {
            info!(
                "added destination for {} via admin api, {} total",
                source_id,
                mapping.destinations.len()
            );
            res.status_code(StatusCode::CREATED);
            res.render(Json(json!({ "ok": true, "mapping": mapping })));
        }
        Err(err) => render_error(res, status_for(&err), &err.to_string()),
    }
}

#[handler]
pub async fn remove_destination(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = web_state(depot) else {
        return render_not_ready(res);
    };
    let Some(source_id) = source_param(req, res) else {
        return;
    };
    let community_id = req.param::<String>("community_id").unwrap_or_default();
    let channel_id = req.param::<String>("channel_id").unwrap_or_default();

    match state
        .registry
        .remove_destination(&source_id, &community_id, &channel_id)
        .await
    {
        Ok(_) => {
            info!(
                "removed destination {}/{} of {} via admin api",
                community_id, channel_id, source_id
            );
            res.render(Json(json!({
                "ok": true,
                "still_monitored": state.registry.find_by_source(&source_id).is_some(),
            })));
        }
        Err(err) => render_error(res, status_for(&err), &err.to_string()),
    }
}
