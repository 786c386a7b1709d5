use super::{ApiError, AppState};
use crate::identity::RequestorIdentity;
use crate::paging::FeedPage;
use crate::timeline::TimelineService;
use axum::extract::{Query, State};
use axum::http::header::ACCEPT;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("text/event-stream"))
}

/// Paged feed read, or the live feed when the client accepts an event stream.
pub(crate) async fn timeline_handler(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    headers: HeaderMap,
    Query(page): Query<FeedPage>,
) -> Result<Response, ApiError> {
    let service = TimelineService::new(state.context.clone());
    if !wants_event_stream(&headers) {
        let items = service.feed(identity, page)?;
        return Ok(Json(items).into_response());
    }

    let feed = service.subscribe(identity)?;
    let viewer = feed.viewer();
    let channel = feed.channel();
    tracing::info!(viewer, channel, "live feed opened");
    let events = feed.take_until(state.context.live.closed()).map(move |item| {
        Event::default().json_data(&item).map_err(|err| {
            tracing::warn!(viewer, channel, error = %err, "failed to encode live item, closing stream");
            err
        })
    });
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
