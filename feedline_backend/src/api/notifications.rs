use super::{ApiError, ApiResult, AppState};
use crate::identity::RequestorIdentity;
use crate::notifications::{NotificationService, NotificationView, ToggleSubscriptionOutput};
use crate::paging::FeedPage;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct UnreadCountResponse {
    count: i64,
}

pub(crate) async fn list_notifications(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Query(page): Query<FeedPage>,
) -> ApiResult<Vec<NotificationView>> {
    let service = NotificationService::new(state.context.clone());
    Ok(Json(service.notifications(identity, page)?))
}

pub(crate) async fn unread_count(
    State(state): State<AppState>,
    identity: RequestorIdentity,
) -> ApiResult<UnreadCountResponse> {
    let service = NotificationService::new(state.context.clone());
    let count = service.unread_count(identity)?;
    Ok(Json(UnreadCountResponse { count }))
}

pub(crate) async fn mark_all_read(
    State(state): State<AppState>,
    identity: RequestorIdentity,
) -> Result<StatusCode, ApiError> {
    let service = NotificationService::new(state.context.clone());
    service.mark_all_read(identity)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn mark_read(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(notification_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let service = NotificationService::new(state.context.clone());
    service.mark_read(identity, notification_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn toggle_subscription(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(post_id): Path<i64>,
) -> ApiResult<ToggleSubscriptionOutput> {
    let service = NotificationService::new(state.context.clone());
    Ok(Json(service.toggle_post_subscription(identity, post_id)?))
}
