use super::{ApiError, ApiResult, AppState};
use crate::identity::RequestorIdentity;
use crate::paging::FeedPage;
use crate::posts::{CreatePostInput, PostService, PostView, ToggleLikeOutput};
use crate::timeline::TimelineItem;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

pub(crate) async fn create_post(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Json(payload): Json<CreatePostInput>,
) -> Result<(StatusCode, Json<TimelineItem>), ApiError> {
    let service = PostService::new(state.context.clone());
    let item = service.create_post(identity, payload)?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub(crate) async fn get_post(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(post_id): Path<i64>,
) -> ApiResult<PostView> {
    let service = PostService::new(state.context.clone());
    Ok(Json(service.post(identity, post_id)?))
}

pub(crate) async fn posts_by_user(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(username): Path<String>,
    Query(page): Query<FeedPage>,
) -> ApiResult<Vec<PostView>> {
    let service = PostService::new(state.context.clone());
    Ok(Json(service.posts_by_user(identity, &username, page)?))
}

pub(crate) async fn toggle_like(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(post_id): Path<i64>,
) -> ApiResult<ToggleLikeOutput> {
    let service = PostService::new(state.context.clone());
    Ok(Json(service.toggle_post_like(identity, post_id)?))
}
