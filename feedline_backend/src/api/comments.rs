use super::{ApiError, ApiResult, AppState};
use crate::comments::{CommentService, CommentView, CreateCommentInput, ToggleCommentLikeOutput};
use crate::identity::RequestorIdentity;
use crate::paging::FeedPage;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

pub(crate) async fn create_comment(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(post_id): Path<i64>,
    Json(payload): Json<CreateCommentInput>,
) -> Result<(StatusCode, Json<CommentView>), ApiError> {
    let service = CommentService::new(state.context.clone());
    let comment = service.create_comment(identity, post_id, payload)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub(crate) async fn list_comments(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(post_id): Path<i64>,
    Query(page): Query<FeedPage>,
) -> ApiResult<Vec<CommentView>> {
    let service = CommentService::new(state.context.clone());
    Ok(Json(service.comments(identity, post_id, page)?))
}

pub(crate) async fn toggle_like(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(comment_id): Path<i64>,
) -> ApiResult<ToggleCommentLikeOutput> {
    let service = CommentService::new(state.context.clone());
    Ok(Json(service.toggle_comment_like(identity, comment_id)?))
}
