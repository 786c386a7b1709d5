use super::{ApiError, ApiResult, AppState};
use crate::identity::RequestorIdentity;
use crate::paging::ListingPage;
use crate::users::{CreateUserInput, ToggleFollowOutput, UserProfile, UserService};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchQuery {
    #[serde(default)]
    search: String,
    #[serde(default)]
    first: Option<i64>,
    #[serde(default)]
    after: Option<String>,
}

pub(crate) async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserInput>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let service = UserService::new(state.context.clone());
    let profile = service.create_user(payload)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub(crate) async fn search_users(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<UserProfile>> {
    let service = UserService::new(state.context.clone());
    let page = ListingPage {
        first: query.first,
        after: query.after,
    };
    let users = service.search_users(identity, &query.search, &page)?;
    Ok(Json(users))
}

pub(crate) async fn user_profile(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(username): Path<String>,
) -> ApiResult<UserProfile> {
    let service = UserService::new(state.context.clone());
    Ok(Json(service.user_profile(identity, &username)?))
}

pub(crate) async fn toggle_follow(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(username): Path<String>,
) -> ApiResult<ToggleFollowOutput> {
    let service = UserService::new(state.context.clone());
    Ok(Json(service.toggle_follow(identity, &username)?))
}

pub(crate) async fn followers(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(username): Path<String>,
    Query(page): Query<ListingPage>,
) -> ApiResult<Vec<UserProfile>> {
    let service = UserService::new(state.context.clone());
    Ok(Json(service.followers(identity, &username, &page)?))
}

pub(crate) async fn followings(
    State(state): State<AppState>,
    identity: RequestorIdentity,
    Path(username): Path<String>,
    Query(page): Query<ListingPage>,
) -> ApiResult<Vec<UserProfile>> {
    let service = UserService::new(state.context.clone());
    Ok(Json(service.followings(identity, &username, &page)?))
}
