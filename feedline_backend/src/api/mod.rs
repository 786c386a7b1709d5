mod comments;
mod notifications;
mod posts;
mod timeline;
mod users;

use crate::config::FeedlineConfig;
use crate::context::FeedContext;
use crate::error::FeedError;
use crate::identity::RequestorIdentity;
use anyhow::Result;
use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Header carrying the authenticated user id, set by the upstream
/// authenticator.
pub const USER_HEADER: &str = "x-feedline-user";

#[derive(Clone)]
pub struct AppState {
    pub config: FeedlineConfig,
    pub context: FeedContext,
}

pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn into_response_parts(self) -> (StatusCode, ErrorResponse) {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    message: "unauthorized".into(),
                },
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse { message: msg }),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse { message: msg }),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, ErrorResponse { message: msg }),
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        message: "internal server error".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.into_response_parts();
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<FeedError> for ApiError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Unauthorized => ApiError::Unauthorized,
            FeedError::NotFound(_) => ApiError::NotFound(err.to_string()),
            FeedError::Conflict(msg) => ApiError::Conflict(msg),
            FeedError::ValidationFailed(msg) => ApiError::BadRequest(msg),
            FeedError::Template(err) => ApiError::Internal(err.into()),
            FeedError::Internal(err) => ApiError::Internal(err),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

/// Absent header means anonymous; a header that is not a positive user id is
/// rejected.
#[async_trait]
impl<S> FromRequestParts<S> for RequestorIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_HEADER) else {
            return Ok(RequestorIdentity::Anonymous);
        };
        raw.to_str()
            .ok()
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(RequestorIdentity::user)
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    api_port: u16,
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        api_port: state.config.api_port,
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/users", get(users::search_users).post(users::create_user))
        .route("/users/:username", get(users::user_profile))
        .route("/users/:username/follow", post(users::toggle_follow))
        .route("/users/:username/followers", get(users::followers))
        .route("/users/:username/followings", get(users::followings))
        .route("/users/:username/posts", get(posts::posts_by_user))
        .route("/posts", post(posts::create_post))
        .route("/posts/:id", get(posts::get_post))
        .route("/posts/:id/toggle_like", post(posts::toggle_like))
        .route(
            "/posts/:id/toggle_subscription",
            post(notifications::toggle_subscription),
        )
        .route(
            "/posts/:id/comments",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route("/comments/:id/toggle_like", post(comments::toggle_like))
        .route("/timeline", get(timeline::timeline_handler))
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/unread_count",
            get(notifications::unread_count),
        )
        .route("/notifications/mark_as_read", post(notifications::mark_all_read))
        .route(
            "/notifications/:id/mark_as_read",
            post(notifications::mark_read),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Binds the configured port (or the next free one) and serves until
/// `shutdown` resolves.
pub async fn serve_http<F>(config: FeedlineConfig, context: FeedContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (listener, actual_port) = find_available_port(config.api_port).await?;
    if actual_port != config.api_port {
        tracing::warn!(
            requested_port = config.api_port,
            actual_port = actual_port,
            "Configured port was in use, bound to next available port"
        );
    }
    serve_listener(listener, config, context, shutdown).await
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn serve_listener<F>(
    listener: TcpListener,
    config: FeedlineConfig,
    context: FeedContext,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = listener.local_addr()?;
    let live = context.live.clone();
    let router = router(AppState { config, context });
    tracing::info!(?addr, "HTTP server listening");
    // Live feeds never end on their own, so close them before axum waits on
    // open connections.
    let shutdown = async move {
        shutdown.await;
        tracing::info!("shutdown requested, closing live feeds");
        live.close();
    };
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Tries to bind to the given port, or finds the next available port
async fn find_available_port(start_port: u16) -> Result<(TcpListener, u16)> {
    const MAX_PORT_ATTEMPTS: u16 = 100;

    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port.saturating_add(offset);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => {
                if offset == 0 {
                    tracing::debug!(port, error = %e, "Port in use, trying next port");
                }
                continue;
            }
        }
    }

    anyhow::bail!(
        "Could not find available port in range {}-{}",
        start_port,
        start_port.saturating_add(MAX_PORT_ATTEMPTS - 1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/timeline");
        if let Some(value) = header {
            builder = builder.header(USER_HEADER, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn identity_header_parsing() {
        let mut anonymous = parts_with(None);
        assert_eq!(
            RequestorIdentity::from_request_parts(&mut anonymous, &()).await.unwrap(),
            RequestorIdentity::Anonymous
        );

        let mut user = parts_with(Some(" 42 "));
        assert_eq!(
            RequestorIdentity::from_request_parts(&mut user, &()).await.unwrap(),
            RequestorIdentity::user(42)
        );

        for bad in ["abc", "-3", "0"] {
            let mut parts = parts_with(Some(bad));
            assert!(matches!(
                RequestorIdentity::from_request_parts(&mut parts, &()).await,
                Err(ApiError::Unauthorized)
            ));
        }
    }

    #[test]
    fn feed_errors_map_to_statuses() {
        let cases = [
            (FeedError::Unauthorized, StatusCode::UNAUTHORIZED),
            (FeedError::NotFound("post"), StatusCode::NOT_FOUND),
            (FeedError::Conflict("taken".into()), StatusCode::CONFLICT),
            (FeedError::ValidationFailed("bad".into()), StatusCode::BAD_REQUEST),
            (
                FeedError::Internal(anyhow::anyhow!("disk on fire")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let (actual, _) = ApiError::from(err).into_response_parts();
            assert_eq!(actual, status);
        }
    }
}
