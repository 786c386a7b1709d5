use crate::context::FeedContext;
use crate::database::models::CommentDetailRecord;
use crate::database::repositories::{
    CommentRepository, PostRepository, SubscriptionRepository, UserRepository,
};
use crate::error::FeedError;
use crate::identity::RequestorIdentity;
use crate::notifications::{MentionSource, NotificationService};
use crate::paging::FeedPage;
use crate::users::UserSummary;
use crate::utils::now_utc_iso;
use serde::{Deserialize, Serialize};

const MAX_COMMENT_CHARS: usize = 480;

#[derive(Clone)]
pub struct CommentService {
    ctx: FeedContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub post_id: i64,
    pub content: String,
    pub likes_count: i64,
    pub created_at: String,
    pub user: UserSummary,
    pub mine: bool,
    pub liked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommentInput {
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToggleCommentLikeOutput {
    pub liked: bool,
    pub likes_count: i64,
}

impl CommentService {
    pub fn new(ctx: FeedContext) -> Self {
        Self { ctx }
    }

    /// Inserts the comment, bumps the post's comment counter and subscribes
    /// the commenter in one transaction. Subscriber and mention notifications
    /// follow in the background.
    pub fn create_comment(
        &self,
        viewer: RequestorIdentity,
        post_id: i64,
        input: CreateCommentInput,
    ) -> Result<CommentView, FeedError> {
        let user_id = viewer.require()?;
        let content = input.content.trim();
        if content.is_empty() || content.chars().count() > MAX_COMMENT_CHARS {
            return Err(FeedError::ValidationFailed(format!(
                "content must be between 1 and {MAX_COMMENT_CHARS} characters"
            )));
        }

        let created_at = now_utc_iso();
        let comment = self
            .ctx
            .database
            .with_transaction(|repos| -> Result<_, FeedError> {
                if repos.posts().get(None, post_id)?.is_none() {
                    return Err(FeedError::NotFound("post"));
                }
                let comment = repos
                    .comments()
                    .create(user_id, post_id, content, &created_at)
                    .map_err(|err| FeedError::missing_on_fk(err, "user"))?;
                repos.posts().adjust_comments(post_id, 1)?;
                repos.subscriptions().subscribe(user_id, post_id)?;
                let author = repos
                    .users()
                    .authors(&[user_id])?
                    .pop()
                    .ok_or(FeedError::NotFound("user"))?;
                Ok(CommentDetailRecord {
                    comment,
                    author,
                    liked: false,
                })
            })?;
        let comment_id = comment.comment.id;
        tracing::info!(comment_id, post_id, user_id, "comment created");

        let notifications = NotificationService::new(self.ctx.clone());
        let record = comment.comment.clone();
        self.ctx.tasks.spawn("comment_notifications", move || {
            notifications.notify_comment(&record)?;
            notifications.notify_mention(
                &record.content,
                record.user_id,
                record.post_id,
                MentionSource::Comment,
            )?;
            Ok(())
        });

        Ok(CommentView::from_detail(comment, Some(user_id), &self.ctx.origin))
    }

    pub fn comments(
        &self,
        viewer: RequestorIdentity,
        post_id: i64,
        page: FeedPage,
    ) -> Result<Vec<CommentView>, FeedError> {
        let last = self.ctx.paging.normalize(page.last);
        let records = self
            .ctx
            .database
            .with_repositories(|repos| {
                if repos.posts().get(None, post_id)?.is_none() {
                    return Ok(None);
                }
                let comments = repos
                    .comments()
                    .list(viewer.user_id(), post_id, last, page.before)?;
                Ok(Some(comments))
            })?
            .ok_or(FeedError::NotFound("post"))?;
        Ok(records
            .into_iter()
            .map(|record| CommentView::from_detail(record, viewer.user_id(), &self.ctx.origin))
            .collect())
    }

    pub fn toggle_comment_like(
        &self,
        viewer: RequestorIdentity,
        comment_id: i64,
    ) -> Result<ToggleCommentLikeOutput, FeedError> {
        let user_id = viewer.require()?;
        let output = self
            .ctx
            .database
            .with_transaction(|repos| -> Result<_, FeedError> {
                let comments = repos.comments();
                let liked = !comments.is_liked(user_id, comment_id)?;
                if liked {
                    comments
                        .like(user_id, comment_id)
                        .map_err(|err| FeedError::missing_on_fk(err, "comment"))?;
                } else {
                    comments.unlike(user_id, comment_id)?;
                }
                let likes_count = comments.adjust_likes(comment_id, if liked { 1 } else { -1 })?;
                Ok(ToggleCommentLikeOutput { liked, likes_count })
            })?;
        tracing::debug!(comment_id, user_id, liked = output.liked, "comment like toggled");
        Ok(output)
    }
}

impl CommentView {
    fn from_detail(record: CommentDetailRecord, viewer: Option<i64>, origin: &str) -> Self {
        let comment = record.comment;
        Self {
            id: comment.id,
            post_id: comment.post_id,
            content: comment.content,
            likes_count: comment.likes_count,
            created_at: comment.created_at,
            mine: viewer == Some(comment.user_id),
            user: UserSummary::from_author(record.author, origin),
            liked: record.liked,
        }
    }
}
