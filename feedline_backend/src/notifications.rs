//! Activity notifications.
//!
//! A recipient has at most one unread notification per (type, post). New
//! activity of the same kind merges into it, moving the actor to the front of
//! its actor list and refreshing `issued_at`. Once read, the notification
//! leaves the merge window and the next activity opens a new one. Read
//! notifications never become unread again.

use crate::context::FeedContext;
use crate::database::models::{CommentRecord, NotificationKind, NotificationRecord};
use crate::database::repositories::{
    NotificationRepository, PostRepository, SubscriptionRepository, UserRepository,
};
use crate::error::FeedError;
use crate::identity::RequestorIdentity;
use crate::mentions::collect_mentions;
use crate::paging::FeedPage;
use crate::users::UserSummary;
use crate::utils::now_utc_iso;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Clone)]
pub struct NotificationService {
    ctx: FeedContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub actors: Vec<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<i64>,
    pub read: bool,
    pub issued_at: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToggleSubscriptionOutput {
    pub subscribed: bool,
}

/// Where mentioned content lives; selects the notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionSource {
    Post,
    Comment,
}

impl MentionSource {
    fn kind(self) -> NotificationKind {
        match self {
            MentionSource::Post => NotificationKind::PostMention,
            MentionSource::Comment => NotificationKind::CommentMention,
        }
    }
}

impl NotificationService {
    pub fn new(ctx: FeedContext) -> Self {
        Self { ctx }
    }

    /// Records that `follower_id` followed `followee_id`. Returns `None` when
    /// the follower is already listed on the open follow notification.
    pub fn notify_follow(
        &self,
        follower_id: i64,
        followee_id: i64,
    ) -> Result<Option<NotificationRecord>, FeedError> {
        let issued_at = now_utc_iso();
        let record = self
            .ctx
            .database
            .with_transaction(|repos| -> Result<_, FeedError> {
                let notifications = repos.notifications();
                if notifications.has_unread_follow_actor(followee_id, follower_id)? {
                    return Ok(None);
                }
                let record = match notifications.find_unread_follow(followee_id)? {
                    Some(open) => notifications.prepend_actor(open.id, follower_id, &issued_at)?,
                    None => notifications
                        .create(
                            followee_id,
                            NotificationKind::Follow,
                            &[follower_id],
                            None,
                            &issued_at,
                        )
                        .map_err(|err| FeedError::missing_on_fk(err, "user"))?,
                };
                Ok(Some(record))
            })?;
        if let Some(record) = &record {
            tracing::debug!(
                notification_id = record.id,
                follower_id,
                followee_id,
                "follow notification issued"
            );
        }
        Ok(record)
    }

    /// Notifies every subscriber of the commented post except its author.
    pub fn notify_comment(
        &self,
        comment: &CommentRecord,
    ) -> Result<Vec<NotificationRecord>, FeedError> {
        let issued_at = now_utc_iso();
        let records = self.ctx.database.with_transaction(|repos| {
            repos.notifications().upsert_for_subscribers(
                NotificationKind::Comment,
                comment.post_id,
                comment.user_id,
                &issued_at,
            )
        })?;
        tracing::debug!(
            comment_id = comment.id,
            post_id = comment.post_id,
            recipients = records.len(),
            "comment notifications issued"
        );
        Ok(records)
    }

    /// Notifies the existing users mentioned in `content`. Authors are never
    /// notified of their own mentions.
    pub fn notify_mention(
        &self,
        content: &str,
        author_id: i64,
        post_id: i64,
        source: MentionSource,
    ) -> Result<Vec<NotificationRecord>, FeedError> {
        let usernames = collect_mentions(content);
        if usernames.is_empty() {
            return Ok(Vec::new());
        }
        let issued_at = now_utc_iso();
        let records = self.ctx.database.with_transaction(|repos| {
            repos.notifications().upsert_for_usernames(
                source.kind(),
                &usernames,
                post_id,
                author_id,
                &issued_at,
            )
        })?;
        tracing::debug!(
            post_id,
            author_id,
            mentioned = usernames.len(),
            recipients = records.len(),
            "mention notifications issued"
        );
        Ok(records)
    }

    pub fn notifications(
        &self,
        viewer: RequestorIdentity,
        page: FeedPage,
    ) -> Result<Vec<NotificationView>, FeedError> {
        let user_id = viewer.require()?;
        let last = self.ctx.paging.normalize(page.last);
        let (records, authors) = self.ctx.database.with_repositories(|repos| {
            let records = repos.notifications().list(user_id, last, page.before)?;
            let mut actor_ids: Vec<i64> = records
                .iter()
                .flat_map(|record| record.actors.iter().copied())
                .collect();
            actor_ids.sort_unstable();
            actor_ids.dedup();
            let authors = repos.users().authors(&actor_ids)?;
            Ok((records, authors))
        })?;

        let actors: HashMap<i64, UserSummary> = authors
            .into_iter()
            .map(|author| (author.id, UserSummary::from_author(author, &self.ctx.origin)))
            .collect();
        Ok(records
            .into_iter()
            .map(|record| NotificationView::from_record(record, &actors))
            .collect())
    }

    pub fn unread_count(&self, viewer: RequestorIdentity) -> Result<i64, FeedError> {
        let user_id = viewer.require()?;
        Ok(self
            .ctx
            .database
            .with_repositories(|repos| repos.notifications().unread_count(user_id))?)
    }

    /// Marks one of the viewer's notifications read. Re-marking is a no-op.
    pub fn mark_read(&self, viewer: RequestorIdentity, id: i64) -> Result<(), FeedError> {
        let user_id = viewer.require()?;
        let owned = self
            .ctx
            .database
            .with_repositories(|repos| repos.notifications().mark_read(user_id, id))?;
        if !owned {
            return Err(FeedError::NotFound("notification"));
        }
        Ok(())
    }

    pub fn mark_all_read(&self, viewer: RequestorIdentity) -> Result<usize, FeedError> {
        let user_id = viewer.require()?;
        let marked = self
            .ctx
            .database
            .with_repositories(|repos| repos.notifications().mark_all_read(user_id))?;
        tracing::debug!(user_id, marked, "notifications marked read");
        Ok(marked)
    }

    pub fn toggle_post_subscription(
        &self,
        viewer: RequestorIdentity,
        post_id: i64,
    ) -> Result<ToggleSubscriptionOutput, FeedError> {
        let user_id = viewer.require()?;
        let subscribed = self
            .ctx
            .database
            .with_transaction(|repos| -> Result<_, FeedError> {
                if repos.posts().get(None, post_id)?.is_none() {
                    return Err(FeedError::NotFound("post"));
                }
                let subscriptions = repos.subscriptions();
                if subscriptions.is_subscribed(user_id, post_id)? {
                    subscriptions.unsubscribe(user_id, post_id)?;
                    Ok(false)
                } else {
                    subscriptions
                        .subscribe(user_id, post_id)
                        .map_err(|err| FeedError::missing_on_fk(err, "post"))?;
                    Ok(true)
                }
            })?;
        Ok(ToggleSubscriptionOutput { subscribed })
    }
}

impl NotificationView {
    fn from_record(record: NotificationRecord, actors: &HashMap<i64, UserSummary>) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            actors: record
                .actors
                .iter()
                .filter_map(|id| actors.get(id).cloned())
                .collect(),
            post_id: record.post_id,
            read: record.read,
            issued_at: record.issued_at,
        }
    }
}
