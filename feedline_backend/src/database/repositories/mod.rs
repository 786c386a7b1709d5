mod comments;
mod follows;
mod notifications;
mod posts;
mod subscriptions;
mod timeline;
mod users;

use super::models::{
    AuthorRecord, CommentDetailRecord, CommentRecord, FannedOutItem, NewPost, NotificationKind,
    NotificationRecord, PostDetailRecord, PostRecord, TimelineItemRecord, UserListingRecord,
    UserRecord,
};
use crate::query::BuiltQuery;
use anyhow::Result;
use rusqlite::{params_from_iter, Connection, Row};

pub trait UserRepository {
    fn create(&self, email: &str, username: &str, created_at: &str) -> Result<UserRecord>;
    fn get(&self, id: i64) -> Result<Option<UserRecord>>;
    fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>>;
    /// Author summaries for `ids`, in no particular order. Unknown ids are skipped.
    fn authors(&self, ids: &[i64]) -> Result<Vec<AuthorRecord>>;
    /// `(viewer follows user, user follows viewer)`.
    fn relationship(&self, viewer: i64, user_id: i64) -> Result<(bool, bool)>;
    fn search(
        &self,
        viewer: Option<i64>,
        search: &str,
        first: i64,
        after: &str,
    ) -> Result<Vec<UserListingRecord>>;
    fn followers(
        &self,
        viewer: Option<i64>,
        user_id: i64,
        first: i64,
        after: &str,
    ) -> Result<Vec<UserListingRecord>>;
    fn followings(
        &self,
        viewer: Option<i64>,
        user_id: i64,
        first: i64,
        after: &str,
    ) -> Result<Vec<UserListingRecord>>;
    /// Shifts both follow counters by `delta`, never below zero.
    fn adjust_follow_counts(&self, follower_id: i64, following_id: i64, delta: i64) -> Result<()>;
}

pub trait FollowRepository {
    fn exists(&self, follower_id: i64, following_id: i64) -> Result<bool>;
    fn insert(&self, follower_id: i64, following_id: i64, created_at: &str) -> Result<()>;
    fn delete(&self, follower_id: i64, following_id: i64) -> Result<bool>;
}

pub trait PostRepository {
    fn create(&self, post: &NewPost<'_>) -> Result<PostRecord>;
    fn get(&self, viewer: Option<i64>, id: i64) -> Result<Option<PostDetailRecord>>;
    fn list_by_user(
        &self,
        viewer: Option<i64>,
        user_id: i64,
        last: i64,
        before: Option<i64>,
    ) -> Result<Vec<PostDetailRecord>>;
    fn is_liked(&self, user_id: i64, post_id: i64) -> Result<bool>;
    fn like(&self, user_id: i64, post_id: i64) -> Result<()>;
    fn unlike(&self, user_id: i64, post_id: i64) -> Result<bool>;
    /// Shifts the like counter by `delta` and returns the new value.
    fn adjust_likes(&self, post_id: i64, delta: i64) -> Result<i64>;
    fn adjust_comments(&self, post_id: i64, delta: i64) -> Result<i64>;
}

pub trait TimelineRepository {
    fn insert(&self, user_id: i64, post_id: i64) -> Result<i64>;
    /// Inserts one item per current follower of `author_id`, returning the rows
    /// written.
    fn fan_out(&self, author_id: i64, post_id: i64) -> Result<Vec<FannedOutItem>>;
    fn get(&self, id: i64) -> Result<Option<TimelineItemRecord>>;
    fn list(&self, user_id: i64, last: i64, before: Option<i64>) -> Result<Vec<TimelineItemRecord>>;
}

pub trait CommentRepository {
    fn create(&self, user_id: i64, post_id: i64, content: &str, created_at: &str)
        -> Result<CommentRecord>;
    fn get(&self, id: i64) -> Result<Option<CommentRecord>>;
    fn list(
        &self,
        viewer: Option<i64>,
        post_id: i64,
        last: i64,
        before: Option<i64>,
    ) -> Result<Vec<CommentDetailRecord>>;
    fn is_liked(&self, user_id: i64, comment_id: i64) -> Result<bool>;
    fn like(&self, user_id: i64, comment_id: i64) -> Result<()>;
    fn unlike(&self, user_id: i64, comment_id: i64) -> Result<bool>;
    fn adjust_likes(&self, comment_id: i64, delta: i64) -> Result<i64>;
}

pub trait SubscriptionRepository {
    fn subscribe(&self, user_id: i64, post_id: i64) -> Result<()>;
    fn unsubscribe(&self, user_id: i64, post_id: i64) -> Result<bool>;
    fn is_subscribed(&self, user_id: i64, post_id: i64) -> Result<bool>;
}

pub trait NotificationRepository {
    /// Whether an unread follow notification of `user_id` already lists `actor`.
    fn has_unread_follow_actor(&self, user_id: i64, actor: i64) -> Result<bool>;
    fn find_unread_follow(&self, user_id: i64) -> Result<Option<NotificationRecord>>;
    fn create(
        &self,
        user_id: i64,
        kind: NotificationKind,
        actors: &[i64],
        post_id: Option<i64>,
        issued_at: &str,
    ) -> Result<NotificationRecord>;
    fn prepend_actor(&self, id: i64, actor: i64, issued_at: &str) -> Result<NotificationRecord>;
    /// Merges `actor` into the unread `kind` notification of every subscriber
    /// of `post_id` other than `actor`, creating missing ones.
    fn upsert_for_subscribers(
        &self,
        kind: NotificationKind,
        post_id: i64,
        actor: i64,
        issued_at: &str,
    ) -> Result<Vec<NotificationRecord>>;
    /// Same merge, for the existing users among `usernames` other than `actor`.
    fn upsert_for_usernames(
        &self,
        kind: NotificationKind,
        usernames: &[String],
        post_id: i64,
        actor: i64,
        issued_at: &str,
    ) -> Result<Vec<NotificationRecord>>;
    fn get(&self, id: i64) -> Result<Option<NotificationRecord>>;
    fn list(&self, user_id: i64, last: i64, before: Option<i64>) -> Result<Vec<NotificationRecord>>;
    fn unread_count(&self, user_id: i64) -> Result<i64>;
    /// Marks one notification of `user_id` read. Returns false when the user
    /// owns no notification with that id.
    fn mark_read(&self, user_id: i64, id: i64) -> Result<bool>;
    fn mark_all_read(&self, user_id: i64) -> Result<usize>;
}

pub struct SqliteRepositories<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepositories<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn users(&self) -> impl UserRepository + '_ {
        users::SqliteUserRepository { conn: self.conn }
    }

    pub fn follows(&self) -> impl FollowRepository + '_ {
        follows::SqliteFollowRepository { conn: self.conn }
    }

    pub fn posts(&self) -> impl PostRepository + '_ {
        posts::SqlitePostRepository { conn: self.conn }
    }

    pub fn timeline(&self) -> impl TimelineRepository + '_ {
        timeline::SqliteTimelineRepository { conn: self.conn }
    }

    pub fn comments(&self) -> impl CommentRepository + '_ {
        comments::SqliteCommentRepository { conn: self.conn }
    }

    pub fn subscriptions(&self) -> impl SubscriptionRepository + '_ {
        subscriptions::SqliteSubscriptionRepository { conn: self.conn }
    }

    pub fn notifications(&self) -> impl NotificationRepository + '_ {
        notifications::SqliteNotificationRepository { conn: self.conn }
    }
}

/// Runs a statement produced by the query builder and maps every row.
pub(super) fn query_built<T, F>(conn: &Connection, built: &BuiltQuery, map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(&built.sql)?;
    let rows = stmt.query_map(params_from_iter(built.params.iter()), map)?;
    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

/// Author columns are selected as `author_id`, `author_username`,
/// `author_avatar` by every joined read.
pub(super) fn author_from_row(row: &Row<'_>) -> rusqlite::Result<AuthorRecord> {
    Ok(AuthorRecord {
        id: row.get("author_id")?,
        username: row.get("author_username")?,
        avatar: row.get("author_avatar")?,
    })
}
