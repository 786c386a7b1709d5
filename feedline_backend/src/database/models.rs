use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub avatar: Option<String>,
    pub followers_count: i64,
    pub followings_count: i64,
    pub created_at: String,
}

/// A user row seen from a viewer: whether the viewer follows them and whether
/// they follow the viewer back. Both false for anonymous viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserListingRecord {
    pub user: UserRecord,
    pub following: bool,
    pub followed_back: bool,
}

/// The denormalized author summary embedded in posts and comments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorRecord {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    pub spoiler_of: Option<String>,
    pub nsfw: bool,
    pub likes_count: i64,
    pub comments_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub user_id: i64,
    pub content: &'a str,
    pub spoiler_of: Option<&'a str>,
    pub nsfw: bool,
    pub created_at: &'a str,
}

/// A post joined with its author and the viewer-relative flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDetailRecord {
    pub post: PostRecord,
    pub author: AuthorRecord,
    pub liked: bool,
    pub subscribed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItemRecord {
    pub id: i64,
    pub user_id: i64,
    pub post: PostDetailRecord,
}

/// Row inserted by fan-out: the new timeline item id and its feed owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FannedOutItem {
    pub id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub user_id: i64,
    pub post_id: i64,
    pub content: String,
    pub likes_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentDetailRecord {
    pub comment: CommentRecord,
    pub author: AuthorRecord,
    pub liked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Follow,
    Comment,
    PostMention,
    CommentMention,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Follow => "follow",
            NotificationKind::Comment => "comment",
            NotificationKind::PostMention => "post_mention",
            NotificationKind::CommentMention => "comment_mention",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "follow" => Some(NotificationKind::Follow),
            "comment" => Some(NotificationKind::Comment),
            "post_mention" => Some(NotificationKind::PostMention),
            "comment_mention" => Some(NotificationKind::CommentMention),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: i64,
    pub kind: NotificationKind,
    /// Most recent actor first, each actor once.
    pub actors: Vec<i64>,
    pub post_id: Option<i64>,
    pub read: bool,
    pub issued_at: String,
}
