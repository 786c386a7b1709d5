use crate::context::FeedContext;
use crate::database::models::{AuthorRecord, UserListingRecord, UserRecord};
use crate::database::repositories::{FollowRepository, UserRepository};
use crate::error::{unique_violation, FeedError};
use crate::identity::RequestorIdentity;
use crate::notifications::NotificationService;
use crate::paging::ListingPage;
use crate::utils::{avatar_url, now_utc_iso};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{0,17}$").expect("username pattern compiles"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"))
}

#[derive(Clone)]
pub struct UserService {
    ctx: FeedContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
    pub followers_count: i64,
    pub followings_count: i64,
    pub me: bool,
    pub following: bool,
    pub following_back: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleFollowOutput {
    pub following: bool,
    pub followers_count: i64,
}

impl UserService {
    pub fn new(ctx: FeedContext) -> Self {
        Self { ctx }
    }

    pub fn create_user(&self, input: CreateUserInput) -> Result<UserProfile, FeedError> {
        let email = input.email.trim().to_lowercase();
        let username = input.username.trim().to_string();
        if !email_pattern().is_match(&email) {
            return Err(FeedError::ValidationFailed("invalid email address".into()));
        }
        if !username_pattern().is_match(&username) {
            return Err(FeedError::ValidationFailed("invalid username".into()));
        }

        let created_at = now_utc_iso();
        let record = self
            .ctx
            .database
            .with_repositories(|repos| repos.users().create(&email, &username, &created_at))
            .map_err(|err| match unique_violation(&err) {
                Some(message) if message.contains("email") => {
                    FeedError::Conflict("email already taken".into())
                }
                Some(message) if message.contains("username") => {
                    FeedError::Conflict("username already taken".into())
                }
                _ => FeedError::Internal(err),
            })?;
        tracing::info!(user_id = record.id, username = %record.username, "user created");
        let owner = Some(record.id);
        Ok(UserProfile::from_record(
            record,
            owner,
            (false, false),
            &self.ctx.origin,
        ))
    }

    pub fn user_by_id(&self, id: i64) -> Result<UserSummary, FeedError> {
        let record = self
            .ctx
            .database
            .with_repositories(|repos| repos.users().get(id))?
            .ok_or(FeedError::NotFound("user"))?;
        Ok(UserSummary::from_user(&record, &self.ctx.origin))
    }

    pub fn user_profile(
        &self,
        viewer: RequestorIdentity,
        username: &str,
    ) -> Result<UserProfile, FeedError> {
        let (record, relationship) = self.ctx.database.with_repositories(|repos| {
            let Some(record) = repos.users().get_by_username(username.trim())? else {
                return Ok(None);
            };
            let relationship = match viewer.user_id() {
                Some(viewer_id) if viewer_id != record.id => {
                    repos.users().relationship(viewer_id, record.id)?
                }
                _ => (false, false),
            };
            Ok(Some((record, relationship)))
        })?
        .ok_or(FeedError::NotFound("user"))?;
        Ok(UserProfile::from_record(
            record,
            viewer.user_id(),
            relationship,
            &self.ctx.origin,
        ))
    }

    pub fn search_users(
        &self,
        viewer: RequestorIdentity,
        search: &str,
        page: &ListingPage,
    ) -> Result<Vec<UserProfile>, FeedError> {
        let first = self.ctx.paging.normalize(page.first);
        let after = page.cursor();
        let search = search.trim();
        let records = self.ctx.database.with_repositories(|repos| {
            repos
                .users()
                .search(viewer.user_id(), search, first, &after)
        })?;
        Ok(self.listing(viewer, records))
    }

    pub fn followers(
        &self,
        viewer: RequestorIdentity,
        username: &str,
        page: &ListingPage,
    ) -> Result<Vec<UserProfile>, FeedError> {
        self.follow_listing(viewer, username, page, true)
    }

    pub fn followings(
        &self,
        viewer: RequestorIdentity,
        username: &str,
        page: &ListingPage,
    ) -> Result<Vec<UserProfile>, FeedError> {
        self.follow_listing(viewer, username, page, false)
    }

    fn follow_listing(
        &self,
        viewer: RequestorIdentity,
        username: &str,
        page: &ListingPage,
        followers: bool,
    ) -> Result<Vec<UserProfile>, FeedError> {
        let first = self.ctx.paging.normalize(page.first);
        let after = page.cursor();
        let records = self
            .ctx
            .database
            .with_repositories(|repos| {
                let Some(user) = repos.users().get_by_username(username.trim())? else {
                    return Ok(None);
                };
                let users = repos.users();
                let listing = if followers {
                    users.followers(viewer.user_id(), user.id, first, &after)?
                } else {
                    users.followings(viewer.user_id(), user.id, first, &after)?
                };
                Ok(Some(listing))
            })?
            .ok_or(FeedError::NotFound("user"))?;
        Ok(self.listing(viewer, records))
    }

    fn listing(&self, viewer: RequestorIdentity, records: Vec<UserListingRecord>) -> Vec<UserProfile> {
        records
            .into_iter()
            .map(|record| {
                UserProfile::from_record(
                    record.user,
                    viewer.user_id(),
                    (record.following, record.followed_back),
                    &self.ctx.origin,
                )
            })
            .collect()
    }

    /// Follows or unfollows `username`. Counters move in the same transaction
    /// as the edge; a new follow notifies the followed user in the background.
    pub fn toggle_follow(
        &self,
        viewer: RequestorIdentity,
        username: &str,
    ) -> Result<ToggleFollowOutput, FeedError> {
        let follower_id = viewer.require()?;
        let now = now_utc_iso();
        let (following_id, output) = self.ctx.database.with_transaction(|repos| -> Result<_, FeedError> {
            let target = repos
                .users()
                .get_by_username(username.trim())?
                .ok_or(FeedError::NotFound("user"))?;
            if target.id == follower_id {
                return Err(FeedError::ValidationFailed("can not follow yourself".into()));
            }

            let follows = repos.follows();
            let following = if follows.exists(follower_id, target.id)? {
                follows.delete(follower_id, target.id)?;
                repos.users().adjust_follow_counts(follower_id, target.id, -1)?;
                false
            } else {
                follows
                    .insert(follower_id, target.id, &now)
                    .map_err(|err| FeedError::missing_on_fk(err, "user"))?;
                repos.users().adjust_follow_counts(follower_id, target.id, 1)?;
                true
            };
            let followers_count = repos
                .users()
                .get(target.id)?
                .map_or(0, |user| user.followers_count);
            Ok((
                target.id,
                ToggleFollowOutput {
                    following,
                    followers_count,
                },
            ))
        })?;

        tracing::info!(
            follower_id,
            following_id,
            following = output.following,
            "follow toggled"
        );
        if output.following {
            let notifications = NotificationService::new(self.ctx.clone());
            self.ctx.tasks.spawn("notify_follow", move || {
                notifications.notify_follow(follower_id, following_id)?;
                Ok(())
            });
        }
        Ok(output)
    }
}

impl UserProfile {
    /// Email and id are only exposed to the user themselves.
    fn from_record(
        record: UserRecord,
        viewer: Option<i64>,
        (following, following_back): (bool, bool),
        origin: &str,
    ) -> Self {
        let me = viewer == Some(record.id);
        Self {
            id: me.then_some(record.id),
            email: me.then_some(record.email),
            username: record.username,
            avatar_url: avatar_url(origin, record.avatar),
            followers_count: record.followers_count,
            followings_count: record.followings_count,
            me,
            following: following && !me,
            following_back: following_back && !me,
        }
    }
}

impl UserSummary {
    pub(crate) fn from_author(record: AuthorRecord, origin: &str) -> Self {
        Self {
            id: record.id,
            username: record.username,
            avatar_url: avatar_url(origin, record.avatar),
        }
    }

    fn from_user(record: &UserRecord, origin: &str) -> Self {
        Self {
            id: record.id,
            username: record.username.clone(),
            avatar_url: avatar_url(origin, record.avatar.clone()),
        }
    }
}
