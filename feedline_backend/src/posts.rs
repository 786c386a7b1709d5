use crate::context::FeedContext;
use crate::database::models::{NewPost, PostDetailRecord};
use crate::database::repositories::{
    PostRepository, SubscriptionRepository, TimelineRepository, UserRepository,
};
use crate::error::FeedError;
use crate::identity::RequestorIdentity;
use crate::notifications::{MentionSource, NotificationService};
use crate::paging::FeedPage;
use crate::timeline::{TimelineItem, TimelineService};
use crate::users::UserSummary;
use crate::utils::now_utc_iso;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};

const MAX_CONTENT_CHARS: usize = 480;
const MAX_SPOILER_CHARS: usize = 64;

#[derive(Clone)]
pub struct PostService {
    ctx: FeedContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: i64,
    pub content: String,
    pub spoiler_of: Option<String>,
    pub nsfw: bool,
    pub likes_count: i64,
    pub comments_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub user: UserSummary,
    pub mine: bool,
    pub liked: bool,
    pub subscribed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePostInput {
    pub content: String,
    #[serde(default)]
    pub spoiler_of: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToggleLikeOutput {
    pub liked: bool,
    pub likes_count: i64,
}

impl PostService {
    pub fn new(ctx: FeedContext) -> Self {
        Self { ctx }
    }

    /// Writes the post, the author's subscription to it and the author's own
    /// feed item in one transaction, then hands fan-out and mention
    /// notifications to the background runner.
    pub fn create_post(
        &self,
        viewer: RequestorIdentity,
        input: CreatePostInput,
    ) -> Result<TimelineItem, FeedError> {
        let user_id = viewer.require()?;
        let content = input.content.trim();
        if content.is_empty() || content.chars().count() > MAX_CONTENT_CHARS {
            return Err(FeedError::ValidationFailed(format!(
                "content must be between 1 and {MAX_CONTENT_CHARS} characters"
            )));
        }
        let spoiler_of = input
            .spoiler_of
            .as_deref()
            .map(str::trim)
            .filter(|spoiler| !spoiler.is_empty());
        if spoiler_of.is_some_and(|spoiler| spoiler.chars().count() > MAX_SPOILER_CHARS) {
            return Err(FeedError::ValidationFailed(format!(
                "spoiler must be at most {MAX_SPOILER_CHARS} characters"
            )));
        }

        let created_at = now_utc_iso();
        let record = self
            .ctx
            .database
            .with_transaction(|repos| -> Result<_, FeedError> {
                let post = repos
                    .posts()
                    .create(&NewPost {
                        user_id,
                        content,
                        spoiler_of,
                        nsfw: input.nsfw,
                        created_at: &created_at,
                    })
                    .map_err(|err| FeedError::missing_on_fk(err, "user"))?;
                repos.subscriptions().subscribe(user_id, post.id)?;
                let item_id = repos.timeline().insert(user_id, post.id)?;
                let item = repos
                    .timeline()
                    .get(item_id)?
                    .ok_or_else(|| anyhow!("timeline item {item_id} missing after insert"))?;
                Ok(item)
            })?;
        let post_id = record.post.post.id;
        tracing::info!(post_id, user_id, "post created");

        let timeline = TimelineService::new(self.ctx.clone());
        self.ctx.tasks.spawn("timeline_fan_out", move || {
            timeline.fan_out(post_id)?;
            Ok(())
        });
        let notifications = NotificationService::new(self.ctx.clone());
        let mentioned = content.to_string();
        self.ctx.tasks.spawn("post_mentions", move || {
            notifications.notify_mention(&mentioned, user_id, post_id, MentionSource::Post)?;
            Ok(())
        });

        Ok(TimelineItem::from_record(record, &self.ctx.origin))
    }

    pub fn post(&self, viewer: RequestorIdentity, post_id: i64) -> Result<PostView, FeedError> {
        let record = self
            .ctx
            .database
            .with_repositories(|repos| repos.posts().get(viewer.user_id(), post_id))?
            .ok_or(FeedError::NotFound("post"))?;
        Ok(PostView::from_detail(record, viewer.user_id(), &self.ctx.origin))
    }

    pub fn posts_by_user(
        &self,
        viewer: RequestorIdentity,
        username: &str,
        page: FeedPage,
    ) -> Result<Vec<PostView>, FeedError> {
        let last = self.ctx.paging.normalize(page.last);
        let records = self
            .ctx
            .database
            .with_repositories(|repos| {
                let Some(user) = repos.users().get_by_username(username.trim())? else {
                    return Ok(None);
                };
                let posts = repos
                    .posts()
                    .list_by_user(viewer.user_id(), user.id, last, page.before)?;
                Ok(Some(posts))
            })?
            .ok_or(FeedError::NotFound("user"))?;
        Ok(records
            .into_iter()
            .map(|record| PostView::from_detail(record, viewer.user_id(), &self.ctx.origin))
            .collect())
    }

    pub fn toggle_post_like(
        &self,
        viewer: RequestorIdentity,
        post_id: i64,
    ) -> Result<ToggleLikeOutput, FeedError> {
        let user_id = viewer.require()?;
        let output = self
            .ctx
            .database
            .with_transaction(|repos| -> Result<_, FeedError> {
                let posts = repos.posts();
                if posts.is_liked(user_id, post_id)? {
                    posts.unlike(user_id, post_id)?;
                    let likes_count = posts.adjust_likes(post_id, -1)?;
                    Ok(ToggleLikeOutput {
                        liked: false,
                        likes_count,
                    })
                } else {
                    posts
                        .like(user_id, post_id)
                        .map_err(|err| FeedError::missing_on_fk(err, "post"))?;
                    let likes_count = posts.adjust_likes(post_id, 1)?;
                    Ok(ToggleLikeOutput {
                        liked: true,
                        likes_count,
                    })
                }
            })?;
        tracing::debug!(post_id, user_id, liked = output.liked, "post like toggled");
        Ok(output)
    }
}

impl PostView {
    pub(crate) fn from_detail(record: PostDetailRecord, viewer: Option<i64>, origin: &str) -> Self {
        let post = record.post;
        Self {
            id: post.id,
            content: post.content,
            spoiler_of: post.spoiler_of,
            nsfw: post.nsfw,
            likes_count: post.likes_count,
            comments_count: post.comments_count,
            created_at: post.created_at,
            updated_at: post.updated_at,
            mine: viewer == Some(post.user_id),
            user: UserSummary::from_author(record.author, origin),
            liked: record.liked,
            subscribed: record.subscribed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::users::tests::create;
    use crate::users::UserService;

    fn input(content: &str) -> CreatePostInput {
        CreatePostInput {
            content: content.into(),
            spoiler_of: None,
            nsfw: false,
        }
    }

    #[test]
    fn create_post_writes_post_subscription_and_own_item() {
        let ctx = test_context();
        let users = UserService::new(ctx.clone());
        let posts = PostService::new(ctx.clone());
        let author = create(&users, "author");

        let item = posts
            .create_post(
                RequestorIdentity::user(author),
                CreatePostInput {
                    content: "  first!  ".into(),
                    spoiler_of: Some("  ".into()),
                    nsfw: true,
                },
            )
            .unwrap();
        assert_eq!(item.user_id, author);
        assert_eq!(item.post.content, "first!");
        assert!(item.post.spoiler_of.is_none());
        assert!(item.post.nsfw);
        assert!(item.post.mine);
        assert!(item.post.subscribed);
        assert_eq!(item.post.user.username, "author");
    }

    #[test]
    fn create_post_rejects_anonymous_and_empty_content() {
        let ctx = test_context();
        let posts = PostService::new(ctx);
        assert!(matches!(
            posts.create_post(RequestorIdentity::Anonymous, input("hi")),
            Err(FeedError::Unauthorized)
        ));
        assert!(matches!(
            posts.create_post(RequestorIdentity::user(1), input("   ")),
            Err(FeedError::ValidationFailed(_))
        ));
    }

    #[test]
    fn unknown_author_rolls_back_everything() {
        let ctx = test_context();
        let posts = PostService::new(ctx.clone());
        assert!(matches!(
            posts.create_post(RequestorIdentity::user(404), input("ghost post")),
            Err(FeedError::NotFound("user"))
        ));
        let leftovers = ctx
            .database
            .with_repositories(|repos| repos.timeline().list(404, 99, None))
            .unwrap();
        assert!(leftovers.is_empty());
        assert!(matches!(
            posts.post(RequestorIdentity::Anonymous, 1),
            Err(FeedError::NotFound("post"))
        ));
    }

    #[test]
    fn like_counter_tracks_toggles_and_never_goes_negative() {
        let ctx = test_context();
        let users = UserService::new(ctx.clone());
        let posts = PostService::new(ctx.clone());
        let author = create(&users, "author");
        let fan = create(&users, "fan");
        let post_id = posts
            .create_post(RequestorIdentity::user(author), input("like me"))
            .unwrap()
            .post
            .id;

        let liked = posts
            .toggle_post_like(RequestorIdentity::user(fan), post_id)
            .unwrap();
        assert!(liked.liked);
        assert_eq!(liked.likes_count, 1);
        let view = posts.post(RequestorIdentity::user(fan), post_id).unwrap();
        assert!(view.liked);
        assert!(!view.mine);

        let unliked = posts
            .toggle_post_like(RequestorIdentity::user(fan), post_id)
            .unwrap();
        assert!(!unliked.liked);
        assert_eq!(unliked.likes_count, 0);

        let floor = ctx
            .database
            .with_repositories(|repos| repos.posts().adjust_likes(post_id, -1))
            .unwrap();
        assert_eq!(floor, 0);

        assert!(matches!(
            posts.toggle_post_like(RequestorIdentity::user(fan), 777),
            Err(FeedError::NotFound("post"))
        ));
    }

    #[test]
    fn posts_by_user_pages_newest_first() {
        let ctx = test_context();
        let users = UserService::new(ctx.clone());
        let posts = PostService::new(ctx.clone());
        let author = create(&users, "author");
        let ids: Vec<i64> = (0..5)
            .map(|n| {
                posts
                    .create_post(RequestorIdentity::user(author), input(&format!("n{n}")))
                    .unwrap()
                    .post
                    .id
            })
            .collect();

        let page = posts
            .posts_by_user(
                RequestorIdentity::Anonymous,
                "author",
                FeedPage::new(Some(2), Some(ids[3])),
            )
            .unwrap();
        let got: Vec<i64> = page.iter().map(|post| post.id).collect();
        assert_eq!(got, vec![ids[2], ids[1]]);
        assert!(page.iter().all(|post| !post.mine && !post.liked));

        assert!(matches!(
            posts.posts_by_user(RequestorIdentity::Anonymous, "nobody", FeedPage::default()),
            Err(FeedError::NotFound("user"))
        ));
    }
}
