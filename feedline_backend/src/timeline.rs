//! Per-user feeds: paged reads, fan-out of new posts, and live delivery.

use crate::context::FeedContext;
use crate::database::models::TimelineItemRecord;
use crate::database::repositories::{PostRepository, TimelineRepository};
use crate::error::FeedError;
use crate::identity::RequestorIdentity;
use crate::live::LiveFeed;
use crate::paging::FeedPage;
use crate::posts::PostView;
use serde::Serialize;

#[derive(Clone)]
pub struct TimelineService {
    ctx: FeedContext,
}

/// A feed owner's pointer to a post, with the post embedded.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineItem {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub post: PostView,
}

impl TimelineItem {
    pub(crate) fn from_record(record: TimelineItemRecord, origin: &str) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            post: PostView::from_detail(record.post, Some(record.user_id), origin),
        }
    }
}

impl TimelineService {
    pub fn new(ctx: FeedContext) -> Self {
        Self { ctx }
    }

    /// The viewer's feed, newest first.
    pub fn feed(
        &self,
        viewer: RequestorIdentity,
        page: FeedPage,
    ) -> Result<Vec<TimelineItem>, FeedError> {
        let user_id = viewer.require()?;
        let last = self.ctx.paging.normalize(page.last);
        let records = self
            .ctx
            .database
            .with_repositories(|repos| repos.timeline().list(user_id, last, page.before))?;
        Ok(records
            .into_iter()
            .map(|record| TimelineItem::from_record(record, &self.ctx.origin))
            .collect())
    }

    /// Opens a live channel for the viewer. Items fanned out to them arrive
    /// on the returned stream until it is dropped.
    pub fn subscribe(&self, viewer: RequestorIdentity) -> Result<LiveFeed<TimelineItem>, FeedError> {
        let user_id = viewer.require()?;
        Ok(self.ctx.live.register(user_id))
    }

    /// Copies `post_id` into the feed of every current follower of its
    /// author and pushes each new item to the follower's live channels.
    /// Follow edges are read when this runs, not when the post committed.
    pub fn fan_out(&self, post_id: i64) -> Result<Vec<TimelineItem>, FeedError> {
        let fanned = self.ctx.database.with_transaction(|repos| -> anyhow::Result<_> {
            let Some(post) = repos.posts().get(None, post_id)? else {
                return Ok(None);
            };
            let inserted = repos.timeline().fan_out(post.author.id, post_id)?;
            Ok(Some((post, inserted)))
        })?;
        let Some((post, inserted)) = fanned else {
            tracing::warn!(post_id, "post vanished before fan-out");
            return Ok(Vec::new());
        };

        let mut items = Vec::with_capacity(inserted.len());
        let mut delivered = 0;
        for row in inserted {
            let item = TimelineItem {
                id: row.id,
                user_id: row.user_id,
                post: PostView::from_detail(post.clone(), Some(row.user_id), &self.ctx.origin),
            };
            delivered += self.ctx.live.publish(row.user_id, &item);
            items.push(item);
        }
        tracing::info!(
            post_id,
            author_id = post.author.id,
            followers = items.len(),
            live_deliveries = delivered,
            "post fanned out"
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::posts::{CreatePostInput, PostService};
    use crate::users::tests::create;
    use crate::users::UserService;
    use futures_util::StreamExt;

    fn write_post(posts: &PostService, author: i64, content: &str) -> TimelineItem {
        posts
            .create_post(
                RequestorIdentity::user(author),
                CreatePostInput {
                    content: content.into(),
                    spoiler_of: None,
                    nsfw: false,
                },
            )
            .unwrap()
    }

    #[tokio::test]
    async fn post_reaches_author_and_every_follower() {
        let ctx = test_context();
        let users = UserService::new(ctx.clone());
        let posts = PostService::new(ctx.clone());
        let timeline = TimelineService::new(ctx.clone());

        let author = create(&users, "author");
        let followers: Vec<i64> = ["f1", "f2", "f3"]
            .into_iter()
            .map(|name| create(&users, name))
            .collect();
        let bystander = create(&users, "bystander");
        for follower in &followers {
            users
                .toggle_follow(RequestorIdentity::user(*follower), "author")
                .unwrap();
        }

        let own = write_post(&posts, author, "hello followers");
        ctx.tasks.drain().await;

        let own_feed = timeline
            .feed(RequestorIdentity::user(author), FeedPage::default())
            .unwrap();
        assert_eq!(own_feed.len(), 1);
        assert!(own.post.mine);

        let mut owners = vec![author];
        for follower in &followers {
            let feed = timeline
                .feed(RequestorIdentity::user(*follower), FeedPage::default())
                .unwrap();
            assert_eq!(feed.len(), 1);
            assert_eq!(feed[0].post.id, own.post.id);
            assert!(!feed[0].post.mine);
            assert_eq!(feed[0].post.user.username, "author");
            owners.push(*follower);
        }
        assert_eq!(owners.len(), followers.len() + 1);
        assert!(timeline
            .feed(RequestorIdentity::user(bystander), FeedPage::default())
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn zero_followers_leaves_only_the_own_item() {
        let ctx = test_context();
        let users = UserService::new(ctx.clone());
        let posts = PostService::new(ctx.clone());
        let timeline = TimelineService::new(ctx.clone());
        let loner = create(&users, "loner");

        let own = write_post(&posts, loner, "anyone there");
        ctx.tasks.drain().await;
        assert!(timeline.fan_out(own.post.id).unwrap().is_empty());

        let feed = timeline
            .feed(RequestorIdentity::user(loner), FeedPage::default())
            .unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].id, own.id);
    }

    #[tokio::test]
    async fn live_subscribers_receive_fanned_out_items() {
        let ctx = test_context();
        let users = UserService::new(ctx.clone());
        let posts = PostService::new(ctx.clone());
        let timeline = TimelineService::new(ctx.clone());
        let author = create(&users, "author");
        let fan = create(&users, "fan");
        users
            .toggle_follow(RequestorIdentity::user(fan), "author")
            .unwrap();

        let mut live = timeline.subscribe(RequestorIdentity::user(fan)).unwrap();
        let mut second = timeline.subscribe(RequestorIdentity::user(fan)).unwrap();
        let own = write_post(&posts, author, "live now");
        ctx.tasks.drain().await;

        let pushed = live.next().await.unwrap();
        assert_eq!(pushed.post.id, own.post.id);
        assert_eq!(pushed.user_id, fan);
        assert_eq!(second.next().await.unwrap().id, pushed.id);

        drop(live);
        drop(second);
        assert_eq!(ctx.live.channel_count(fan), 0);
        assert!(matches!(
            timeline.subscribe(RequestorIdentity::Anonymous),
            Err(FeedError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn fan_out_reads_current_follow_edges() {
        let ctx = test_context();
        let users = UserService::new(ctx.clone());
        let posts = PostService::new(ctx.clone());
        let timeline = TimelineService::new(ctx.clone());
        let author = create(&users, "author");
        let late = create(&users, "late");

        let own = write_post(&posts, author, "early post");
        ctx.tasks.drain().await;
        users
            .toggle_follow(RequestorIdentity::user(late), "author")
            .unwrap();

        let items = timeline.fan_out(own.post.id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].user_id, late);
        // A second run finds nothing new to insert.
        assert!(timeline.fan_out(own.post.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn feed_pages_backwards_with_clamped_sizes() {
        let ctx = test_context();
        let users = UserService::new(ctx.clone());
        let posts = PostService::new(ctx.clone());
        let timeline = TimelineService::new(ctx.clone());
        let author = create(&users, "author");
        for n in 0..12 {
            write_post(&posts, author, &format!("post {n}"));
        }
        ctx.tasks.drain().await;
        let viewer = RequestorIdentity::user(author);

        let default_page = timeline.feed(viewer, FeedPage::new(Some(0), None)).unwrap();
        assert_eq!(default_page.len(), 10);
        let clamped = timeline.feed(viewer, FeedPage::new(Some(1000), None)).unwrap();
        assert_eq!(clamped.len(), 12);
        assert!(clamped.windows(2).all(|pair| pair[0].id > pair[1].id));

        let cursor = clamped[4].id;
        let older = timeline
            .feed(viewer, FeedPage::new(Some(3), Some(cursor)))
            .unwrap();
        assert_eq!(older.len(), 3);
        assert!(older.iter().all(|item| item.id < cursor));
        assert_eq!(older[0].id, clamped[5].id);

        assert!(matches!(
            timeline.feed(RequestorIdentity::Anonymous, FeedPage::default()),
            Err(FeedError::Unauthorized)
        ));
    }
}
