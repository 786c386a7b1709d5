use crate::database::models::{FannedOutItem, TimelineItemRecord};
use crate::query::{build_query, QueryArgs};
use anyhow::Result;
use rusqlite::{params, Connection, Row};

pub(super) struct SqliteTimelineRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const TIMELINE_ITEMS: &str = r#"
    SELECT timeline_items.id AS item_id, timeline_items.user_id AS owner_id,
           posts.id, posts.user_id, posts.content, posts.spoiler_of, posts.nsfw,
           posts.likes_count, posts.comments_count, posts.created_at, posts.updated_at,
           users.id AS author_id, users.username AS author_username, users.avatar AS author_avatar,
           EXISTS (SELECT 1 FROM post_likes WHERE post_likes.user_id = timeline_items.user_id AND post_likes.post_id = posts.id) AS liked,
           EXISTS (SELECT 1 FROM post_subscriptions WHERE post_subscriptions.user_id = timeline_items.user_id AND post_subscriptions.post_id = posts.id) AS subscribed
    FROM timeline_items
    JOIN posts ON posts.id = timeline_items.post_id
    JOIN users ON users.id = posts.user_id
    WHERE {{if .item_id}}timeline_items.id = @item_id{{else}}timeline_items.user_id = @user_id{{end}}
    {{if .before}}AND timeline_items.id < @before{{end}}
    ORDER BY timeline_items.id DESC
    {{if .last}}LIMIT @last{{end}}
"#;

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<TimelineItemRecord> {
    Ok(TimelineItemRecord {
        id: row.get("item_id")?,
        user_id: row.get("owner_id")?,
        post: super::posts::post_detail_from_row(row)?,
    })
}

impl<'conn> super::TimelineRepository for SqliteTimelineRepository<'conn> {
    fn insert(&self, user_id: i64, post_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "INSERT INTO timeline_items (user_id, post_id) VALUES (?1, ?2) RETURNING id",
            params![user_id, post_id],
            |row| row.get(0),
        )?)
    }

    fn fan_out(&self, author_id: i64, post_id: i64) -> Result<Vec<FannedOutItem>> {
        let mut stmt = self.conn.prepare(
            r#"
            INSERT INTO timeline_items (user_id, post_id)
            SELECT follows.follower_id, ?2 FROM follows WHERE follows.following_id = ?1
            ON CONFLICT (user_id, post_id) DO NOTHING
            RETURNING id, user_id
            "#,
        )?;
        let rows = stmt.query_map(params![author_id, post_id], |row| {
            Ok(FannedOutItem {
                id: row.get(0)?,
                user_id: row.get(1)?,
            })
        })?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn get(&self, id: i64) -> Result<Option<TimelineItemRecord>> {
        let built = build_query(TIMELINE_ITEMS, &QueryArgs::new().with("item_id", id))?;
        Ok(super::query_built(self.conn, &built, item_from_row)?
            .into_iter()
            .next())
    }

    fn list(&self, user_id: i64, last: i64, before: Option<i64>) -> Result<Vec<TimelineItemRecord>> {
        let built = build_query(
            TIMELINE_ITEMS,
            &QueryArgs::new()
                .with("user_id", user_id)
                .with("before", before)
                .with("last", last),
        )?;
        super::query_built(self.conn, &built, item_from_row)
    }
}
