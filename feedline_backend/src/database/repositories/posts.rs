use crate::database::models::{NewPost, PostDetailRecord, PostRecord};
use crate::query::{build_query, QueryArgs};
use anyhow::Result;
use rusqlite::{params, Connection, Row};

pub(super) struct SqlitePostRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const POST_COLUMNS: &str =
    "id, user_id, content, spoiler_of, nsfw, likes_count, comments_count, created_at, updated_at";

const POST_DETAILS: &str = r#"
    SELECT posts.id, posts.user_id, posts.content, posts.spoiler_of, posts.nsfw,
           posts.likes_count, posts.comments_count, posts.created_at, posts.updated_at,
           users.id AS author_id, users.username AS author_username, users.avatar AS author_avatar
    {{if .viewer}}
         , EXISTS (SELECT 1 FROM post_likes WHERE post_likes.user_id = @viewer AND post_likes.post_id = posts.id) AS liked
         , EXISTS (SELECT 1 FROM post_subscriptions WHERE post_subscriptions.user_id = @viewer AND post_subscriptions.post_id = posts.id) AS subscribed
    {{else}}
         , 0 AS liked, 0 AS subscribed
    {{end}}
    FROM posts
    JOIN users ON users.id = posts.user_id
    WHERE {{if .post_id}}posts.id = @post_id{{else}}posts.user_id = @user_id{{end}}
    {{if .before}}AND posts.id < @before{{end}}
    ORDER BY posts.id DESC
    {{if .last}}LIMIT @last{{end}}
"#;

pub(super) fn post_from_row(row: &Row<'_>) -> rusqlite::Result<PostRecord> {
    Ok(PostRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        spoiler_of: row.get("spoiler_of")?,
        nsfw: row.get("nsfw")?,
        likes_count: row.get("likes_count")?,
        comments_count: row.get("comments_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Maps a row carrying post columns, `author_*` columns and the viewer flags.
pub(super) fn post_detail_from_row(row: &Row<'_>) -> rusqlite::Result<PostDetailRecord> {
    Ok(PostDetailRecord {
        post: post_from_row(row)?,
        author: super::author_from_row(row)?,
        liked: row.get("liked")?,
        subscribed: row.get("subscribed")?,
    })
}

impl<'conn> super::PostRepository for SqlitePostRepository<'conn> {
    fn create(&self, post: &NewPost<'_>) -> Result<PostRecord> {
        let sql = format!(
            r#"
            INSERT INTO posts (user_id, content, spoiler_of, nsfw, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            RETURNING {POST_COLUMNS}
            "#
        );
        Ok(self.conn.query_row(
            &sql,
            params![
                post.user_id,
                post.content,
                post.spoiler_of,
                post.nsfw,
                post.created_at
            ],
            post_from_row,
        )?)
    }

    fn get(&self, viewer: Option<i64>, id: i64) -> Result<Option<PostDetailRecord>> {
        let built = build_query(
            POST_DETAILS,
            &QueryArgs::new().with("viewer", viewer).with("post_id", id),
        )?;
        Ok(super::query_built(self.conn, &built, post_detail_from_row)?
            .into_iter()
            .next())
    }

    fn list_by_user(
        &self,
        viewer: Option<i64>,
        user_id: i64,
        last: i64,
        before: Option<i64>,
    ) -> Result<Vec<PostDetailRecord>> {
        let built = build_query(
            POST_DETAILS,
            &QueryArgs::new()
                .with("viewer", viewer)
                .with("user_id", user_id)
                .with("before", before)
                .with("last", last),
        )?;
        super::query_built(self.conn, &built, post_detail_from_row)
    }

    fn is_liked(&self, user_id: i64, post_id: i64) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM post_likes WHERE user_id = ?1 AND post_id = ?2)",
            params![user_id, post_id],
            |row| row.get(0),
        )?)
    }

    fn like(&self, user_id: i64, post_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO post_likes (user_id, post_id) VALUES (?1, ?2)",
            params![user_id, post_id],
        )?;
        Ok(())
    }

    fn unlike(&self, user_id: i64, post_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM post_likes WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
        )?;
        Ok(removed > 0)
    }

    fn adjust_likes(&self, post_id: i64, delta: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "UPDATE posts SET likes_count = MAX(likes_count + ?2, 0) WHERE id = ?1 RETURNING likes_count",
            params![post_id, delta],
            |row| row.get(0),
        )?)
    }

    fn adjust_comments(&self, post_id: i64, delta: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "UPDATE posts SET comments_count = MAX(comments_count + ?2, 0) WHERE id = ?1 RETURNING comments_count",
            params![post_id, delta],
            |row| row.get(0),
        )?)
    }
}
