use crate::database::models::{CommentDetailRecord, CommentRecord};
use crate::query::{build_query, QueryArgs};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteCommentRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const COMMENT_COLUMNS: &str = "id, user_id, post_id, content, likes_count, created_at";

const POST_COMMENTS: &str = r#"
    SELECT comments.id, comments.user_id, comments.post_id, comments.content,
           comments.likes_count, comments.created_at,
           users.id AS author_id, users.username AS author_username, users.avatar AS author_avatar
    {{if .viewer}}
         , EXISTS (SELECT 1 FROM comment_likes WHERE comment_likes.user_id = @viewer AND comment_likes.comment_id = comments.id) AS liked
    {{else}}
         , 0 AS liked
    {{end}}
    FROM comments
    JOIN users ON users.id = comments.user_id
    WHERE comments.post_id = @post_id
    {{if .before}}AND comments.id < @before{{end}}
    ORDER BY comments.id DESC
    {{if .last}}LIMIT @last{{end}}
"#;

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentRecord> {
    Ok(CommentRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        post_id: row.get("post_id")?,
        content: row.get("content")?,
        likes_count: row.get("likes_count")?,
        created_at: row.get("created_at")?,
    })
}

fn detail_from_row(row: &Row<'_>) -> rusqlite::Result<CommentDetailRecord> {
    Ok(CommentDetailRecord {
        comment: comment_from_row(row)?,
        author: super::author_from_row(row)?,
        liked: row.get("liked")?,
    })
}

impl<'conn> super::CommentRepository for SqliteCommentRepository<'conn> {
    fn create(
        &self,
        user_id: i64,
        post_id: i64,
        content: &str,
        created_at: &str,
    ) -> Result<CommentRecord> {
        let sql = format!(
            "INSERT INTO comments (user_id, post_id, content, created_at) VALUES (?1, ?2, ?3, ?4) RETURNING {COMMENT_COLUMNS}"
        );
        Ok(self.conn.query_row(
            &sql,
            params![user_id, post_id, content, created_at],
            comment_from_row,
        )?)
    }

    fn get(&self, id: i64) -> Result<Option<CommentRecord>> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], comment_from_row)
            .optional()?)
    }

    fn list(
        &self,
        viewer: Option<i64>,
        post_id: i64,
        last: i64,
        before: Option<i64>,
    ) -> Result<Vec<CommentDetailRecord>> {
        let built = build_query(
            POST_COMMENTS,
            &QueryArgs::new()
                .with("viewer", viewer)
                .with("post_id", post_id)
                .with("before", before)
                .with("last", last),
        )?;
        super::query_built(self.conn, &built, detail_from_row)
    }

    fn is_liked(&self, user_id: i64, comment_id: i64) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM comment_likes WHERE user_id = ?1 AND comment_id = ?2)",
            params![user_id, comment_id],
            |row| row.get(0),
        )?)
    }

    fn like(&self, user_id: i64, comment_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO comment_likes (user_id, comment_id) VALUES (?1, ?2)",
            params![user_id, comment_id],
        )?;
        Ok(())
    }

    fn unlike(&self, user_id: i64, comment_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM comment_likes WHERE user_id = ?1 AND comment_id = ?2",
            params![user_id, comment_id],
        )?;
        Ok(removed > 0)
    }

    fn adjust_likes(&self, comment_id: i64, delta: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "UPDATE comments SET likes_count = MAX(likes_count + ?2, 0) WHERE id = ?1 RETURNING likes_count",
            params![comment_id, delta],
            |row| row.get(0),
        )?)
    }
}
