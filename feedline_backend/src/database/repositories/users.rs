use crate::database::models::{AuthorRecord, UserListingRecord, UserRecord};
use crate::query::{build_query, QueryArgs};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteUserRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const USER_COLUMNS: &str = "id, email, username, avatar, followers_count, followings_count, created_at";

const SEARCH_USERS: &str = r#"
    SELECT users.id, users.email, users.username, users.avatar,
           users.followers_count, users.followings_count, users.created_at
    {{if .viewer}}
         , EXISTS (SELECT 1 FROM follows WHERE follower_id = @viewer AND following_id = users.id) AS following
         , EXISTS (SELECT 1 FROM follows WHERE follower_id = users.id AND following_id = @viewer) AS followed_back
    {{else}}
         , 0 AS following, 0 AS followed_back
    {{end}}
    FROM users
    WHERE 1 = 1
    {{if .search}}AND users.username LIKE '%' || @search || '%' ESCAPE '\'{{end}}
    {{if .after}}AND users.username > @after{{end}}
    ORDER BY users.username ASC
    {{if .first}}LIMIT @first{{end}}
"#;

const FOLLOW_LISTING: &str = r#"
    SELECT users.id, users.email, users.username, users.avatar,
           users.followers_count, users.followings_count, users.created_at
    {{if .viewer}}
         , EXISTS (SELECT 1 FROM follows AS mine WHERE mine.follower_id = @viewer AND mine.following_id = users.id) AS following
         , EXISTS (SELECT 1 FROM follows AS back WHERE back.follower_id = users.id AND back.following_id = @viewer) AS followed_back
    {{else}}
         , 0 AS following, 0 AS followed_back
    {{end}}
    FROM follows
    JOIN users ON users.id = {{if .followers}}follows.follower_id{{else}}follows.following_id{{end}}
    WHERE {{if .followers}}follows.following_id{{else}}follows.follower_id{{end}} = @user_id
    {{if .after}}AND users.username > @after{{end}}
    ORDER BY users.username ASC
    {{if .first}}LIMIT @first{{end}}
"#;

/// Escapes LIKE wildcards so user input only ever matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get("id")?,
        email: row.get("email")?,
        username: row.get("username")?,
        avatar: row.get("avatar")?,
        followers_count: row.get("followers_count")?,
        followings_count: row.get("followings_count")?,
        created_at: row.get("created_at")?,
    })
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<UserListingRecord> {
    Ok(UserListingRecord {
        user: user_from_row(row)?,
        following: row.get("following")?,
        followed_back: row.get("followed_back")?,
    })
}

impl<'conn> SqliteUserRepository<'conn> {
    fn follow_listing(
        &self,
        followers: bool,
        viewer: Option<i64>,
        user_id: i64,
        first: i64,
        after: &str,
    ) -> Result<Vec<UserListingRecord>> {
        let built = build_query(
            FOLLOW_LISTING,
            &QueryArgs::new()
                .with("followers", followers)
                .with("viewer", viewer)
                .with("user_id", user_id)
                .with("after", after)
                .with("first", first),
        )?;
        super::query_built(self.conn, &built, listing_from_row)
    }
}

impl<'conn> super::UserRepository for SqliteUserRepository<'conn> {
    fn create(&self, email: &str, username: &str, created_at: &str) -> Result<UserRecord> {
        let sql = format!(
            "INSERT INTO users (email, username, created_at) VALUES (?1, ?2, ?3) RETURNING {USER_COLUMNS}"
        );
        Ok(self
            .conn
            .query_row(&sql, params![email, username, created_at], user_from_row)?)
    }

    fn get(&self, id: i64) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], user_from_row)
            .optional()?)
    }

    fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![username], user_from_row)
            .optional()?)
    }

    fn authors(&self, ids: &[i64]) -> Result<Vec<AuthorRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id AS author_id, username AS author_username, avatar AS author_avatar
            FROM users
            WHERE id IN (SELECT value FROM json_each(?1))
            "#,
        )?;
        let ids = serde_json::to_string(ids)?;
        let rows = stmt.query_map(params![ids], super::author_from_row)?;
        let mut authors = Vec::new();
        for row in rows {
            authors.push(row?);
        }
        Ok(authors)
    }

    fn relationship(&self, viewer: i64, user_id: i64) -> Result<(bool, bool)> {
        Ok(self.conn.query_row(
            r#"
            SELECT
                EXISTS (SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2),
                EXISTS (SELECT 1 FROM follows WHERE follower_id = ?2 AND following_id = ?1)
            "#,
            params![viewer, user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    }

    fn search(
        &self,
        viewer: Option<i64>,
        search: &str,
        first: i64,
        after: &str,
    ) -> Result<Vec<UserListingRecord>> {
        let built = build_query(
            SEARCH_USERS,
            &QueryArgs::new()
                .with("viewer", viewer)
                .with("search", escape_like(search))
                .with("after", after)
                .with("first", first),
        )?;
        super::query_built(self.conn, &built, listing_from_row)
    }

    fn followers(
        &self,
        viewer: Option<i64>,
        user_id: i64,
        first: i64,
        after: &str,
    ) -> Result<Vec<UserListingRecord>> {
        self.follow_listing(true, viewer, user_id, first, after)
    }

    fn followings(
        &self,
        viewer: Option<i64>,
        user_id: i64,
        first: i64,
        after: &str,
    ) -> Result<Vec<UserListingRecord>> {
        self.follow_listing(false, viewer, user_id, first, after)
    }

    fn adjust_follow_counts(&self, follower_id: i64, following_id: i64, delta: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET followings_count = MAX(followings_count + ?2, 0) WHERE id = ?1",
            params![follower_id, delta],
        )?;
        self.conn.execute(
            "UPDATE users SET followers_count = MAX(followers_count + ?2, 0) WHERE id = ?1",
            params![following_id, delta],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("al"), "al");
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
