use anyhow::Result;
use rusqlite::{params, Connection};

pub(super) struct SqliteFollowRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::FollowRepository for SqliteFollowRepository<'conn> {
    fn exists(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2)",
            params![follower_id, following_id],
            |row| row.get(0),
        )?)
    }

    fn insert(&self, follower_id: i64, following_id: i64, created_at: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO follows (follower_id, following_id, created_at) VALUES (?1, ?2, ?3)",
            params![follower_id, following_id, created_at],
        )?;
        Ok(())
    }

    fn delete(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![follower_id, following_id],
        )?;
        Ok(removed > 0)
    }
}
