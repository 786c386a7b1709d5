use anyhow::Result;
use rusqlite::{params, Connection};

pub(super) struct SqliteSubscriptionRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::SubscriptionRepository for SqliteSubscriptionRepository<'conn> {
    fn subscribe(&self, user_id: i64, post_id: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO post_subscriptions (user_id, post_id) VALUES (?1, ?2)
            ON CONFLICT (user_id, post_id) DO NOTHING
            "#,
            params![user_id, post_id],
        )?;
        Ok(())
    }

    fn unsubscribe(&self, user_id: i64, post_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM post_subscriptions WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
        )?;
        Ok(removed > 0)
    }

    fn is_subscribed(&self, user_id: i64, post_id: i64) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM post_subscriptions WHERE user_id = ?1 AND post_id = ?2)",
            params![user_id, post_id],
            |row| row.get(0),
        )?)
    }
}
