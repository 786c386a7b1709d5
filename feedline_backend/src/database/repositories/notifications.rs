use crate::database::models::{NotificationKind, NotificationRecord};
use crate::query::{build_query, QueryArgs};
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteNotificationRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const NOTIFICATION_COLUMNS: &str = "id, user_id, type, actors, post_id, read, issued_at";

const USER_NOTIFICATIONS: &str = r#"
    SELECT id, user_id, type, actors, post_id, read, issued_at
    FROM notifications
    WHERE user_id = @user_id
    {{if .before}}AND id < @before{{end}}
    ORDER BY id DESC
    {{if .last}}LIMIT @last{{end}}
"#;

#[derive(Debug, thiserror::Error)]
#[error("unknown notification type `{0}`")]
struct UnknownKind(String);

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let raw_kind: String = row.get("type")?;
    let kind = NotificationKind::parse(&raw_kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(UnknownKind(raw_kind)))
    })?;
    let raw_actors: String = row.get("actors")?;
    let actors = serde_json::from_str(&raw_actors)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err)))?;
    Ok(NotificationRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        kind,
        actors,
        post_id: row.get("post_id")?,
        read: row.get("read")?,
        issued_at: row.get("issued_at")?,
    })
}

impl<'conn> SqliteNotificationRepository<'conn> {
    fn collect(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, notification_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

impl<'conn> super::NotificationRepository for SqliteNotificationRepository<'conn> {
    fn has_unread_follow_actor(&self, user_id: i64, actor: i64) -> Result<bool> {
        Ok(self.conn.query_row(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notifications, json_each(notifications.actors)
                WHERE notifications.user_id = ?1
                  AND notifications.type = 'follow'
                  AND notifications.read = 0
                  AND json_each.value = ?2
            )
            "#,
            params![user_id, actor],
            |row| row.get(0),
        )?)
    }

    fn find_unread_follow(&self, user_id: i64) -> Result<Option<NotificationRecord>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = ?1 AND type = 'follow' AND read = 0"
        );
        Ok(self
            .conn
            .query_row(&sql, params![user_id], notification_from_row)
            .optional()?)
    }

    fn create(
        &self,
        user_id: i64,
        kind: NotificationKind,
        actors: &[i64],
        post_id: Option<i64>,
        issued_at: &str,
    ) -> Result<NotificationRecord> {
        let sql = format!(
            r#"
            INSERT INTO notifications (user_id, type, actors, post_id, issued_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let actors = serde_json::to_string(actors)?;
        Ok(self.conn.query_row(
            &sql,
            params![user_id, kind.as_str(), actors, post_id, issued_at],
            notification_from_row,
        )?)
    }

    fn prepend_actor(&self, id: i64, actor: i64, issued_at: &str) -> Result<NotificationRecord> {
        let sql = format!(
            r#"
            UPDATE notifications SET actors = prepend_actor(actors, ?2), issued_at = ?3
            WHERE id = ?1
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        Ok(self
            .conn
            .query_row(&sql, params![id, actor, issued_at], notification_from_row)?)
    }

    fn upsert_for_subscribers(
        &self,
        kind: NotificationKind,
        post_id: i64,
        actor: i64,
        issued_at: &str,
    ) -> Result<Vec<NotificationRecord>> {
        let sql = format!(
            r#"
            INSERT INTO notifications (user_id, type, actors, post_id, issued_at)
            SELECT post_subscriptions.user_id, ?1, json_array(?3), ?2, ?4
            FROM post_subscriptions
            WHERE post_subscriptions.post_id = ?2 AND post_subscriptions.user_id != ?3
            ON CONFLICT (user_id, type, post_id) WHERE read = 0
            DO UPDATE SET actors = prepend_actor(notifications.actors, ?3),
                          issued_at = excluded.issued_at
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        self.collect(&sql, params![kind.as_str(), post_id, actor, issued_at])
    }

    fn upsert_for_usernames(
        &self,
        kind: NotificationKind,
        usernames: &[String],
        post_id: i64,
        actor: i64,
        issued_at: &str,
    ) -> Result<Vec<NotificationRecord>> {
        if usernames.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            INSERT INTO notifications (user_id, type, actors, post_id, issued_at)
            SELECT users.id, ?1, json_array(?4), ?3, ?5
            FROM users
            WHERE users.username IN (SELECT value FROM json_each(?2)) AND users.id != ?4
            ON CONFLICT (user_id, type, post_id) WHERE read = 0
            DO UPDATE SET actors = prepend_actor(notifications.actors, ?4),
                          issued_at = excluded.issued_at
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let usernames = serde_json::to_string(usernames)?;
        self.collect(
            &sql,
            params![kind.as_str(), usernames, post_id, actor, issued_at],
        )
    }

    fn get(&self, id: i64) -> Result<Option<NotificationRecord>> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], notification_from_row)
            .optional()?)
    }

    fn list(&self, user_id: i64, last: i64, before: Option<i64>) -> Result<Vec<NotificationRecord>> {
        let built = build_query(
            USER_NOTIFICATIONS,
            &QueryArgs::new()
                .with("user_id", user_id)
                .with("before", before)
                .with("last", last),
        )?;
        super::query_built(self.conn, &built, notification_from_row)
    }

    fn unread_count(&self, user_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
            params![user_id],
            |row| row.get(0),
        )?)
    }

    fn mark_read(&self, user_id: i64, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2 AND read = 0",
            params![id, user_id],
        )?;
        if changed > 0 {
            return Ok(true);
        }
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM notifications WHERE id = ?1 AND user_id = ?2)",
            params![id, user_id],
            |row| row.get(0),
        )?)
    }

    fn mark_all_read(&self, user_id: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
            params![user_id],
        )?)
    }
}
