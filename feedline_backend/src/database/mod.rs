pub mod models;
pub mod repositories;

use crate::config::FeedlinePaths;
use anyhow::{anyhow, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub(crate) const MIGRATIONS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        username TEXT NOT NULL UNIQUE,
        avatar TEXT,
        followers_count INTEGER NOT NULL DEFAULT 0 CHECK (followers_count >= 0),
        followings_count INTEGER NOT NULL DEFAULT 0 CHECK (followings_count >= 0),
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS follows (
        follower_id INTEGER NOT NULL,
        following_id INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (follower_id, following_id),
        CHECK (follower_id != following_id),
        FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (following_id) REFERENCES users(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_follows_following ON follows(following_id);

    CREATE TABLE IF NOT EXISTS posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        spoiler_of TEXT,
        nsfw INTEGER NOT NULL DEFAULT 0,
        likes_count INTEGER NOT NULL DEFAULT 0 CHECK (likes_count >= 0),
        comments_count INTEGER NOT NULL DEFAULT 0 CHECK (comments_count >= 0),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_posts_user ON posts(user_id, id);

    CREATE TABLE IF NOT EXISTS post_likes (
        user_id INTEGER NOT NULL,
        post_id INTEGER NOT NULL,
        PRIMARY KEY (user_id, post_id),
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS timeline_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        post_id INTEGER NOT NULL,
        UNIQUE (user_id, post_id),
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        post_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        likes_count INTEGER NOT NULL DEFAULT 0 CHECK (likes_count >= 0),
        created_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id, id);

    CREATE TABLE IF NOT EXISTS comment_likes (
        user_id INTEGER NOT NULL,
        comment_id INTEGER NOT NULL,
        PRIMARY KEY (user_id, comment_id),
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (comment_id) REFERENCES comments(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS post_subscriptions (
        user_id INTEGER NOT NULL,
        post_id INTEGER NOT NULL,
        PRIMARY KEY (user_id, post_id),
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_post_subscriptions_post ON post_subscriptions(post_id);

    CREATE TABLE IF NOT EXISTS notifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        type TEXT NOT NULL,
        actors TEXT NOT NULL DEFAULT '[]',
        post_id INTEGER,
        read INTEGER NOT NULL DEFAULT 0,
        issued_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
    );

    -- One unread notification per (recipient, type, post). Read rows leave the
    -- index, so later activity opens a fresh notification.
    CREATE UNIQUE INDEX IF NOT EXISTS ux_notifications_unread_post
        ON notifications(user_id, type, post_id) WHERE read = 0;

    -- NULL post ids never collide above; follow notifications need their own.
    CREATE UNIQUE INDEX IF NOT EXISTS ux_notifications_unread_unscoped
        ON notifications(user_id, type) WHERE read = 0 AND post_id IS NULL;

    CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, id);
"#;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    newly_created: bool,
}

impl Database {
    pub fn connect(paths: &FeedlinePaths) -> Result<Self> {
        let newly_created = !paths.db_path.exists();
        let conn = Connection::open(&paths.db_path)?;
        Ok(Self::from_connection(conn, newly_created))
    }

    pub fn from_connection(conn: Connection, newly_created: bool) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            newly_created,
        }
    }

    /// Applies the schema and registers the SQL functions the repositories
    /// rely on. Must run before any repository is used.
    pub fn ensure_migrations(&self) -> Result<bool> {
        self.with_conn(|conn| {
            register_functions(conn)?;
            conn.execute_batch(MIGRATIONS)?;
            Ok(())
        })?;
        Ok(self.newly_created)
    }

    pub fn with_repositories<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(repositories::SqliteRepositories<'_>) -> Result<T>,
    {
        self.with_conn(|conn| {
            let repos = repositories::SqliteRepositories::new(conn);
            f(repos)
        })
    }

    /// Runs `f` inside one transaction. The transaction commits only when `f`
    /// returns `Ok`; any error rolls every write back.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<anyhow::Error>,
        F: FnOnce(&repositories::SqliteRepositories<'_>) -> Result<T, E>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        let tx = guard
            .unchecked_transaction()
            .map_err(anyhow::Error::from)?;
        let value = f(&repositories::SqliteRepositories::new(&tx))?;
        tx.commit().map_err(anyhow::Error::from)?;
        Ok(value)
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        f(&guard)
    }
}

/// `prepend_actor(actors_json, actor)` moves `actor` to the front of a JSON
/// array of ids, removing any earlier occurrence.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "prepend_actor",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let raw: Option<String> = ctx.get(0)?;
            let actor: i64 = ctx.get(1)?;
            let current: Vec<i64> = match raw.as_deref() {
                None | Some("") => Vec::new(),
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?,
            };
            serde_json::to_string(&prepend_actor(current, actor))
                .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))
        },
    )?;
    Ok(())
}

pub(crate) fn prepend_actor(actors: Vec<i64>, actor: i64) -> Vec<i64> {
    let mut ordered = Vec::with_capacity(actors.len() + 1);
    ordered.push(actor);
    ordered.extend(actors.into_iter().filter(|existing| *existing != actor));
    ordered
}

#[cfg(test)]
pub(crate) fn in_memory() -> Database {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    let db = Database::from_connection(conn, true);
    db.ensure_migrations().expect("migrations apply");
    db
}
