//! SQLite-backed record store, one database file per collection

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use rusqlite_migration::{M, Migrations};

use super::RecordStore;
use crate::models::{PostId, PostRecord, validate_collection_name};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE posts (
                id TEXT PRIMARY KEY,
                author TEXT NOT NULL,
                title TEXT NOT NULL,
                selftext TEXT NOT NULL,
                created_utc INTEGER NOT NULL,
                ups INTEGER NOT NULL DEFAULT 0,
                downs INTEGER NOT NULL DEFAULT 0,
                upvote_ratio REAL NOT NULL DEFAULT 0,
                num_comments INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_posts_created_utc ON posts(created_utc DESC);
            "#,
        ),
    ])
}

/// Record store keeping `<root>/<collection>.sqlite3` per collection
///
/// Connections are opened lazily and cached.
pub struct SqliteRecordStore {
    root: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl SqliteRecordStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create data directory {}", root.display()))?;
        Ok(Self {
            root,
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Database file for a collection
    pub fn db_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.sqlite3", collection))
    }

    fn open(path: &Path) -> Result<Connection> {
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // WAL keeps reads cheap while a merge rewrites the table
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        if !validate_collection_name(collection) {
            bail!("Invalid collection name: {:?}", collection);
        }

        let mut connections = self
            .connections
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))?;

        if !connections.contains_key(collection) {
            let conn = Self::open(&self.db_path(collection))?;
            connections.insert(collection.to_string(), conn);
        }

        let conn = connections
            .get_mut(collection)
            .context("connection cache lost an entry")?;
        f(conn)
    }
}

impl RecordStore for SqliteRecordStore {
    fn exists(&self, collection: &str) -> Result<bool> {
        if !validate_collection_name(collection) {
            bail!("Invalid collection name: {:?}", collection);
        }
        Ok(self.db_path(collection).exists())
    }

    fn load(&self, collection: &str) -> Result<Vec<PostRecord>> {
        if !self.exists(collection)? {
            return Ok(Vec::new());
        }

        self.with_connection(collection, |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, author, title, selftext, created_utc,
                       ups, downs, upvote_ratio, num_comments
                FROM posts
                ORDER BY created_utc DESC, id ASC
                "#,
            )?;

            let rows = stmt.query_map([], |row| {
                let created: i64 = row.get(4)?;
                let created_utc = DateTime::<Utc>::from_timestamp(created, 0).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        Type::Integer,
                        format!("created_utc {} out of range", created).into(),
                    )
                })?;
                Ok(PostRecord {
                    id: PostId(row.get(0)?),
                    author: row.get(1)?,
                    title: row.get(2)?,
                    selftext: row.get(3)?,
                    created_utc,
                    ups: row.get(5)?,
                    downs: row.get(6)?,
                    upvote_ratio: row.get(7)?,
                    num_comments: row.get(8)?,
                })
            })?;

            let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    fn save(&self, collection: &str, records: &[PostRecord]) -> Result<()> {
        self.with_connection(collection, |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM posts", [])?;
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT OR REPLACE INTO posts
                        (id, author, title, selftext, created_utc,
                         ups, downs, upvote_ratio, num_comments)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )?;
                for r in records {
                    stmt.execute(params![
                        r.id.as_str(),
                        r.author,
                        r.title,
                        r.selftext,
                        r.created_utc.timestamp(),
                        r.ups,
                        r.downs,
                        r.upvote_ratio,
                        r.num_comments,
                    ])?;
                }
            }
            tx.commit()
                .with_context(|| format!("Failed to save r/{}", collection))?;
            Ok(())
        })
    }

    fn latest_timestamp(&self, collection: &str) -> Result<Option<DateTime<Utc>>> {
        if !self.exists(collection)? {
            return Ok(None);
        }

        self.with_connection(collection, |conn| {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(created_utc) FROM posts", [], |row| row.get(0))?;
            Ok(max.and_then(|secs| DateTime::from_timestamp(secs, 0)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> (SqliteRecordStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRecordStore::new(dir.path().join("data")).unwrap();
        (store, dir)
    }

    fn record(id: &str, secs: i64) -> PostRecord {
        let mut r = PostRecord::new(id, DateTime::from_timestamp(secs, 0).unwrap());
        r.author = format!("author_{}", id);
        r.title = format!("Title {}", id);
        r.upvote_ratio = 0.5;
        r
    }

    #[test]
    fn test_missing_collection() {
        let (store, _dir) = create_test_store();
        assert!(!store.exists("sweden").unwrap());
        assert!(store.load("sweden").unwrap().is_empty());
        assert_eq!(store.latest_timestamp("sweden").unwrap(), None);
        // Reading must not create the file
        assert!(!store.db_path("sweden").exists());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (store, _dir) = create_test_store();
        let records = vec![record("a", 100), record("c", 300), record("b", 200)];

        store.save("sweden", &records).unwrap();

        assert!(store.exists("sweden").unwrap());
        let loaded = store.load("sweden").unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(loaded[0], record("c", 300));
    }

    #[test]
    fn test_save_overwrites() {
        let (store, _dir) = create_test_store();
        store.save("sweden", &[record("a", 100), record("b", 200)]).unwrap();
        store.save("sweden", &[record("z", 50)]).unwrap();

        let loaded = store.load("sweden").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id.as_str(), "z");
    }

    #[test]
    fn test_merge_and_latest_timestamp() {
        let (store, _dir) = create_test_store();
        store
            .save("sweden", &[record("a", 100), record("b", 200), record("c", 300)])
            .unwrap();

        let summary = store
            .merge("sweden", vec![record("d", 350), record("e", 400), record("c", 300)])
            .unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.total, 5);
        assert_eq!(
            store.latest_timestamp("sweden").unwrap().map(|t| t.timestamp()),
            Some(400)
        );
    }

    #[test]
    fn test_collections_are_separate_files() {
        let (store, _dir) = create_test_store();
        store.save("sweden", &[record("a", 100)]).unwrap();
        store.save("norway", &[record("b", 200)]).unwrap();

        assert!(store.db_path("sweden").exists());
        assert!(store.db_path("norway").exists());
        assert_eq!(store.load("sweden").unwrap().len(), 1);
        assert_eq!(store.load("norway").unwrap()[0].id.as_str(), "b");
    }

    #[test]
    fn test_rejects_path_like_names() {
        let (store, _dir) = create_test_store();
        assert!(store.save("../escape", &[record("a", 1)]).is_err());
        assert!(store.exists("../escape").is_err());
    }

    #[test]
    fn test_out_of_range_timestamp_is_an_error() {
        let (store, _dir) = create_test_store();
        store.save("sweden", &[record("a", 100)]).unwrap();

        store
            .with_connection("sweden", |conn| {
                conn.execute(
                    "UPDATE posts SET created_utc = ?1 WHERE id = 'a'",
                    params![i64::MAX],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(store.load("sweden").is_err());
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteRecordStore::new(dir.path()).unwrap();
            store.save("sweden", &[record("a", 100)]).unwrap();
        }
        let store = SqliteRecordStore::new(dir.path()).unwrap();
        assert_eq!(store.load("sweden").unwrap().len(), 1);
    }
}
