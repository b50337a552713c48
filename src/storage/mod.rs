pub mod memory;
pub mod repository;

use async_trait::async_trait;
use rusqlite_migration::{Migrations, M};
use serde_json::Value;

use crate::error::{Error, Result};

pub use memory::MemoryStore;

/// Persistent key/value store backing the offline cache.
///
/// Keys are full request URLs (plus a few internal bookkeeping keys);
/// values are arbitrary JSON. Implementations must not interpret either.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: &Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Database wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes writes via
/// `tokio_rusqlite`'s internal channel; the reader can proceed without blocking.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

impl Database {
    /// Open the database at the default path (`~/.offlinesync/offlinesync.db`).
    pub async fn open() -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".offlinesync");
        std::fs::create_dir_all(&dir).map_err(|e| Error::Config(e.to_string()))?;
        Self::open_at(dir.join("offlinesync.db")).await
    }

    /// Open the database at the given path.
    pub async fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // For in-memory, we share the same connection for reader/writer
        // since in-memory DBs are per-connection.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA busy_timeout=5000;",
            )?;
            let migrations =
                Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))]);
            migrations.to_latest(conn)?;
            Ok::<(), Error>(())
        })
        .await
        .map_err(|e| match e {
            tokio_rusqlite::Error::Error(e) => e,
            other => Error::Database(other.to_string()),
        })
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    /// Get a reference to the writer connection.
    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    /// Get a reference to the reader connection.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }

    /// Number of cached entries (responses plus bookkeeping keys).
    pub async fn entry_count(&self) -> Result<i64> {
        let count = self
            .reader
            .call(|conn| repository::count_entries(conn))
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl CacheStore for Database {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .reader
            .call({
                let key = key.to_string();
                move |conn| repository::get_entry(conn, &key)
            })
            .await?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.writer
            .call({
                let key = key.to_string();
                move |conn| repository::set_entry(conn, &key, &text)
            })
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.writer
            .call({
                let key = key.to_string();
                move |conn| repository::remove_entry(conn, &key)
            })
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.writer
            .call(|conn| repository::clear_entries(conn))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_memory() {
        let db = Database::open_memory().await.unwrap();

        let tables: Vec<String> = db
            .reader()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok::<Vec<String>, rusqlite::Error>(rows.filter_map(|r| r.ok()).collect())
            })
            .await
            .unwrap();

        assert!(tables.contains(&"cache_entries".to_string()));
        assert!(tables.contains(&"app_config".to_string()));
    }

    #[tokio::test]
    async fn test_newer_schema_is_a_migration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("PRAGMA user_version = 99;")
            .unwrap();

        let err = Database::open_at(&path).await.err().unwrap();
        assert!(matches!(err, Error::Migration(_)), "{err}");
    }

    #[tokio::test]
    async fn test_cache_store_round_trip() {
        let db = Database::open_memory().await.unwrap();
        let key = "https://api.example.com/customers/1";

        assert_eq!(db.get(key).await.unwrap(), None);

        db.set(key, &json!({"id": 1, "name": "A"})).await.unwrap();
        assert_eq!(db.get(key).await.unwrap(), Some(json!({"id": 1, "name": "A"})));

        db.set(key, &json!({"id": 1, "name": "B"})).await.unwrap();
        assert_eq!(db.get(key).await.unwrap(), Some(json!({"id": 1, "name": "B"})));
        assert_eq!(db.entry_count().await.unwrap(), 1);

        db.remove(key).await.unwrap();
        assert_eq!(db.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_keeps_config() {
        let db = Database::open_memory().await.unwrap();
        db.set("https://api.example.com/a", &json!([1, 2])).await.unwrap();
        db.set("https://api.example.com/b", &json!(null)).await.unwrap();
        db.writer()
            .call(|conn| repository::set_config(conn, "api_base", "https://api.example.com"))
            .await
            .unwrap();

        db.clear().await.unwrap();

        assert_eq!(db.entry_count().await.unwrap(), 0);
        let base = db
            .reader()
            .call(|conn| repository::get_config(conn, "api_base"))
            .await
            .unwrap();
        assert_eq!(base.as_deref(), Some("https://api.example.com"));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let db = Database::open_at(&path).await.unwrap();
            db.set("offlinesync:lastSyncAt", &json!(1_700_000_000_000i64))
                .await
                .unwrap();
        }

        let db = Database::open_at(&path).await.unwrap();
        assert_eq!(
            db.get("offlinesync:lastSyncAt").await.unwrap(),
            Some(json!(1_700_000_000_000i64))
        );
    }
}
