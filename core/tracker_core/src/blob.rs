use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Local key-value blob storage. Values are opaque strings rewritten wholesale.
pub trait BlobStore: Send {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

pub struct SqliteBlobStore {
    conn: Connection,
}

impl SqliteBlobStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    /// Makes every later read and write fail.
    #[cfg(test)]
    pub fn drop_table_for_test(&mut self) {
        self.conn.execute_batch("DROP TABLE blobs;").unwrap();
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS blobs (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
"#,
    )
}

impl BlobStore for SqliteBlobStore {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM blobs WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let updated_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        self.conn.execute(
            r#"
INSERT INTO blobs (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value=excluded.value,
  updated_at=excluded.updated_at
"#,
            (key, value, updated_at),
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.conn.execute("DELETE FROM blobs WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl BlobStore for MemoryBlobStore {
    fn get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.blobs.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.blobs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.blobs.remove(key);
        Ok(())
    }
}
