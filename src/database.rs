use rusqlite::{Connection, OptionalExtension};
use std::path::PathBuf;
use thiserror::Error;

use crate::store::{StorageBackend, StorageError};
use crate::utils::now_timestamp;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    DirectoryError(String),
}

/// SQLite-backed key-value storage: one `kv` table of key -> JSON text
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database connection and initialize the schema
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let db_path = PathBuf::from(path);

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::DirectoryError(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        tracing::debug!(path = %db_path.display(), "opened planner database");

        let db = Database { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Open a database that lives only as long as this value
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let db = Database {
            conn: Connection::open_in_memory()?,
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key             TEXT PRIMARY KEY,
                value           TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Get the stored text for a key
    pub fn get_value(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace several keys in one transaction
    pub fn put_values(&self, entries: &[(String, String)]) -> Result<(), DatabaseError> {
        let now = now_timestamp();
        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete a key. Deleting a missing key is not an error.
    pub fn delete_value(&self, key: &str) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        tx.commit()?;
        Ok(())
    }

    /// Delete every key
    pub fn delete_all(&self) -> Result<(), DatabaseError> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }

    /// Total byte length of all keys and values
    pub fn total_size(&self) -> Result<u64, DatabaseError> {
        let size: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) FROM kv",
            [],
            |row| row.get(0),
        )?;
        Ok(size.max(0) as u64)
    }
}

impl StorageBackend for Database {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get_value(key)?)
    }

    fn write(&self, entries: &[(String, String)]) -> Result<(), StorageError> {
        Ok(self.put_values(entries)?)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        Ok(self.delete_value(key)?)
    }

    fn delete_all(&self) -> Result<(), StorageError> {
        Ok(Database::delete_all(self)?)
    }

    fn total_size(&self) -> Result<u64, StorageError> {
        Ok(Database::total_size(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("planner.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new(path).unwrap();
            db.put_values(&[("k".into(), "[1,2]".into())]).unwrap();
        }

        let db = Database::new(path).unwrap();
        assert_eq!(db.get_value("k").unwrap().as_deref(), Some("[1,2]"));
    }

    #[test]
    fn put_overwrites_and_delete_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.put_values(&[("k".into(), "1".into())]).unwrap();
        db.put_values(&[("k".into(), "22".into())]).unwrap();
        assert_eq!(db.get_value("k").unwrap().as_deref(), Some("22"));

        db.delete_value("k").unwrap();
        db.delete_value("k").unwrap();
        assert_eq!(db.get_value("k").unwrap(), None);
    }

    #[test]
    fn total_size_counts_keys_and_values_in_bytes() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.total_size().unwrap(), 0);
        db.put_values(&[("ab".into(), "cde".into()), ("é".into(), "x".into())])
            .unwrap();
        assert_eq!(db.total_size().unwrap(), 2 + 3 + 2 + 1);
    }
}
