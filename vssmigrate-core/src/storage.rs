use crate::error::{Error, Result};
use crate::models::{Action, Item, Revision};
use crate::source::{ContentSource, ItemHistory, RevisionSource};
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const SCHEMA_VERSION: i32 = 1;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// SQLite-backed store for the revision log extracted from a SourceSafe
/// database. Revisions keep their insertion order, which is the order the
/// extractor read them in.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut storage = Self { conn };
        storage.initialize()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut storage = Self { conn };
        storage.initialize()?;
        Ok(storage)
    }

    fn initialize(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS items (
                physical TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                is_project INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blobs (
                hash TEXT PRIMARY KEY,
                data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS revisions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                physical TEXT NOT NULL,
                item_path TEXT NOT NULL,
                is_project INTEGER NOT NULL,
                version INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                user TEXT NOT NULL,
                comment TEXT,
                action TEXT NOT NULL,
                content_hash TEXT,
                FOREIGN KEY (physical) REFERENCES items(physical),
                FOREIGN KEY (content_hash) REFERENCES blobs(hash)
            );

            CREATE INDEX IF NOT EXISTS idx_revisions_item ON revisions(physical, version);
            CREATE INDEX IF NOT EXISTS idx_revisions_user ON revisions(user);
            "#,
        )?;

        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        match version {
            None => {
                self.conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v != SCHEMA_VERSION => {
                return Err(Error::InvalidSource(format!(
                    "history database has schema version {}, expected {}",
                    v, SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }

    // Item operations
    pub fn upsert_item(&self, item: &Item) -> Result<()> {
        self.conn.execute(
            "INSERT INTO items (physical, path, is_project) VALUES (?1, ?2, ?3)
             ON CONFLICT(physical) DO UPDATE SET path = excluded.path, is_project = excluded.is_project",
            params![item.physical, item.path, item.is_project as i32],
        )?;
        Ok(())
    }

    pub fn item_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // Revision operations
    pub fn insert_revision(&self, revision: &Revision, content: Option<&[u8]>) -> Result<()> {
        if !self.item_exists(&revision.item.physical)? {
            self.upsert_item(&revision.item)?;
        }

        let content_hash = match content {
            Some(data) => Some(self.store_blob(data)?),
            None => None,
        };
        let action = serde_json::to_string(&revision.action)?;

        self.conn.execute(
            "INSERT INTO revisions (physical, item_path, is_project, version, timestamp,
                                    user, comment, action, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                revision.item.physical,
                revision.item.path,
                revision.item.is_project as i32,
                revision.version,
                revision.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                revision.user,
                revision.comment,
                action,
                content_hash,
            ],
        )?;

        Ok(())
    }

    /// Inserts all revisions in one transaction; nothing is stored if any
    /// insert fails.
    pub fn insert_batch(&self, revisions: &[(Revision, Option<Vec<u8>>)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (revision, content) in revisions {
            self.insert_revision(revision, content.as_deref())?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn revision_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM revisions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Distinct usernames, lowercased, in sorted order.
    pub fn users(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT lower(user) FROM revisions ORDER BY lower(user)")?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(users)
    }

    // Helper methods
    fn item_exists(&self, physical: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM items WHERE physical = ?1",
                params![physical],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn store_blob(&self, data: &[u8]) -> Result<String> {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(data);
        let hash = hex::encode(hasher.finalize());

        self.conn.execute(
            "INSERT OR IGNORE INTO blobs (hash, data) VALUES (?1, ?2)",
            params![hash, data],
        )?;
        Ok(hash)
    }

    fn load_items(&self) -> Result<HashMap<String, Item>> {
        let mut stmt = self
            .conn
            .prepare("SELECT physical, path, is_project FROM items")?;
        let items = stmt
            .query_map([], |row| {
                let is_project: i32 = row.get(2)?;
                Ok(Item {
                    physical: row.get(0)?,
                    path: row.get(1)?,
                    is_project: is_project != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<Item>>>()?;
        Ok(items
            .into_iter()
            .map(|item| (item.physical.clone(), item))
            .collect())
    }

    fn revision_from_row(row: &Row) -> rusqlite::Result<Revision> {
        let physical: String = row.get(0)?;
        let item_path: String = row.get(1)?;
        let is_project: i32 = row.get(2)?;
        let version: u32 = row.get(3)?;
        let timestamp: String = row.get(4)?;
        let user: String = row.get(5)?;
        let comment: Option<String> = row.get(6)?;
        let action: String = row.get(7)?;

        let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
        let action: Action = serde_json::from_str(&action)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

        Ok(Revision {
            timestamp,
            user,
            item: Item {
                physical,
                path: item_path,
                is_project: is_project != 0,
            },
            version,
            comment,
            action,
        })
    }
}

impl RevisionSource for Storage {
    fn histories(&self) -> Result<Vec<ItemHistory>> {
        let items = self.load_items()?;
        let mut stmt = self.conn.prepare(
            "SELECT physical, item_path, is_project, version, timestamp, user, comment, action
             FROM revisions ORDER BY seq",
        )?;
        let rows = stmt.query_map([], Self::revision_from_row)?;

        let mut histories: Vec<ItemHistory> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in rows {
            let revision = row?;
            let slot = match index.get(&revision.item.physical) {
                Some(&slot) => slot,
                None => {
                    let item = items
                        .get(&revision.item.physical)
                        .cloned()
                        .unwrap_or_else(|| revision.item.clone());
                    histories.push(ItemHistory {
                        item,
                        revisions: Vec::new(),
                    });
                    index.insert(revision.item.physical.clone(), histories.len() - 1);
                    histories.len() - 1
                }
            };
            histories[slot].revisions.push(revision);
        }

        Ok(histories)
    }
}

impl ContentSource for Storage {
    fn file_content(&self, revision: &Revision) -> Result<Option<Vec<u8>>> {
        let data: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT b.data FROM revisions r LEFT JOIN blobs b ON b.hash = r.content_hash
                 WHERE r.physical = ?1 AND r.version = ?2 AND r.content_hash IS NOT NULL
                 ORDER BY r.seq DESC LIMIT 1",
                params![revision.item.physical, revision.version],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.flatten())
    }
}
