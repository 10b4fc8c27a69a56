use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Homework,
    Marks,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Homework => "homework",
            Domain::Marks => "marks",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest snapshot per user and domain. Implementations must not interleave
/// two writes for the same key.
pub trait SnapshotStore: Send + Sync {
    fn load(&self, user_id: i64, domain: Domain) -> Result<Option<String>>;
    fn save(&self, user_id: i64, domain: Domain, payload: &str) -> Result<()>;
}

/// Loads and decodes the stored snapshot. A payload that no longer decodes
/// (older layout) is reported as absent so the caller starts a fresh baseline.
pub fn load_snapshot<T: DeserializeOwned>(store: &dyn SnapshotStore, user_id: i64, domain: Domain) -> Result<Option<T>> {
    let Some(payload) = store.load(user_id, domain)? else {
        return Ok(None);
    };
    match serde_json::from_str(&payload) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(err) => {
            tracing::warn!(user_id, %domain, error = %err, "Stored snapshot no longer decodes, discarding it");
            Ok(None)
        }
    }
}

pub fn save_snapshot<T: Serialize + ?Sized>(store: &dyn SnapshotStore, user_id: i64, domain: Domain, snapshot: &T) -> Result<()> {
    let payload = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
    store.save(user_id, domain, &payload)
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| anyhow!("database connection lock poisoned"))?;
        f(&conn)
    }

    fn init(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS snapshots (
                  user_id INTEGER NOT NULL,
                  domain TEXT NOT NULL,
                  payload TEXT NOT NULL,
                  saved_at TEXT NOT NULL,
                  PRIMARY KEY (user_id, domain)
                );
                "#,
            )?;
            Ok(())
        })
    }
}

impl SnapshotStore for Database {
    fn load(&self, user_id: i64, domain: Domain) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let payload = conn
                .query_row(
                    "SELECT payload FROM snapshots WHERE user_id = ? AND domain = ?",
                    params![user_id, domain.as_str()],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .with_context(|| format!("Failed to load {domain} snapshot for user {user_id}"))?;
            Ok(payload)
        })
    }

    fn save(&self, user_id: i64, domain: Domain, payload: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snapshots (user_id, domain, payload, saved_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT (user_id, domain) DO UPDATE SET payload = excluded.payload, saved_at = excluded.saved_at",
                params![user_id, domain.as_str(), payload, now],
            )
            .with_context(|| format!("Failed to save {domain} snapshot for user {user_id}"))?;
            Ok(())
        })
    }
}

/// In-process store without persistence.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<(i64, Domain), String>>,
}

impl SnapshotStore for MemoryStore {
    fn load(&self, user_id: i64, domain: Domain) -> Result<Option<String>> {
        let snapshots = self.snapshots.lock().map_err(|_| anyhow!("snapshot map lock poisoned"))?;
        Ok(snapshots.get(&(user_id, domain)).cloned())
    }

    fn save(&self, user_id: i64, domain: Domain, payload: &str) -> Result<()> {
        let mut snapshots = self.snapshots.lock().map_err(|_| anyhow!("snapshot map lock poisoned"))?;
        snapshots.insert((user_id, domain), payload.to_string());
        Ok(())
    }
}
