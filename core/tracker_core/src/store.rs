use anyhow::{bail, Context};
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use std::{path::Path, sync::Arc};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::warn;

use crate::session::{sessions_key, SessionRecord};

/// Durable string → JSON value persistence.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
    async fn remove(&self, keys: &[&str]) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
"#,
    )
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let raw = {
            let conn = self.conn.lock().await;
            select_value(&conn, key)?
        };
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(err) => {
                // Unreadable row: treat as missing rather than failing every reader.
                warn!("kv key {key} holds invalid json: {err}");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let value_json = serde_json::to_string(&value)?;
        let updated_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
INSERT INTO kv (key, value_json, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value_json=excluded.value_json,
  updated_at=excluded.updated_at
            "#,
            (key, value_json, updated_at),
        )?;
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().await;
        delete_keys(&mut conn, keys)?;
        Ok(())
    }
}

fn select_value(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value_json FROM kv WHERE key = ?1")?;
    match stmt.query_row([key], |row| row.get::<_, String>(0)) {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(err),
    }
}

fn delete_keys(conn: &mut Connection, keys: &[&str]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    for key in keys {
        tx.execute("DELETE FROM kv WHERE key = ?1", [key])?;
    }
    tx.commit()
}

pub async fn get_string(store: &dyn KvStore, key: &str) -> anyhow::Result<Option<String>> {
    Ok(store
        .get(key)
        .await?
        .and_then(|v| v.as_str().map(|s| s.to_string())))
}

/// Appends one record to the day's log. The caller is the only writer of
/// session keys (all appends run on the sequential queue), so read-modify-write
/// is safe here.
pub async fn append_session(
    store: &dyn KvStore,
    date: &str,
    record: &SessionRecord,
) -> anyhow::Result<()> {
    let key = sessions_key(date);
    let mut sessions = match store.get(&key).await? {
        None => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => bail!("{key} does not hold a session list; refusing to overwrite it"),
    };
    sessions.push(serde_json::to_value(record)?);
    store.set(&key, Value::Array(sessions)).await
}

/// Loads the day's records in append order. Malformed entries are skipped.
pub async fn load_sessions(store: &dyn KvStore, date: &str) -> anyhow::Result<Vec<SessionRecord>> {
    let key = sessions_key(date);
    let items = match store.get(&key).await? {
        Some(Value::Array(items)) => items,
        Some(_) => {
            warn!("{key} does not hold a session list; ignoring it");
            return Ok(Vec::new());
        }
        None => return Ok(Vec::new()),
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<SessionRecord>(item) {
            Ok(r) if r.duration_ms >= 0 => out.push(r),
            Ok(r) => warn!("skipping negative-duration record for {}", r.url),
            Err(err) => warn!("skipping malformed record in {key}: {err}"),
        }
    }
    Ok(out)
}
