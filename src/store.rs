//! SQLite-backed persistence for mail records, known recipients and settings.

use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

pub mod mail;
pub mod setting;
pub mod users;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS emails (
        id TEXT PRIMARY KEY,
        from_addr TEXT NOT NULL,
        to_addr TEXT NOT NULL,
        subject TEXT NOT NULL,
        received_at TEXT NOT NULL,
        spf_status TEXT NOT NULL,
        dkim_status TEXT NOT NULL,
        dmarc_status TEXT NOT NULL,
        headers TEXT NOT NULL,
        size INTEGER NOT NULL,
        raw_email TEXT NOT NULL,
        type TEXT NOT NULL DEFAULT 'received',
        starred INTEGER NOT NULL DEFAULT 0,
        readed INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_emails_type_received ON emails(type, received_at);
    CREATE INDEX IF NOT EXISTS idx_emails_starred ON emails(starred, received_at);
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT
    );
";

/// Shared handle to the single SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Database { conn: Arc::new(Mutex::new(conn)) })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// One page of a listing plus the numbers needed to render a pager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        Page {
            items,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(u64::from(page_size)),
        }
    }
}

/// `LIMIT`/`OFFSET` for a 1-based page, or `None` when the offset does not
/// fit in SQLite's integer range (such a page is necessarily empty).
pub(crate) fn page_bounds(page: u32, page_size: u32) -> Option<(i64, i64)> {
    let limit = i64::from(page_size);
    let offset = i64::from(page.saturating_sub(1)).checked_mul(limit)?;
    Some((limit, offset))
}
