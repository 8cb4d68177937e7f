use log::warn;
use rusqlite::{params, OptionalExtension};

use crate::store::{Database, Result};

/// Key/value table of JSON-serialised configuration.
#[derive(Clone)]
pub struct SettingsStore {
    db: Database,
}

impl SettingsStore {
    pub fn new(db: Database) -> Self {
        SettingsStore { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.lock().await;
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    pub async fn all(&self) -> Result<Vec<(String, Option<String>)>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub async fn upsert(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Makes the table hold exactly `entries`: listed keys are written, every
    /// other key is deleted. Returns the deleted keys.
    pub async fn replace_all(&self, entries: &[(String, String)]) -> Result<Vec<String>> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        let existing = {
            let mut stmt = tx.prepare("SELECT key FROM settings")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            keys
        };

        for (key, value) in entries {
            tx.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }

        let mut removed = Vec::new();
        for key in existing {
            if !entries.iter().any(|(k, _)| *k == key) {
                tx.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
                removed.push(key);
            }
        }
        tx.commit()?;

        if !removed.is_empty() {
            warn!("Settings replaced, removed keys: {:?}", removed);
        }
        Ok(removed)
    }
}
