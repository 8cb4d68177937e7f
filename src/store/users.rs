use chrono::Utc;
use log::info;
use rusqlite::{params, Connection};

use crate::mail::format_timestamp;
use crate::store::{page_bounds, Database, Page, Result};

/// Set of addresses seen on sent or received mail.
#[derive(Clone)]
pub struct UserDirectory {
    db: Database,
}

/// Adds `email` unless already known. Returns whether it was new.
pub(crate) fn insert_if_absent(conn: &Connection, email: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (email, created_at) VALUES (?1, ?2)",
        params![email, format_timestamp(Utc::now())],
    )?;
    if inserted > 0 {
        info!("New user added: {}", email);
    }
    Ok(inserted > 0)
}

impl UserDirectory {
    pub fn new(db: Database) -> Self {
        UserDirectory { db }
    }

    #[cfg(test)]
    pub async fn insert_if_absent(&self, email: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        insert_if_absent(&conn, email)
    }

    pub async fn list(&self, page: u32, page_size: u32) -> Result<Page<String>> {
        let conn = self.db.lock().await;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let Some((limit, offset)) = page_bounds(page, page_size) else {
            return Ok(Page::new(Vec::new(), total as u64, page, page_size));
        };

        let mut stmt = conn.prepare("SELECT email FROM users ORDER BY id LIMIT ?1 OFFSET ?2")?;
        let emails = stmt
            .query_map(params![limit, offset], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(Page::new(emails, total as u64, page, page_size))
    }

    /// Returns `false` when the address was not in the directory.
    pub async fn delete(&self, email: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        let removed = conn.execute("DELETE FROM users WHERE email = ?1", params![email])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_is_deduplicated() {
        let users = UserDirectory::new(Database::open_in_memory().unwrap());
        assert!(users.insert_if_absent("a@x.com").await.unwrap());
        assert!(!users.insert_if_absent("a@x.com").await.unwrap());
        assert!(users.insert_if_absent("b@x.com").await.unwrap());

        let page = users.list(1, 20).await.unwrap();
        assert_eq!(page.items, vec!["a@x.com".to_string(), "b@x.com".to_string()]);
        assert_eq!(page.total, 2);
        assert_eq!(page.total_pages, 1);
    }

    #[tokio::test]
    async fn test_list_pages_in_insertion_order() {
        let users = UserDirectory::new(Database::open_in_memory().unwrap());
        for i in 0..5 {
            users.insert_if_absent(&format!("u{}@x.com", i)).await.unwrap();
        }

        let second = users.list(2, 2).await.unwrap();
        assert_eq!(second.items, vec!["u2@x.com".to_string(), "u3@x.com".to_string()]);
        assert_eq!(second.total_pages, 3);
        assert!(users.list(4, 2).await.unwrap().items.is_empty());

        let far = users.list(u32::MAX, u32::MAX).await.unwrap();
        assert!(far.items.is_empty());
        assert_eq!(far.total, 5);
    }

    #[tokio::test]
    async fn test_delete_reports_missing() {
        let users = UserDirectory::new(Database::open_in_memory().unwrap());
        users.insert_if_absent("a@x.com").await.unwrap();
        assert!(users.delete("a@x.com").await.unwrap());
        assert!(!users.delete("a@x.com").await.unwrap());
    }
}
