use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, ErrorCode, OptionalExtension, Row};

use crate::mail::{format_timestamp, normalize_timestamp, AuthResult, Direction, ListFilter, MailRecord};
use crate::store::{page_bounds, users, Database, Page, Result, StoreError};

const COLUMNS: &str = "id, from_addr, to_addr, subject, received_at, spf_status, dkim_status, \
                       dmarc_status, headers, size, raw_email, type, starred, readed";

// Keeps batch deletes well under SQLite's bound-parameter limit.
const DELETE_CHUNK: usize = 500;

#[derive(Clone)]
pub struct MailStore {
    db: Database,
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn row_to_record(row: &Row) -> rusqlite::Result<MailRecord> {
    let headers: String = row.get(8)?;
    let direction: String = row.get(11)?;
    Ok(MailRecord {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        subject: row.get(3)?,
        received_at: row.get(4)?,
        spf_status: AuthResult::parse_lenient(&row.get::<_, String>(5)?),
        dkim_status: AuthResult::parse_lenient(&row.get::<_, String>(6)?),
        dmarc_status: AuthResult::parse_lenient(&row.get::<_, String>(7)?),
        headers: serde_json::from_str(&headers).map_err(|e| conversion_error(8, e))?,
        size: row.get(9)?,
        raw_email: row.get(10)?,
        direction: direction
            .parse()
            .map_err(|e: String| conversion_error(11, std::io::Error::other(e)))?,
        starred: row.get(12)?,
        read: row.get(13)?,
    })
}

/// Query parameters selecting one list view: `(type, starred_only)`.
fn filter_params(filter: ListFilter) -> (Option<&'static str>, bool) {
    match filter {
        ListFilter::Direction(direction) => (Some(direction.as_str()), false),
        ListFilter::Starred => (None, true),
    }
}

impl MailStore {
    pub fn new(db: Database) -> Self {
        MailStore { db }
    }

    /// Inserts a new record and records its counterpart address in the user
    /// directory: the recipient for received mail, the sender for sent mail.
    pub async fn store(&self, record: &MailRecord) -> Result<()> {
        let received_at = normalize_timestamp(&record.received_at)
            .map_err(|_| StoreError::InvalidTimestamp(record.received_at.clone()))?;
        let headers = serde_json::to_string(&record.headers)?;

        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            &format!(
                "INSERT INTO emails ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                COLUMNS
            ),
            params![
                record.id,
                record.from,
                record.to,
                record.subject,
                received_at,
                record.spf_status.as_str(),
                record.dkim_status.as_str(),
                record.dmarc_status.as_str(),
                headers,
                record.size,
                record.raw_email,
                record.direction.as_str(),
                record.starred,
                record.read,
            ],
        );
        match inserted {
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(StoreError::Conflict(format!("email {}", record.id)));
            }
            other => other?,
        };

        let contact = match record.direction {
            Direction::Received => &record.to,
            Direction::Sent => &record.from,
        };
        users::insert_if_absent(&tx, contact)?;
        tx.commit()?;

        debug!("Stored {} email {}", record.direction, record.id);
        Ok(())
    }

    /// Fetches a record and marks it read. The returned record already
    /// carries `read = true`.
    pub async fn get_by_id(&self, id: &str, direction: Option<Direction>) -> Result<MailRecord> {
        let conn = self.db.lock().await;
        let mut record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM emails WHERE id = ?1 AND (?2 IS NULL OR type = ?2)",
                    COLUMNS
                ),
                params![id, direction.map(|d| d.as_str())],
                row_to_record,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("email {}", id)))?;

        if !record.read {
            conn.execute("UPDATE emails SET readed = 1 WHERE id = ?1", params![id])?;
            record.read = true;
        }
        Ok(record)
    }

    /// Newest first. Pages past the end come back empty.
    pub async fn list(&self, filter: ListFilter, page: u32, page_size: u32) -> Result<Page<MailRecord>> {
        let conn = self.db.lock().await;
        let (direction, starred_only) = filter_params(filter);

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM emails WHERE (?1 IS NULL OR type = ?1) AND (?2 = 0 OR starred = 1)",
            params![direction, starred_only],
            |row| row.get(0),
        )?;
        let Some((limit, offset)) = page_bounds(page, page_size) else {
            return Ok(Page::new(Vec::new(), total as u64, page, page_size));
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM emails
             WHERE (?1 IS NULL OR type = ?1) AND (?2 = 0 OR starred = 1)
             ORDER BY received_at DESC, rowid DESC
             LIMIT ?3 OFFSET ?4",
            COLUMNS
        ))?;
        let records = stmt
            .query_map(params![direction, starred_only, limit, offset], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page::new(records, total as u64, page, page_size))
    }

    /// Removes the record if present; returns whether anything was deleted.
    pub async fn delete(&self, id: &str, direction: Option<Direction>) -> Result<bool> {
        let conn = self.db.lock().await;
        let removed = conn.execute(
            "DELETE FROM emails WHERE id = ?1 AND (?2 IS NULL OR type = ?2)",
            params![id, direction.map(|d| d.as_str())],
        )?;
        Ok(removed > 0)
    }

    /// Deletes every listed id that exists. Unknown ids are ignored.
    pub async fn batch_delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let mut removed = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            removed += tx.execute(
                &format!("DELETE FROM emails WHERE id IN ({})", placeholders),
                params_from_iter(chunk.iter()),
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Flips the starred flag and returns the new value.
    pub async fn toggle_star(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        conn.query_row(
            "UPDATE emails SET starred = 1 - starred WHERE id = ?1 RETURNING starred",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("email {}", id)))
    }

    /// Keeps the newest `max_count` records of `direction` and deletes the
    /// rest. Returns how many were deleted.
    pub async fn evict(&self, direction: Direction, max_count: u32) -> Result<usize> {
        let conn = self.db.lock().await;
        let removed = conn.execute(
            "DELETE FROM emails WHERE type = ?1 AND id NOT IN (
                 SELECT id FROM emails WHERE type = ?1
                 ORDER BY received_at DESC, rowid DESC
                 LIMIT ?2
             )",
            params![direction.as_str(), max_count],
        )?;
        if removed > 0 {
            info!("Evicted {} {} emails beyond the limit of {}", removed, direction, max_count);
        }
        Ok(removed)
    }

    /// Newest record from `from` to `to` received at or after `since`.
    pub async fn latest_matching(
        &self,
        to: &str,
        from: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<MailRecord>> {
        let conn = self.db.lock().await;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM emails
                     WHERE to_addr = ?1 AND from_addr = ?2 AND received_at >= ?3
                     ORDER BY received_at DESC, rowid DESC
                     LIMIT 1",
                    COLUMNS
                ),
                params![to, from, format_timestamp(since)],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(id: &str, direction: Direction, received_at: &str) -> MailRecord {
    MailRecord {
        id: id.to_string(),
        from: "sender@example.com".to_string(),
        to: "a@x.com".to_string(),
        subject: format!("subject {}", id),
        received_at: received_at.to_string(),
        spf_status: AuthResult::Pass,
        dkim_status: AuthResult::Pass,
        dmarc_status: AuthResult::None,
        headers: [("message-id".to_string(), format!("<{}@example.com>", id))]
            .into_iter()
            .collect(),
        size: 42,
        raw_email: "U3ViamVjdDogaGkNCg0KYm9keQ==".to_string(),
        direction,
        starred: false,
        read: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::users::UserDirectory;
    use chrono::Duration;

    fn timestamp(offset_secs: i64) -> String {
        let base = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        format_timestamp(base + Duration::seconds(offset_secs))
    }

    fn new_store() -> (MailStore, UserDirectory) {
        let db = Database::open_in_memory().unwrap();
        (MailStore::new(db.clone()), UserDirectory::new(db))
    }

    #[tokio::test]
    async fn test_store_then_get_marks_read() {
        let (store, _) = new_store();
        let record = sample_record("m1", Direction::Received, &timestamp(0));
        store.store(&record).await.unwrap();

        let fetched = store.get_by_id("m1", None).await.unwrap();
        assert_eq!(fetched, MailRecord { read: true, ..record.clone() });

        let page = store.list(ListFilter::Direction(Direction::Received), 1, 20).await.unwrap();
        assert!(page.items[0].read);
    }

    #[tokio::test]
    async fn test_get_respects_direction() {
        let (store, _) = new_store();
        store.store(&sample_record("s1", Direction::Sent, &timestamp(0))).await.unwrap();

        assert!(store.get_by_id("s1", Some(Direction::Sent)).await.is_ok());
        assert!(matches!(
            store.get_by_id("s1", Some(Direction::Received)).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.get_by_id("nope", None).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let (store, _) = new_store();
        let record = sample_record("m1", Direction::Received, &timestamp(0));
        store.store(&record).await.unwrap();
        assert!(matches!(store.store(&record).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_invalid_timestamp_rejected() {
        let (store, _) = new_store();
        let record = sample_record("m1", Direction::Received, "last tuesday");
        assert!(matches!(store.store(&record).await, Err(StoreError::InvalidTimestamp(_))));
    }

    #[tokio::test]
    async fn test_store_records_counterpart_address() {
        let (store, users) = new_store();
        let mut received = sample_record("r1", Direction::Received, &timestamp(0));
        received.to = "inbox@seedmail.com".to_string();
        let mut sent = sample_record("s1", Direction::Sent, &timestamp(1));
        sent.from = "outbox@seedmail.com".to_string();
        store.store(&received).await.unwrap();
        store.store(&sent).await.unwrap();

        let known = users.list(1, 20).await.unwrap().items;
        assert_eq!(known, vec!["inbox@seedmail.com".to_string(), "outbox@seedmail.com".to_string()]);
    }

    #[tokio::test]
    async fn test_list_pagination_bounds() {
        let (store, _) = new_store();
        for i in 0..23 {
            store
                .store(&sample_record(&format!("m{}", i), Direction::Received, &timestamp(i)))
                .await
                .unwrap();
        }
        let filter = ListFilter::Direction(Direction::Received);

        for page_size in [1u32, 5, 7, 20, 23, 50] {
            let page = store.list(filter, 1, page_size).await.unwrap();
            assert!(page.items.len() <= page_size as usize);
            assert_eq!(page.total, 23);
            assert_eq!(page.total_pages, (23 + u64::from(page_size) - 1) / u64::from(page_size));
        }

        let first = store.list(filter, 1, 5).await.unwrap();
        let ids: Vec<_> = first.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m22", "m21", "m20", "m19", "m18"]);

        let last = store.list(filter, 5, 5).await.unwrap();
        assert_eq!(last.items.len(), 3);
        assert!(store.list(filter, 6, 5).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_list_separates_directions_and_starred() {
        let (store, _) = new_store();
        store.store(&sample_record("r1", Direction::Received, &timestamp(0))).await.unwrap();
        store.store(&sample_record("r2", Direction::Received, &timestamp(1))).await.unwrap();
        store.store(&sample_record("s1", Direction::Sent, &timestamp(2))).await.unwrap();
        store.toggle_star("r1").await.unwrap();
        store.toggle_star("s1").await.unwrap();

        let sent = store.list(ListFilter::Direction(Direction::Sent), 1, 20).await.unwrap();
        assert_eq!(sent.total, 1);

        let starred = store.list(ListFilter::Starred, 1, 20).await.unwrap();
        let ids: Vec<_> = starred.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "r1"]);
        assert!(starred.items.iter().all(|r| r.starred));
    }

    #[tokio::test]
    async fn test_toggle_star_is_its_own_inverse() {
        let (store, _) = new_store();
        store.store(&sample_record("m1", Direction::Received, &timestamp(0))).await.unwrap();

        assert!(store.toggle_star("m1").await.unwrap());
        assert!(!store.toggle_star("m1").await.unwrap());
        assert!(!store.get_by_id("m1", None).await.unwrap().starred);
        assert!(matches!(store.toggle_star("missing").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _) = new_store();
        store.store(&sample_record("m1", Direction::Received, &timestamp(0))).await.unwrap();

        assert!(!store.delete("m1", Some(Direction::Sent)).await.unwrap());
        assert!(store.delete("m1", None).await.unwrap());
        assert!(!store.delete("m1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_delete() {
        let (store, _) = new_store();
        for i in 0..4 {
            store
                .store(&sample_record(&format!("m{}", i), Direction::Received, &timestamp(i)))
                .await
                .unwrap();
        }

        assert_eq!(store.batch_delete(&[]).await.unwrap(), 0);
        let ids = vec!["m0".to_string(), "m2".to_string(), "ghost".to_string()];
        assert_eq!(store.batch_delete(&ids).await.unwrap(), 2);

        let left = store.list(ListFilter::Direction(Direction::Received), 1, 20).await.unwrap();
        let ids: Vec<_> = left.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m1"]);
    }

    #[tokio::test]
    async fn test_evict_keeps_newest() {
        let (store, _) = new_store();
        for i in 0..8 {
            store
                .store(&sample_record(&format!("m{}", i), Direction::Received, &timestamp(i)))
                .await
                .unwrap();
        }
        store.store(&sample_record("s0", Direction::Sent, &timestamp(-10))).await.unwrap();

        assert_eq!(store.evict(Direction::Received, 5).await.unwrap(), 3);
        let kept = store.list(ListFilter::Direction(Direction::Received), 1, 20).await.unwrap();
        let ids: Vec<_> = kept.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m7", "m6", "m5", "m4", "m3"]);

        // other direction untouched, and a second pass is a no-op
        assert_eq!(store.list(ListFilter::Direction(Direction::Sent), 1, 20).await.unwrap().total, 1);
        assert_eq!(store.evict(Direction::Received, 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oldest_record_evicted_past_cap() {
        let (store, _) = new_store();
        store.store(&sample_record("m1", Direction::Received, &timestamp(0))).await.unwrap();
        for i in 1..=501 {
            store
                .store(&sample_record(&format!("later{}", i), Direction::Received, &timestamp(i)))
                .await
                .unwrap();
        }

        store.evict(Direction::Received, 500).await.unwrap();
        let page = store.list(ListFilter::Direction(Direction::Received), 1, 20).await.unwrap();
        assert_eq!(page.total, 500);
        assert!(matches!(store.get_by_id("m1", None).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_latest_matching() {
        let (store, _) = new_store();
        let mut early = sample_record("e1", Direction::Received, &timestamp(0));
        early.to = "otp@seedmail.com".to_string();
        let mut late = sample_record("e2", Direction::Received, &timestamp(60));
        late.to = "otp@seedmail.com".to_string();
        store.store(&early).await.unwrap();
        store.store(&late).await.unwrap();

        let base = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let found = store
            .latest_matching("otp@seedmail.com", "sender@example.com", base)
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.id), Some("e2".to_string()));

        let none = store
            .latest_matching("otp@seedmail.com", "sender@example.com", base + Duration::seconds(61))
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
