use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{OutboxItem, OutboxOp};

/// Persisted state of one recurring job.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct JobRecord {
    pub name: String,
    pub interval_secs: i64,
    pub next_run_at: DateTime<Utc>,
    pub attempts: i64,
    pub last_outcome: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS nutrition_outbox (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    operation TEXT NOT NULL CHECK (operation IN ('upsert', 'delete')),
                    entity_id TEXT NOT NULL,
                    payload TEXT,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_outbox_entity ON nutrition_outbox(entity_id);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS scheduled_jobs (
                    name TEXT PRIMARY KEY NOT NULL,
                    interval_secs INTEGER NOT NULL CHECK (interval_secs > 0),
                    next_run_at TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    last_outcome TEXT,
                    last_run_at TEXT
                );

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    pub fn get_json_setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_setting(key)? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt value for setting '{key}'"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn set_json_setting<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_setting(key, &serde_json::to_string(value)?)
    }

    // --- Nutrition outbox ---

    fn outbox_from_row(row: &rusqlite::Row) -> rusqlite::Result<OutboxItem> {
        let op: String = row.get(1)?;
        let operation = OutboxOp::parse(&op).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        Ok(OutboxItem {
            id: row.get(0)?,
            operation,
            entity_id: row.get(2)?,
            payload: row.get(3)?,
            retry_count: row.get(4)?,
            last_error: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    /// Queue an operation; it supersedes anything still pending for the same entity.
    pub fn enqueue_outbox(
        &self,
        operation: OutboxOp,
        entity_id: &str,
        payload: Option<&str>,
    ) -> Result<OutboxItem> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM nutrition_outbox WHERE entity_id = ?1",
            params![entity_id],
        )?;
        tx.execute(
            "INSERT INTO nutrition_outbox (operation, entity_id, payload, retry_count, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![operation.as_str(), entity_id, payload, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        self.get_outbox_item(id)
    }

    pub fn get_outbox_item(&self, id: i64) -> Result<OutboxItem> {
        self.conn
            .query_row(
                "SELECT id, operation, entity_id, payload, retry_count, last_error, created_at
                 FROM nutrition_outbox WHERE id = ?1",
                params![id],
                Self::outbox_from_row,
            )
            .context("Outbox item not found")
    }

    pub fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, operation, entity_id, payload, retry_count, last_error, created_at
             FROM nutrition_outbox ORDER BY id LIMIT ?1",
        )?;
        let items = stmt
            .query_map(params![limit], Self::outbox_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn outbox_len(&self) -> Result<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM nutrition_outbox", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn complete_outbox(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM nutrition_outbox WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn fail_outbox(&self, id: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE nutrition_outbox SET retry_count = retry_count + 1, last_error = ?1 WHERE id = ?2",
            params![error, id],
        )?;
        Ok(())
    }

    // --- Scheduled jobs ---

    fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let parse = |idx: usize, raw: String| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        idx,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        };
        let next_run_at = parse(2, row.get(2)?)?;
        let last_run_at = match row.get::<_, Option<String>>(5)? {
            Some(raw) => Some(parse(5, raw)?),
            None => None,
        };
        Ok(JobRecord {
            name: row.get(0)?,
            interval_secs: row.get(1)?,
            next_run_at,
            attempts: row.get(3)?,
            last_outcome: row.get(4)?,
            last_run_at,
        })
    }

    /// Insert a job if absent. Returns `false` when it was already enrolled.
    pub fn insert_job_if_absent(
        &self,
        name: &str,
        interval_secs: i64,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO scheduled_jobs (name, interval_secs, next_run_at, attempts)
             VALUES (?1, ?2, ?3, 0)",
            params![name, interval_secs, next_run_at.to_rfc3339()],
        )?;
        Ok(rows > 0)
    }

    pub fn get_job(&self, name: &str) -> Result<Option<JobRecord>> {
        let job = self
            .conn
            .query_row(
                "SELECT name, interval_secs, next_run_at, attempts, last_outcome, last_run_at
                 FROM scheduled_jobs WHERE name = ?1",
                params![name],
                Self::job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, interval_secs, next_run_at, attempts, last_outcome, last_run_at
             FROM scheduled_jobs ORDER BY name",
        )?;
        let jobs = stmt
            .query_map([], Self::job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn update_job_run(
        &self,
        name: &str,
        next_run_at: DateTime<Utc>,
        attempts: i64,
        outcome: &str,
        ran_at: DateTime<Utc>,
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE scheduled_jobs
             SET next_run_at = ?1, attempts = ?2, last_outcome = ?3, last_run_at = ?4
             WHERE name = ?5",
            params![
                next_run_at.to_rfc3339(),
                attempts,
                outcome,
                ran_at.to_rfc3339(),
                name
            ],
        )?;
        if rows == 0 {
            anyhow::bail!("Job '{name}' is not enrolled");
        }
        Ok(())
    }

    pub fn delete_job(&self, name: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM scheduled_jobs WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_settings_crud() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_setting("oauth_state").unwrap().is_none());

        db.set_setting("oauth_state", "abc").unwrap();
        assert_eq!(db.get_setting("oauth_state").unwrap().as_deref(), Some("abc"));

        db.set_setting("oauth_state", "def").unwrap();
        assert_eq!(db.get_setting("oauth_state").unwrap().as_deref(), Some("def"));

        assert!(db.delete_setting("oauth_state").unwrap());
        assert!(!db.delete_setting("oauth_state").unwrap());
    }

    #[test]
    fn test_json_setting() {
        let db = Database::open_in_memory().unwrap();
        db.set_json_setting("flags", &vec![1, 2, 3]).unwrap();
        let v: Vec<i32> = db.get_json_setting("flags").unwrap().unwrap();
        assert_eq!(v, vec![1, 2, 3]);

        db.set_setting("broken", "{not json").unwrap();
        assert!(db.get_json_setting::<Vec<i32>>("broken").is_err());
    }

    #[test]
    fn test_outbox_enqueue_and_drain() {
        let db = Database::open_in_memory().unwrap();
        let a = db
            .enqueue_outbox(OutboxOp::Upsert, "hc-1", Some("{}"))
            .unwrap();
        let b = db.enqueue_outbox(OutboxOp::Delete, "hc-2", None).unwrap();
        assert_eq!(a.retry_count, 0);
        assert_eq!(b.operation, OutboxOp::Delete);

        let pending = db.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].entity_id, "hc-1");

        assert!(db.complete_outbox(a.id).unwrap());
        assert_eq!(db.outbox_len().unwrap(), 1);
    }

    #[test]
    fn test_outbox_newer_op_supersedes_pending() {
        let db = Database::open_in_memory().unwrap();
        db.enqueue_outbox(OutboxOp::Upsert, "hc-1", Some("{}"))
            .unwrap();
        db.enqueue_outbox(OutboxOp::Delete, "hc-1", None).unwrap();
        let pending = db.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, OutboxOp::Delete);
    }

    #[test]
    fn test_outbox_fail_increments_retry() {
        let db = Database::open_in_memory().unwrap();
        let item = db
            .enqueue_outbox(OutboxOp::Upsert, "hc-1", Some("{}"))
            .unwrap();
        db.fail_outbox(item.id, "HTTP 500").unwrap();
        db.fail_outbox(item.id, "HTTP 502").unwrap();
        let item = db.get_outbox_item(item.id).unwrap();
        assert_eq!(item.retry_count, 2);
        assert_eq!(item.last_error.as_deref(), Some("HTTP 502"));
    }

    #[test]
    fn test_jobs_insert_if_absent_keeps_existing() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();
        assert!(db.insert_job_if_absent("screen_time", 900, t0).unwrap());
        assert!(!db.insert_job_if_absent("screen_time", 60, t1).unwrap());

        let job = db.get_job("screen_time").unwrap().unwrap();
        assert_eq!(job.interval_secs, 900);
        assert_eq!(job.next_run_at, t0);
        assert!(job.last_run_at.is_none());
    }

    #[test]
    fn test_update_job_run_requires_enrollment() {
        let db = Database::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(db.update_job_run("missing", t, 0, "success", t).is_err());

        db.insert_job_if_absent("location", 3600, t).unwrap();
        db.update_job_run("location", t + chrono::Duration::hours(1), 0, "success", t)
            .unwrap();
        let job = db.get_job("location").unwrap().unwrap();
        assert_eq!(job.last_outcome.as_deref(), Some("success"));
        assert_eq!(job.last_run_at, Some(t));
        assert_eq!(db.list_jobs().unwrap().len(), 1);
        assert!(db.delete_job("location").unwrap());
    }
}
