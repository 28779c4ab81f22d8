//! SQLite-backed grab store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::slots::SlotSnapshot;

use super::{GrabRecord, GrabResolution, GrabStore, GrabStoreError, ReleaseSnapshot, ResolutionRecord};

const GRAB_COLUMNS: &str =
    "g.id, g.target_id, g.slot_id, g.slot_name, g.profile_id, g.release, g.client, g.job_id, g.grabbed_at";

pub struct SqliteGrabStore {
    conn: Mutex<Connection>,
}

impl SqliteGrabStore {
    pub fn new(path: &Path) -> Result<Self, GrabStoreError> {
        let conn = Connection::open(path).map_err(|e| GrabStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, GrabStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| GrabStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), GrabStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS grabs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                target_id TEXT NOT NULL,
                slot_id TEXT NOT NULL,
                slot_name TEXT NOT NULL,
                profile_id TEXT NOT NULL,
                release TEXT NOT NULL,
                client TEXT NOT NULL,
                job_id TEXT NOT NULL,
                grabbed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_grabs_job ON grabs(client, job_id);
            CREATE INDEX IF NOT EXISTS idx_grabs_slot ON grabs(target_id, slot_id);

            CREATE TABLE IF NOT EXISTS grab_resolutions (
                grab_id TEXT PRIMARY KEY,
                resolution TEXT NOT NULL,
                reason TEXT NOT NULL,
                resolved_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS grab_failures (
                target_id TEXT NOT NULL,
                slot_id TEXT NOT NULL,
                failures INTEGER NOT NULL,
                last_failed_at TEXT NOT NULL,
                PRIMARY KEY (target_id, slot_id)
            );
            "#,
        )
        .map_err(|e| GrabStoreError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, GrabStoreError> {
        self.conn
            .lock()
            .map_err(|_| GrabStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn query_one(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<GrabRecord>, GrabStoreError> {
        let mut records = self.query_many(where_clause, params)?;
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.remove(0))
        })
    }

    fn query_many(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<GrabRecord>, GrabStoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM grabs g {}", GRAB_COLUMNS, where_clause);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GrabStoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params, read_row)
            .map_err(|e| GrabStoreError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| GrabStoreError::Database(e.to_string()))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }
}

struct RawGrab {
    id: String,
    target_id: String,
    slot_id: String,
    slot_name: String,
    profile_id: String,
    release: String,
    client: String,
    job_id: String,
    grabbed_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawGrab> {
    Ok(RawGrab {
        id: row.get(0)?,
        target_id: row.get(1)?,
        slot_id: row.get(2)?,
        slot_name: row.get(3)?,
        profile_id: row.get(4)?,
        release: row.get(5)?,
        client: row.get(6)?,
        job_id: row.get(7)?,
        grabbed_at: row.get(8)?,
    })
}

impl RawGrab {
    fn into_record(self) -> Result<GrabRecord, GrabStoreError> {
        let release: ReleaseSnapshot = serde_json::from_str(&self.release)
            .map_err(|e| GrabStoreError::Serialization(e.to_string()))?;
        Ok(GrabRecord {
            id: self.id,
            target_id: self.target_id,
            slot: SlotSnapshot {
                slot_id: self.slot_id,
                slot_name: self.slot_name,
                profile_id: self.profile_id,
            },
            release,
            client: self.client,
            job_id: self.job_id,
            grabbed_at: parse_timestamp(&self.grabbed_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, GrabStoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GrabStoreError::Database(format!("Invalid timestamp: {}", e)))
}

impl GrabStore for SqliteGrabStore {
    fn insert(&self, record: &GrabRecord) -> Result<(), GrabStoreError> {
        let release = serde_json::to_string(&record.release)
            .map_err(|e| GrabStoreError::Serialization(e.to_string()))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO grabs (id, target_id, slot_id, slot_name, profile_id, release, client, job_id, grabbed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.target_id,
                record.slot.slot_id,
                record.slot.slot_name,
                record.slot.profile_id,
                release,
                record.client,
                record.job_id,
                record.grabbed_at.to_rfc3339(),
            ],
        )
        .map_err(|e| GrabStoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<GrabRecord>, GrabStoreError> {
        self.query_one("WHERE g.id = ?1", &[&id])
    }

    fn find_by_job(&self, client: &str, job_id: &str) -> Result<Option<GrabRecord>, GrabStoreError> {
        let job_id = job_id.to_lowercase();
        self.query_one(
            "WHERE g.client = ?1 AND lower(g.job_id) = ?2 ORDER BY g.seq DESC LIMIT 1",
            &[&client, &job_id],
        )
    }

    fn pending_for(&self, target_id: &str, slot_id: &str) -> Result<Option<GrabRecord>, GrabStoreError> {
        self.query_one(
            "LEFT JOIN grab_resolutions r ON r.grab_id = g.id
             WHERE g.target_id = ?1 AND g.slot_id = ?2 AND r.grab_id IS NULL
             ORDER BY g.seq DESC LIMIT 1",
            &[&target_id, &slot_id],
        )
    }

    fn unresolved(&self) -> Result<Vec<GrabRecord>, GrabStoreError> {
        self.query_many(
            "LEFT JOIN grab_resolutions r ON r.grab_id = g.id WHERE r.grab_id IS NULL ORDER BY g.seq",
            &[],
        )
    }

    fn resolve(
        &self,
        grab_id: &str,
        resolution: GrabResolution,
        reason: &str,
    ) -> Result<bool, GrabStoreError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO grab_resolutions (grab_id, resolution, reason, resolved_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![grab_id, resolution.as_str(), reason, Utc::now().to_rfc3339()],
            )
            .map_err(|e| GrabStoreError::Database(e.to_string()))?;
        Ok(inserted == 1)
    }

    fn resolution(&self, grab_id: &str) -> Result<Option<ResolutionRecord>, GrabStoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT resolution, reason, resolved_at FROM grab_resolutions WHERE grab_id = ?1",
                params![grab_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| GrabStoreError::Database(e.to_string()))?;

        match row {
            None => Ok(None),
            Some((resolution, reason, resolved_at)) => {
                let resolution = GrabResolution::parse(&resolution).ok_or_else(|| {
                    GrabStoreError::Database(format!("Unknown resolution: {}", resolution))
                })?;
                Ok(Some(ResolutionRecord {
                    grab_id: grab_id.to_string(),
                    resolution,
                    reason,
                    resolved_at: parse_timestamp(&resolved_at)?,
                }))
            }
        }
    }

    fn record_failure(&self, target_id: &str, slot_id: &str) -> Result<u32, GrabStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO grab_failures (target_id, slot_id, failures, last_failed_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(target_id, slot_id)
             DO UPDATE SET failures = failures + 1, last_failed_at = excluded.last_failed_at",
            params![target_id, slot_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| GrabStoreError::Database(e.to_string()))?;

        conn.query_row(
            "SELECT failures FROM grab_failures WHERE target_id = ?1 AND slot_id = ?2",
            params![target_id, slot_id],
            |row| row.get(0),
        )
        .map_err(|e| GrabStoreError::Database(e.to_string()))
    }

    fn failure_count(&self, target_id: &str, slot_id: &str) -> Result<u32, GrabStoreError> {
        let conn = self.conn()?;
        let count: Option<u32> = conn
            .query_row(
                "SELECT failures FROM grab_failures WHERE target_id = ?1 AND slot_id = ?2",
                params![target_id, slot_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GrabStoreError::Database(e.to_string()))?;
        Ok(count.unwrap_or(0))
    }

    fn clear_failures(&self, target_id: &str, slot_id: &str) -> Result<(), GrabStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM grab_failures WHERE target_id = ?1 AND slot_id = ?2",
            params![target_id, slot_id],
        )
        .map_err(|e| GrabStoreError::Database(e.to_string()))?;
        Ok(())
    }
}
