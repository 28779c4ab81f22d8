//! SQLite-backed request store.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{Request, RequestError, RequestKind, RequestStatus, RequestStore};

const COLUMNS: &str = "id, catalog_id, title, kind, seasons, status, created_at, updated_at";

pub struct SqliteRequestStore {
    conn: Mutex<Connection>,
}

impl SqliteRequestStore {
    pub fn new(path: &Path) -> Result<Self, RequestError> {
        let conn = Connection::open(path).map_err(|e| RequestError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, RequestError> {
        let conn =
            Connection::open_in_memory().map_err(|e| RequestError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RequestError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                catalog_id TEXT NOT NULL,
                title TEXT NOT NULL,
                kind TEXT NOT NULL,
                seasons TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_requests_catalog ON requests(catalog_id);
            CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);
            "#,
        )
        .map_err(|e| RequestError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RequestError> {
        self.conn
            .lock()
            .map_err(|_| RequestError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<Request> {
        let kind: String = row.get(3)?;
        let seasons_json: String = row.get(4)?;
        let status: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;

        let kind = match kind.as_str() {
            "series" => RequestKind::Series {
                seasons: serde_json::from_str::<BTreeSet<u32>>(&seasons_json).unwrap_or_default(),
            },
            _ => RequestKind::Movie,
        };

        Ok(Request {
            id: row.get(0)?,
            catalog_id: row.get(1)?,
            title: row.get(2)?,
            kind,
            status: RequestStatus::parse(&status).unwrap_or(RequestStatus::Pending),
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn query(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Request>, RequestError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| RequestError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(args, Self::row_to_request)
            .map_err(|e| RequestError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| RequestError::Database(e.to_string()))
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl RequestStore for SqliteRequestStore {
    fn insert(&self, request: &Request) -> Result<(), RequestError> {
        let (kind, seasons) = match &request.kind {
            RequestKind::Movie => ("movie", String::from("[]")),
            RequestKind::Series { seasons } => (
                "series",
                serde_json::to_string(seasons)
                    .map_err(|e| RequestError::Serialization(e.to_string()))?,
            ),
        };

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO requests ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                COLUMNS
            ),
            params![
                request.id,
                request.catalog_id,
                request.title,
                kind,
                seasons,
                request.status.as_str(),
                request.created_at.to_rfc3339(),
                request.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RequestError::Database(e.to_string()))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Request>, RequestError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM requests WHERE id = ?1", COLUMNS),
            params![id],
            Self::row_to_request,
        )
        .optional()
        .map_err(|e| RequestError::Database(e.to_string()))
    }

    fn open_for_catalog(&self, catalog_id: &str) -> Result<Vec<Request>, RequestError> {
        self.query(
            &format!(
                "SELECT {} FROM requests WHERE catalog_id = ?1 AND status != 'failed' \
                 ORDER BY created_at ASC, id ASC",
                COLUMNS
            ),
            &[&catalog_id],
        )
    }

    fn open_requests(&self) -> Result<Vec<Request>, RequestError> {
        self.query(
            &format!(
                "SELECT {} FROM requests WHERE status != 'failed' ORDER BY created_at ASC, id ASC",
                COLUMNS
            ),
            &[],
        )
    }

    fn update_status(&self, id: &str, status: RequestStatus) -> Result<(), RequestError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE requests SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| RequestError::Database(e.to_string()))?;
        if updated == 0 {
            return Err(RequestError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
