//! SQLite-backed library store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::quality::ParsedQuality;

use super::{LibraryError, LibraryFile, LibraryStore, MediaKind, MediaTarget};

const TARGET_COLUMNS: &str =
    "id, catalog_id, kind, title, year, season, episode, monitored, slot_overrides";
const FILE_COLUMNS: &str =
    "target_id, slot_id, path, size_bytes, quality, release_title, grab_id, imported_at";

pub struct SqliteLibraryStore {
    conn: Mutex<Connection>,
}

impl SqliteLibraryStore {
    /// Open (or create) the library tables in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, LibraryError> {
        let conn = Connection::open(path).map_err(|e| LibraryError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, LibraryError> {
        let conn =
            Connection::open_in_memory().map_err(|e| LibraryError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), LibraryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS media_targets (
                id TEXT PRIMARY KEY,
                catalog_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                year INTEGER,
                season INTEGER,
                episode INTEGER,
                monitored INTEGER NOT NULL DEFAULT 1,
                slot_overrides TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_media_targets_catalog ON media_targets(catalog_id);

            CREATE TABLE IF NOT EXISTS library_files (
                target_id TEXT NOT NULL,
                slot_id TEXT NOT NULL,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                quality TEXT NOT NULL,
                release_title TEXT NOT NULL,
                grab_id TEXT,
                imported_at TEXT NOT NULL,
                PRIMARY KEY (target_id, slot_id)
            );
            "#,
        )
        .map_err(|e| LibraryError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LibraryError> {
        self.conn
            .lock()
            .map_err(|_| LibraryError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_target(row: &rusqlite::Row) -> rusqlite::Result<MediaTarget> {
        let kind: String = row.get(2)?;
        let overrides_json: String = row.get(8)?;
        Ok(MediaTarget {
            id: row.get(0)?,
            catalog_id: row.get(1)?,
            kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Movie),
            title: row.get(3)?,
            year: row.get(4)?,
            season: row.get(5)?,
            episode: row.get(6)?,
            monitored: row.get::<_, i64>(7)? != 0,
            slot_overrides: serde_json::from_str(&overrides_json).unwrap_or_default(),
        })
    }

    fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<LibraryFile> {
        let path: String = row.get(2)?;
        let size: i64 = row.get(3)?;
        let quality_json: String = row.get(4)?;
        let imported_at: String = row.get(7)?;
        Ok(LibraryFile {
            target_id: row.get(0)?,
            slot_id: row.get(1)?,
            path: PathBuf::from(path),
            size_bytes: size.max(0) as u64,
            quality: serde_json::from_str::<ParsedQuality>(&quality_json).unwrap_or_default(),
            release_title: row.get(5)?,
            grab_id: row.get(6)?,
            imported_at: DateTime::parse_from_rfc3339(&imported_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn query_targets(
        conn: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<MediaTarget>, LibraryError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| LibraryError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(args, Self::row_to_target)
            .map_err(|e| LibraryError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LibraryError::Database(e.to_string()))
    }
}

impl LibraryStore for SqliteLibraryStore {
    fn get_target(&self, id: &str) -> Result<Option<MediaTarget>, LibraryError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM media_targets WHERE id = ?", TARGET_COLUMNS),
            params![id],
            Self::row_to_target,
        )
        .optional()
        .map_err(|e| LibraryError::Database(e.to_string()))
    }

    fn upsert_target(&self, target: &MediaTarget) -> Result<(), LibraryError> {
        let conn = self.conn()?;
        let overrides = serde_json::to_string(&target.slot_overrides)
            .map_err(|e| LibraryError::Database(e.to_string()))?;
        conn.execute(
            r#"
            INSERT INTO media_targets (id, catalog_id, kind, title, year, season, episode, monitored, slot_overrides, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                catalog_id = excluded.catalog_id,
                kind = excluded.kind,
                title = excluded.title,
                year = excluded.year,
                season = excluded.season,
                episode = excluded.episode,
                monitored = excluded.monitored,
                slot_overrides = excluded.slot_overrides,
                updated_at = excluded.updated_at
            "#,
            params![
                target.id,
                target.catalog_id,
                target.kind.as_str(),
                target.title,
                target.year,
                target.season,
                target.episode,
                target.monitored as i64,
                overrides,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| LibraryError::Database(e.to_string()))?;
        Ok(())
    }

    fn set_monitored(&self, id: &str, monitored: bool) -> Result<MediaTarget, LibraryError> {
        {
            let conn = self.conn()?;
            let changed = conn
                .execute(
                    "UPDATE media_targets SET monitored = ?, updated_at = ? WHERE id = ?",
                    params![monitored as i64, Utc::now().to_rfc3339(), id],
                )
                .map_err(|e| LibraryError::Database(e.to_string()))?;
            if changed == 0 {
                return Err(LibraryError::NotFound(id.to_string()));
            }
        }
        self.get_target(id)?
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))
    }

    fn monitored_targets(&self) -> Result<Vec<MediaTarget>, LibraryError> {
        let conn = self.conn()?;
        Self::query_targets(
            &conn,
            &format!(
                "SELECT {} FROM media_targets WHERE monitored = 1 ORDER BY id ASC",
                TARGET_COLUMNS
            ),
            &[],
        )
    }

    fn targets_for_catalog(&self, catalog_id: &str) -> Result<Vec<MediaTarget>, LibraryError> {
        let conn = self.conn()?;
        Self::query_targets(
            &conn,
            &format!(
                "SELECT {} FROM media_targets WHERE catalog_id = ? ORDER BY season ASC, episode ASC, id ASC",
                TARGET_COLUMNS
            ),
            &[&catalog_id],
        )
    }

    fn files_for_target(&self, target_id: &str) -> Result<Vec<LibraryFile>, LibraryError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM library_files WHERE target_id = ? ORDER BY slot_id ASC",
                FILE_COLUMNS
            ))
            .map_err(|e| LibraryError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![target_id], Self::row_to_file)
            .map_err(|e| LibraryError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LibraryError::Database(e.to_string()))
    }

    fn file_for_slot(
        &self,
        target_id: &str,
        slot_id: &str,
    ) -> Result<Option<LibraryFile>, LibraryError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM library_files WHERE target_id = ? AND slot_id = ?",
                FILE_COLUMNS
            ),
            params![target_id, slot_id],
            Self::row_to_file,
        )
        .optional()
        .map_err(|e| LibraryError::Database(e.to_string()))
    }

    fn put_file(&self, file: &LibraryFile) -> Result<Option<LibraryFile>, LibraryError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| LibraryError::Database(e.to_string()))?;

        let previous = tx
            .query_row(
                &format!(
                    "SELECT {} FROM library_files WHERE target_id = ? AND slot_id = ?",
                    FILE_COLUMNS
                ),
                params![file.target_id, file.slot_id],
                Self::row_to_file,
            )
            .optional()
            .map_err(|e| LibraryError::Database(e.to_string()))?;

        let quality = serde_json::to_string(&file.quality)
            .map_err(|e| LibraryError::Database(e.to_string()))?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO library_files ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                FILE_COLUMNS
            ),
            params![
                file.target_id,
                file.slot_id,
                file.path.to_string_lossy(),
                file.size_bytes as i64,
                quality,
                file.release_title,
                file.grab_id,
                file.imported_at.to_rfc3339(),
            ],
        )
        .map_err(|e| LibraryError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| LibraryError::Database(e.to_string()))?;
        Ok(previous)
    }
}
