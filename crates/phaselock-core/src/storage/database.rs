//! SQLite-based block and session storage.
//!
//! Provides persistent storage for:
//! - Block definitions (`time_blocks`)
//! - Session records with their live counters (`timer_sessions`)
//!
//! The connection sits behind a mutex so one `Database` can be shared
//! between the control path and the ticking tasks.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{data_dir, migrations, Block, BlockStore, SessionStore};
use crate::error::{DatabaseError, Result};
use crate::timer::{BlockId, BlockSpec, PhaseKind, SessionId, SessionState, SessionStatus};

const SESSION_COLUMNS: &str = "id, time_block_id, status, current_phase, current_phase_index,
     remaining_seconds, total_elapsed_seconds, started_at, paused_at, completed_at";

/// SQLite database for blocks and sessions.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `<data_dir>/phaselock.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("phaselock.db");
        Self::open_at(&path)
    }

    /// Open (or create) a database file at `path`.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // A following CLI process writes every tick; other processes wait
        // for it instead of failing with SQLITE_BUSY.
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::QueryFailed("connection mutex poisoned".into()).into())
    }
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width so that ORDER BY on the text column is chronological.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            DatabaseError::CorruptRow {
                table,
                message: format!("bad timestamp '{raw}': {e}"),
            }
            .into()
        })
}

fn decode_opt_ts(table: &'static str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(|s| decode_ts(table, s)).transpose()
}

struct BlockRow {
    id: i64,
    total_minutes: u32,
    work_minutes: u32,
    short_break_minutes: u32,
    long_break_minutes: u32,
    created_at: String,
}

impl BlockRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            total_minutes: row.get(1)?,
            work_minutes: row.get(2)?,
            short_break_minutes: row.get(3)?,
            long_break_minutes: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_block(self) -> Result<Block> {
        Ok(Block {
            id: self.id,
            spec: BlockSpec::new(
                self.total_minutes,
                self.work_minutes,
                self.short_break_minutes,
                self.long_break_minutes,
            ),
            created_at: decode_ts("time_blocks", &self.created_at)?,
        })
    }
}

struct SessionRow {
    id: i64,
    block_id: i64,
    status: String,
    current_phase: String,
    current_phase_index: i64,
    remaining_seconds: u32,
    total_elapsed_seconds: i64,
    started_at: Option<String>,
    paused_at: Option<String>,
    completed_at: Option<String>,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            block_id: row.get(1)?,
            status: row.get(2)?,
            current_phase: row.get(3)?,
            current_phase_index: row.get(4)?,
            remaining_seconds: row.get(5)?,
            total_elapsed_seconds: row.get(6)?,
            started_at: row.get(7)?,
            paused_at: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }

    fn into_session(self) -> Result<SessionState> {
        const TABLE: &str = "timer_sessions";
        let status = SessionStatus::parse(&self.status).ok_or_else(|| DatabaseError::CorruptRow {
            table: TABLE,
            message: format!("unknown status '{}'", self.status),
        })?;
        let current_phase =
            PhaseKind::parse(&self.current_phase).ok_or_else(|| DatabaseError::CorruptRow {
                table: TABLE,
                message: format!("unknown phase '{}'", self.current_phase),
            })?;
        Ok(SessionState {
            id: self.id,
            block_id: self.block_id,
            status,
            current_phase,
            current_phase_index: usize::try_from(self.current_phase_index).unwrap_or(0),
            remaining_seconds: self.remaining_seconds,
            total_elapsed_seconds: u64::try_from(self.total_elapsed_seconds).unwrap_or(0),
            started_at: decode_opt_ts(TABLE, self.started_at)?,
            paused_at: decode_opt_ts(TABLE, self.paused_at)?,
            completed_at: decode_opt_ts(TABLE, self.completed_at)?,
        })
    }
}

impl BlockStore for Database {
    fn insert_block(&self, spec: &BlockSpec) -> Result<Block> {
        let conn = self.conn()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO time_blocks
                (total_minutes, work_minutes, short_break_minutes, long_break_minutes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                spec.total_minutes,
                spec.work_minutes,
                spec.short_break_minutes,
                spec.long_break_minutes,
                encode_ts(created_at),
            ],
        )?;
        Ok(Block {
            id: conn.last_insert_rowid(),
            spec: *spec,
            created_at,
        })
    }

    fn load_block(&self, id: BlockId) -> Result<Option<Block>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, total_minutes, work_minutes, short_break_minutes,
                        long_break_minutes, created_at
                 FROM time_blocks WHERE id = ?1",
                params![id],
                BlockRow::from_row,
            )
            .optional()?;
        row.map(BlockRow::into_block).transpose()
    }

    fn list_blocks(&self) -> Result<Vec<Block>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, total_minutes, work_minutes, short_break_minutes,
                    long_break_minutes, created_at
             FROM time_blocks ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], BlockRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(BlockRow::into_block).collect()
    }
}

impl SessionStore for Database {
    fn insert_session(&self, session: &SessionState) -> Result<SessionId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO timer_sessions
                (time_block_id, status, current_phase, current_phase_index,
                 remaining_seconds, total_elapsed_seconds, started_at, paused_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.block_id,
                session.status.as_str(),
                session.current_phase.as_str(),
                session.current_phase_index as i64,
                session.remaining_seconds,
                session.total_elapsed_seconds as i64,
                session.started_at.map(encode_ts),
                session.paused_at.map(encode_ts),
                session.completed_at.map(encode_ts),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn save_session(&self, session: &SessionState) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE timer_sessions SET
                status = ?2, current_phase = ?3, current_phase_index = ?4,
                remaining_seconds = ?5, total_elapsed_seconds = ?6,
                started_at = ?7, paused_at = ?8, completed_at = ?9
             WHERE id = ?1",
            params![
                session.id,
                session.status.as_str(),
                session.current_phase.as_str(),
                session.current_phase_index as i64,
                session.remaining_seconds,
                session.total_elapsed_seconds as i64,
                session.started_at.map(encode_ts),
                session.paused_at.map(encode_ts),
                session.completed_at.map(encode_ts),
            ],
        )?;
        if updated == 0 {
            return Err(crate::error::CoreError::session_not_found(session.id));
        }
        Ok(())
    }

    fn load_session(&self, id: SessionId) -> Result<Option<SessionState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM timer_sessions WHERE id = ?1"),
                params![id],
                SessionRow::from_row,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    fn find_active_session(&self) -> Result<Option<SessionState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM timer_sessions
                     WHERE status IN ('running', 'paused')
                     ORDER BY started_at DESC, id DESC
                     LIMIT 1"
                ),
                [],
                SessionRow::from_row,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::compute_sequence;

    fn running_session(db: &Database, block_id: BlockId) -> SessionState {
        let block = db.load_block(block_id).unwrap().unwrap();
        let mut session = SessionState::new(block.id);
        session.begin(&compute_sequence(&block.spec), Utc::now());
        session.id = db.insert_session(&session).unwrap();
        session
    }

    #[test]
    fn block_roundtrip() {
        let db = Database::open_memory().unwrap();
        let block = db.insert_block(&BlockSpec::new(90, 25, 5, 15)).unwrap();
        let loaded = db.load_block(block.id).unwrap().unwrap();
        assert_eq!(loaded.spec, BlockSpec::new(90, 25, 5, 15));
        assert!(db.load_block(block.id + 100).unwrap().is_none());
    }

    #[test]
    fn list_blocks_in_insert_order() {
        let db = Database::open_memory().unwrap();
        db.insert_block(&BlockSpec::new(60, 25, 5, 0)).unwrap();
        db.insert_block(&BlockSpec::default()).unwrap();
        let blocks = db.list_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].spec.total_minutes, 60);
        assert_eq!(blocks[1].spec, BlockSpec::default());
    }

    #[test]
    fn session_roundtrip_preserves_counters() {
        let db = Database::open_memory().unwrap();
        let block = db.insert_block(&BlockSpec::default()).unwrap();
        let mut session = running_session(&db, block.id);
        session.remaining_seconds = 17;
        session.total_elapsed_seconds = 4000;
        session.pause(Utc::now()).unwrap();
        db.save_session(&session).unwrap();

        let loaded = db.load_session(session.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Paused);
        assert_eq!(loaded.remaining_seconds, 17);
        assert_eq!(loaded.total_elapsed_seconds, 4000);
        assert!(loaded.paused_at.is_some());
        assert_eq!(
            loaded.started_at.map(|t| t.timestamp_micros()),
            session.started_at.map(|t| t.timestamp_micros())
        );
    }

    #[test]
    fn save_unknown_session_is_not_found() {
        let db = Database::open_memory().unwrap();
        let mut session = SessionState::new(1);
        session.id = 404;
        assert!(db.save_session(&session).unwrap_err().is_not_found());
    }

    #[test]
    fn find_active_ignores_stopped_and_completed() {
        let db = Database::open_memory().unwrap();
        let block = db.insert_block(&BlockSpec::default()).unwrap();
        assert!(db.find_active_session().unwrap().is_none());

        let mut first = running_session(&db, block.id);
        first.cancel();
        db.save_session(&first).unwrap();
        assert!(db.find_active_session().unwrap().is_none());

        let second = running_session(&db, block.id);
        let active = db.find_active_session().unwrap().unwrap();
        assert_eq!(active.id, second.id);
    }

    #[test]
    fn session_requires_existing_block() {
        let db = Database::open_memory().unwrap();
        let session = SessionState::new(999);
        assert!(db.insert_session(&session).is_err());
    }

    #[test]
    fn file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phaselock.db");
        let id = {
            let db = Database::open_at(&path).unwrap();
            db.insert_block(&BlockSpec::default()).unwrap().id
        };
        let db = Database::open_at(&path).unwrap();
        assert!(db.load_block(id).unwrap().is_some());
    }
}
