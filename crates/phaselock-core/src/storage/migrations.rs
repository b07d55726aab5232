//! Database schema migrations for phaselock.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!("failed to read schema_version: {e}");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: blocks and sessions.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS time_blocks (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            total_minutes       INTEGER NOT NULL CHECK (total_minutes >= 1),
            work_minutes        INTEGER NOT NULL CHECK (work_minutes >= 1),
            short_break_minutes INTEGER NOT NULL CHECK (short_break_minutes >= 0),
            long_break_minutes  INTEGER NOT NULL CHECK (long_break_minutes >= 0),
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS timer_sessions (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            time_block_id         INTEGER NOT NULL REFERENCES time_blocks(id),
            status                TEXT NOT NULL,
            current_phase         TEXT NOT NULL,
            current_phase_index   INTEGER NOT NULL,
            remaining_seconds     INTEGER NOT NULL,
            total_elapsed_seconds INTEGER NOT NULL,
            started_at            TEXT,
            paused_at             TEXT,
            completed_at          TEXT
        );",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: index for the active-session lookup.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_timer_sessions_status_started_at
            ON timer_sessions(status, started_at);
         CREATE INDEX IF NOT EXISTS idx_timer_sessions_block
            ON timer_sessions(time_block_id);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}
