use anyhow::Result;
use rusqlite::Connection;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if pragma setup, table creation or index creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // WAL lets the monitor process read while the daemon writes
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("SQLite journal mode: {mode}");
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    // Policy state - exactly one row (id = 1), written as a single record
    conn.execute(
        "CREATE TABLE IF NOT EXISTS policy_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            probability REAL,
            label TEXT,
            decided_at TEXT,
            restricted_mode INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Classification history - one row per recorded decision
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classifications (
            id TEXT PRIMARY KEY,
            owner TEXT,
            probability REAL NOT NULL,
            label TEXT NOT NULL,
            decided_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classifications_decided_at
         ON classifications(decided_at)",
        [],
    )?;

    Ok(())
}
