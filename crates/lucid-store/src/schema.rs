use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 2;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    // Checkpoint every ~400KB so the WAL stays small between sessions.
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Fold any stale WAL into the main file. In-memory and fresh databases
    // legitimately fail this.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::info!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          INTEGER NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            source      TEXT NOT NULL,
            position    INTEGER NOT NULL,
            sentence    TEXT NOT NULL DEFAULT '',
            text_offset INTEGER NOT NULL DEFAULT 0,
            drs_json    TEXT NOT NULL,
            asserted_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_entries_id ON entries(id);
        ",
    )?;

    // v1 logs kept only the source label and position.
    if conn
        .prepare("SELECT sentence, text_offset FROM entries LIMIT 0")
        .is_err()
    {
        conn.execute_batch(
            "ALTER TABLE entries ADD COLUMN sentence TEXT NOT NULL DEFAULT '';
             ALTER TABLE entries ADD COLUMN text_offset INTEGER NOT NULL DEFAULT 0;",
        )?;
        tracing::info!("entries table migrated to schema v2");
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        for table in &["metadata", "entries"] {
            let count: i64 = conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert!(count >= 0, "table {table} should exist");
        }
    }

    #[test]
    fn test_schema_version_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_idempotent_initialize() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
    }

    #[test]
    fn test_busy_timeout_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);
    }

    #[test]
    fn test_asserted_at_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn.execute(
            "INSERT INTO entries (id, source, position, drs_json) VALUES (1, 's', 0, '{}')",
            [],
        )
        .unwrap();
        let (active, at): (i64, String) = conn
            .query_row("SELECT active, asserted_at FROM entries", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(active, 1);
        assert!(!at.is_empty());
    }

    #[test]
    fn test_v1_entries_gain_sentence_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE entries (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          INTEGER NOT NULL,
                active      INTEGER NOT NULL DEFAULT 1,
                source      TEXT NOT NULL,
                position    INTEGER NOT NULL,
                drs_json    TEXT NOT NULL,
                asserted_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            INSERT INTO entries (id, source, position, drs_json) VALUES (1, 'old.txt', 0, '{}');",
        )
        .unwrap();
        initialize(&conn).unwrap();

        let (sentence, offset): (String, i64) = conn
            .query_row("SELECT sentence, text_offset FROM entries", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(sentence, "");
        assert_eq!(offset, 0);
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }
}
