use std::path::Path;

use rusqlite::{Connection, params};

use lucid_core::{DrsBox, EntryId, LogRecord, Provenance};

use crate::error::{Result, StoreError};
use crate::schema;

/// Append-only entry log for one knowledge base.
///
/// Rows are never deleted except by [`Store::replace_log`]. Retraction flips
/// `active`; the box itself stays so the log replays to the same ids. Rows
/// replay in append order, which must agree with id order.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Writes ---

    pub fn append_entry(&self, record: &LogRecord) -> Result<()> {
        insert_on(&self.conn, record)
    }

    pub fn mark_retracted(&self, id: EntryId) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE entries SET active = 0 WHERE id = ?1",
            [id.0 as i64],
        )?;
        if rows == 0 {
            return Err(StoreError::InvalidData(format!("entry not found: {id}")));
        }
        Ok(())
    }

    /// Bring the stored log up to date with `log`, the full in-memory log
    /// of the same knowledge base. Appends entries past the last stored id
    /// and flips retracted ones. Returns the number of rows touched.
    pub fn sync_log(&self, log: &[LogRecord]) -> Result<usize> {
        let last = self.last_id()?.map_or(0, |id| id.0);
        let tx = self.conn.unchecked_transaction()?;
        let mut touched = 0;
        for record in log {
            if record.id.0 > last {
                insert_on(&tx, record)?;
                touched += 1;
            } else if !record.active {
                touched += tx.execute(
                    "UPDATE entries SET active = 0 WHERE id = ?1 AND active = 1",
                    [record.id.0 as i64],
                )?;
            }
        }
        tx.commit()?;
        if touched > 0 {
            tracing::debug!(touched, "entry log synced");
        }
        Ok(touched)
    }

    /// Replace the whole log, e.g. on import.
    pub fn replace_log(&self, log: &[LogRecord]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch("DELETE FROM entries;")?;
        for record in log {
            insert_on(&tx, record)?;
        }
        tx.commit()?;
        tracing::info!(entries = log.len(), "entry log replaced");
        Ok(())
    }

    // --- Reads ---

    /// The log in id order. Ids must be strictly increasing and every box
    /// must decode; anything else is corruption.
    pub fn load_log(&self) -> Result<Vec<LogRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, active, source, position, sentence, text_offset, drs_json
             FROM entries ORDER BY seq",
        )?;
        let rows: Vec<StoredRow> = stmt
            .query_map([], |row| {
                Ok(StoredRow {
                    id: row.get(0)?,
                    active: row.get::<_, i32>(1)? != 0,
                    source: row.get(2)?,
                    position: row.get(3)?,
                    sentence: row.get(4)?,
                    offset: row.get(5)?,
                    drs_json: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut log = Vec::with_capacity(rows.len());
        let mut previous = 0u64;
        for StoredRow {
            id,
            active,
            source,
            position,
            sentence,
            offset,
            drs_json,
        } in rows
        {
            let id = u64::try_from(id)
                .ok()
                .filter(|&id| id > previous)
                .ok_or_else(|| {
                    StoreError::Corrupt(format!("entry id {id} does not follow {previous}"))
                })?;
            previous = id;
            let position = usize::try_from(position).map_err(|_| {
                StoreError::Corrupt(format!("entry {id} has position {position}"))
            })?;
            let offset = usize::try_from(offset)
                .map_err(|_| StoreError::Corrupt(format!("entry {id} has offset {offset}")))?;
            let drs: DrsBox = serde_json::from_str(&drs_json)
                .map_err(|e| StoreError::Corrupt(format!("entry {id} does not decode: {e}")))?;
            log.push(LogRecord {
                id: EntryId(id),
                active,
                provenance: Provenance::new(source, position).with_text(sentence, offset),
                drs,
            });
        }
        Ok(log)
    }

    pub fn entry_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn last_id(&self) -> Result<Option<EntryId>> {
        let id: Option<i64> = self
            .conn
            .query_row("SELECT MAX(id) FROM entries", [], |row| row.get(0))?;
        Ok(id.map(|id| EntryId(id as u64)))
    }

    /// Fold the WAL into the main database file and truncate it.
    pub fn checkpoint_truncate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

struct StoredRow {
    id: i64,
    active: bool,
    source: String,
    position: i64,
    sentence: String,
    offset: i64,
    drs_json: String,
}

fn insert_on(conn: &Connection, record: &LogRecord) -> Result<()> {
    let drs_json = serde_json::to_string(&record.drs)
        .map_err(|e| StoreError::InvalidData(format!("entry {} does not encode: {e}", record.id)))?;
    conn.execute(
        "INSERT INTO entries (id, active, source, position, sentence, text_offset, drs_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.id.0 as i64,
            record.active as i32,
            record.provenance.source,
            record.provenance.position as i64,
            record.provenance.text,
            record.provenance.offset as i64,
            drs_json,
        ],
    )?;
    Ok(())
}
