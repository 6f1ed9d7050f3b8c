//! SQLite store of emitted meetings, one row per uid.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use meeting_core::CanonicalMeetingRecord;
use rusqlite::{Connection, params};
use std::path::Path;
use tracing::debug;

pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening store {}", db_path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    init(&conn)?;
    Ok(conn)
}

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meetings (
          uid TEXT PRIMARY KEY,
          start TEXT NOT NULL,
          observed_at TEXT,
          record_json TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE INDEX IF NOT EXISTS idx_meetings_start ON meetings(start);
        "#,
    )?;
    Ok(())
}

pub fn upsert_meeting(conn: &Connection, record: &CanonicalMeetingRecord) -> Result<()> {
    let record_json = serde_json::to_string(record)?;
    let start = record
        .start
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    let observed_at = record
        .observed_at
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true));

    conn.execute(
        r#"
        INSERT INTO meetings (uid, start, observed_at, record_json)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(uid) DO UPDATE SET
          start=excluded.start,
          observed_at=excluded.observed_at,
          record_json=excluded.record_json,
          updated_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')
        "#,
        params![record.uid, start, observed_at, record_json],
    )?;
    Ok(())
}

/// Upserts a whole collection in one transaction.
pub fn upsert_meetings(conn: &mut Connection, records: &[CanonicalMeetingRecord]) -> Result<usize> {
    let tx = conn.transaction()?;
    for record in records {
        upsert_meeting(&tx, record).with_context(|| format!("storing meeting {}", record.uid))?;
    }
    tx.commit()?;
    debug!(meetings = records.len(), "store updated");
    Ok(records.len())
}

/// Every stored meeting, ascending by start then uid.
pub fn load_meetings(conn: &Connection) -> Result<Vec<CanonicalMeetingRecord>> {
    let mut stmt = conn.prepare("SELECT uid, record_json FROM meetings ORDER BY start, uid")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut records = Vec::new();
    for row in rows {
        let (uid, record_json) = row?;
        let record = serde_json::from_str(&record_json)
            .with_context(|| format!("decoding stored meeting {uid}"))?;
        records.push(record);
    }
    Ok(records)
}
