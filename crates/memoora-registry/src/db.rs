use std::str::FromStr;

use rusqlite::{Connection, Result};
use serde_json::{Map, Value};

use memoora_core::types::CallKind;

use crate::types::{CallRecord, CallStatus, RecordingRef};

/// Initialise the calls table. Idempotent; safe on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS calls (
            id                 TEXT PRIMARY KEY NOT NULL,
            provider_sid       TEXT UNIQUE,
            key_id             TEXT NOT NULL,
            account_id         TEXT NOT NULL,
            to_number          TEXT NOT NULL,
            caller             TEXT NOT NULL,
            kind               TEXT NOT NULL,
            status             TEXT NOT NULL,
            question           TEXT,
            initiated_at       TEXT NOT NULL,
            answered_at        TEXT,
            completed_at       TEXT,
            duration_secs      INTEGER,
            recording_file     TEXT,
            recording_size     INTEGER,
            recording_duration INTEGER,
            notified           INTEGER NOT NULL DEFAULT 0,
            last_event_at      TEXT,
            metadata           TEXT NOT NULL DEFAULT '{}'  -- JSON object
        );
        CREATE INDEX IF NOT EXISTS idx_calls_key ON calls(key_id);
        CREATE INDEX IF NOT EXISTS idx_calls_status ON calls(status);",
    )
}

pub(crate) const CALL_COLUMNS: &str =
    "id, provider_sid, key_id, account_id, to_number, caller, kind, status,
     question, initiated_at, answered_at, completed_at, duration_secs,
     recording_file, recording_size, recording_duration, notified,
     last_event_at, metadata";

/// Map a SELECT row (column order from CALL_COLUMNS) to a CallRecord.
pub(crate) fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallRecord> {
    let kind = CallKind::parse(&row.get::<_, String>(6)?).unwrap_or(CallKind::Basic);
    let status = CallStatus::from_str(&row.get::<_, String>(7)?)
        .unwrap_or(CallStatus::Failed);
    let metadata: Map<String, Value> =
        serde_json::from_str(&row.get::<_, String>(18)?).unwrap_or_default();
    let recording = match row.get::<_, Option<String>>(13)? {
        Some(filename) => Some(RecordingRef {
            filename,
            size_bytes: row.get::<_, Option<i64>>(14)?.unwrap_or(0) as u64,
            duration_secs: row.get::<_, Option<u32>>(15)?,
        }),
        None => None,
    };
    Ok(CallRecord {
        id: row.get(0)?,
        provider_sid: row.get(1)?,
        key_id: row.get(2)?,
        account_id: row.get(3)?,
        to: row.get(4)?,
        caller: row.get(5)?,
        kind,
        status,
        question: row.get(8)?,
        initiated_at: row.get(9)?,
        answered_at: row.get(10)?,
        completed_at: row.get(11)?,
        duration_secs: row.get(12)?,
        recording,
        notified: row.get::<_, i32>(16)? != 0,
        metadata,
    })
}
