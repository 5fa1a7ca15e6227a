use rusqlite::{Connection, Result};

use crate::types::{Credential, Permission, RateLimits};

/// Initialise all tables for the credential subsystem. Safe to call on
/// every startup — CREATE IF NOT EXISTS makes it idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS credentials (
            key_id       TEXT PRIMARY KEY NOT NULL,
            key_digest   TEXT NOT NULL UNIQUE,
            account_id   TEXT NOT NULL,
            client_name  TEXT NOT NULL,
            email        TEXT NOT NULL,
            website      TEXT NOT NULL,
            phone        TEXT NOT NULL,
            description  TEXT,
            permissions  TEXT NOT NULL DEFAULT '[]',  -- JSON array
            per_hour     INTEGER NOT NULL,
            per_day      INTEGER NOT NULL,
            per_month    INTEGER NOT NULL,
            active       INTEGER NOT NULL DEFAULT 1,
            created_at   TEXT NOT NULL,
            last_used_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_credentials_account
            ON credentials(account_id);

        CREATE TABLE IF NOT EXISTS usage_counters (
            key_id       TEXT PRIMARY KEY NOT NULL
                         REFERENCES credentials(key_id) ON DELETE CASCADE,
            hour_window  TEXT NOT NULL,
            hour_count   INTEGER NOT NULL DEFAULT 0,
            day_window   TEXT NOT NULL,
            day_count    INTEGER NOT NULL DEFAULT 0,
            month_window TEXT NOT NULL,
            month_count  INTEGER NOT NULL DEFAULT 0
        );",
    )
}

pub(crate) const CREDENTIAL_COLUMNS: &str =
    "key_id, account_id, client_name, email, website, phone, description,
     permissions, per_hour, per_day, per_month, active, created_at, last_used_at";

/// Map a SELECT row (column order from CREDENTIAL_COLUMNS) to a Credential.
/// Centralised so every query in this crate stays consistent.
pub(crate) fn row_to_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<Credential> {
    let permissions: Vec<Permission> =
        serde_json::from_str(&row.get::<_, String>(7)?).unwrap_or_default();
    Ok(Credential {
        key_id: row.get(0)?,
        account_id: row.get(1)?,
        client_name: row.get(2)?,
        email: row.get(3)?,
        website: row.get(4)?,
        phone: row.get(5)?,
        description: row.get(6)?,
        permissions,
        limits: RateLimits {
            per_hour: row.get(8)?,
            per_day: row.get(9)?,
            per_month: row.get(10)?,
        },
        active: row.get::<_, i32>(11)? != 0,
        created_at: row.get(12)?,
        last_used_at: row.get(13)?,
    })
}
