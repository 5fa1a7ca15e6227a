use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use ring::rand::{SecureRandom, SystemRandom};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use memoora_core::clock::Clock;
use memoora_core::config::SignupConfig;
use memoora_core::error::RateWindow;
use memoora_core::types::{key_preview, PhoneNumber};

use crate::db::{init_db, row_to_credential, CREDENTIAL_COLUMNS};
use crate::error::{CredentialError, Result};
use crate::types::{
    Credential, IssuedKey, Permission, RateLimits, UsageSnapshot, ValidatedKey,
};

/// Keys are issued with a recognisable prefix so humans (and log scrubbers)
/// can spot them.
const KEY_PREFIX: &str = "mk_";
const KEY_BYTES: usize = 32;

/// Issues, validates, rate-limits, and revokes API keys. Owns the
/// credentials and usage_counters tables exclusively; no other component
/// keeps its own counters.
pub struct CredentialStore {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    zone: Tz,
    signup: SignupConfig,
    default_limits: RateLimits,
    rng: SystemRandom,
}

impl CredentialStore {
    pub fn new(
        conn: Connection,
        clock: Arc<dyn Clock>,
        zone: Tz,
        signup: SignupConfig,
        default_limits: RateLimits,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
            zone,
            signup,
            default_limits,
            rng: SystemRandom::new(),
        })
    }

    /// Generate and persist a new credential. The plaintext key is returned
    /// exactly once; only its digest is stored.
    #[instrument(skip(self, email, website, phone))]
    pub fn issue(
        &self,
        client_name: &str,
        email: &str,
        website: &str,
        phone: &str,
        description: Option<&str>,
    ) -> Result<IssuedKey> {
        let email = email.trim().to_ascii_lowercase();
        check_email(&email)?;
        self.check_domain_policy(&email)?;
        check_website(website.trim())?;
        let phone = PhoneNumber::parse(phone).ok_or(CredentialError::MalformedPhone)?;

        let api_key = self.generate_key()?;
        let digest = digest_hex(&api_key);
        let key_id = Uuid::now_v7().to_string();
        let account_id = Uuid::new_v4().to_string();
        let now = self.clock.now().to_rfc3339();
        let permissions = Permission::default_set();
        let permissions_json = serde_json::to_string(&permissions)
            .map_err(|e| CredentialError::TransientUnavailable(e.to_string()))?;
        let (hour_w, day_w, month_w) = self.window_ids(self.clock.now());

        let conn = self.lock_db()?;
        conn.execute(
            "INSERT INTO credentials
                (key_id, key_digest, account_id, client_name, email, website,
                 phone, description, permissions, per_hour, per_day, per_month,
                 active, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,1,?13)",
            params![
                key_id,
                digest,
                account_id,
                client_name,
                email,
                website.trim(),
                phone.as_str(),
                description,
                permissions_json,
                self.default_limits.per_hour,
                self.default_limits.per_day,
                self.default_limits.per_month,
                now,
            ],
        )?;
        conn.execute(
            "INSERT INTO usage_counters
                (key_id, hour_window, hour_count, day_window, day_count,
                 month_window, month_count)
             VALUES (?1,?2,0,?3,0,?4,0)",
            params![key_id, hour_w, day_w, month_w],
        )?;
        drop(conn);

        info!(key_id = %key_id, key = %key_preview(&api_key), "API key issued");

        Ok(IssuedKey {
            api_key,
            key_id,
            account_id,
            created_at: now,
            permissions,
            limits: self.default_limits,
        })
    }

    /// Look up a key by digest and check every usage window.
    ///
    /// Limits are compared after rolling stale windows over and before any
    /// increment, so a window can fill to exactly its limit and no further.
    /// Safe under concurrent callers for the same key: all reads and the
    /// rollover write happen under the store lock.
    pub fn validate(&self, key_value: &str) -> Result<ValidatedKey> {
        let digest = digest_hex(key_value);
        let now = self.clock.now();
        let now_str = now.to_rfc3339();

        let conn = self.lock_db()?;
        let cred = conn
            .query_row(
                &format!(
                    "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE key_digest = ?1"
                ),
                params![digest],
                row_to_credential,
            )
            .optional()
            .map_err(map_transient)?
            .ok_or(CredentialError::Unknown)?;

        if !cred.active {
            return Err(CredentialError::Inactive);
        }

        let counters = self.rolled_over_counters(&conn, &cred.key_id, now)?;
        if counters.hour_count >= cred.limits.per_hour {
            return Err(CredentialError::RateLimited {
                window: RateWindow::Hour,
                retry_after_secs: self.secs_to_next_hour(now),
            });
        }
        if counters.day_count >= cred.limits.per_day {
            return Err(CredentialError::RateLimited {
                window: RateWindow::Day,
                retry_after_secs: self.secs_to_next_day(now),
            });
        }
        if counters.month_count >= cred.limits.per_month {
            return Err(CredentialError::RateLimited {
                window: RateWindow::Month,
                retry_after_secs: self.secs_to_next_month(now),
            });
        }

        conn.execute(
            "UPDATE credentials SET last_used_at = ?1 WHERE key_id = ?2",
            params![now_str, cred.key_id],
        )?;

        Ok(ValidatedKey {
            key_id: cred.key_id,
            account_id: cred.account_id,
            permissions: cred.permissions,
            limits: cred.limits,
        })
    }

    /// Advance all three window counters for one placed call, rolling any
    /// stale window over first. Atomic relative to concurrent validates:
    /// everything happens under the store lock.
    pub fn increment_usage(&self, key_id: &str) -> Result<()> {
        let now = self.clock.now();
        let conn = self.lock_db()?;
        let counters = self.rolled_over_counters(&conn, key_id, now)?;
        conn.execute(
            "UPDATE usage_counters SET
                hour_window = ?2, hour_count = ?3,
                day_window = ?4, day_count = ?5,
                month_window = ?6, month_count = ?7
             WHERE key_id = ?1",
            params![
                key_id,
                counters.hour_window,
                counters.hour_count + 1,
                counters.day_window,
                counters.day_count + 1,
                counters.month_window,
                counters.month_count + 1,
            ],
        )?;
        Ok(())
    }

    /// Deactivate a key. Idempotent and irreversible: revoking twice
    /// succeeds both times and the credential never becomes active again.
    pub fn revoke(&self, key_id: &str) -> Result<()> {
        let conn = self.lock_db()?;
        let n = conn.execute(
            "UPDATE credentials SET active = 0 WHERE key_id = ?1",
            params![key_id],
        )?;
        if n == 0 {
            return Err(CredentialError::Unknown);
        }
        info!(key_id = %key_id, "API key revoked");
        Ok(())
    }

    /// Load a credential by its stable id (stats surface).
    pub fn get(&self, key_id: &str) -> Result<Credential> {
        let conn = self.lock_db()?;
        conn.query_row(
            &format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE key_id = ?1"),
            params![key_id],
            row_to_credential,
        )
        .optional()
        .map_err(map_transient)?
        .ok_or(CredentialError::Unknown)
    }

    /// Point-in-time counter values after rollover. Read-only.
    pub fn usage_snapshot(&self, key_id: &str) -> Result<UsageSnapshot> {
        let now = self.clock.now();
        let conn = self.lock_db()?;
        let cred = conn
            .query_row(
                &format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE key_id = ?1"),
                params![key_id],
                row_to_credential,
            )
            .optional()
            .map_err(map_transient)?
            .ok_or(CredentialError::Unknown)?;
        let counters = self.rolled_over_counters(&conn, key_id, now)?;
        Ok(UsageSnapshot {
            hour: counters.hour_count,
            day: counters.day_count,
            month: counters.month_count,
            limits: cred.limits,
        })
    }

    // --- private helpers ---------------------------------------------------

    fn lock_db(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| CredentialError::TransientUnavailable("store lock poisoned".into()))
    }

    fn generate_key(&self) -> Result<String> {
        let mut bytes = [0u8; KEY_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| CredentialError::TransientUnavailable("system RNG failed".into()))?;
        Ok(format!("{KEY_PREFIX}{}", hex::encode(bytes)))
    }

    fn check_domain_policy(&self, email: &str) -> Result<()> {
        // check_email ran first, so the '@' is present.
        let domain = email.rsplit('@').next().unwrap_or_default();
        if self
            .signup
            .blocked_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
        {
            warn!(domain = %domain, "signup rejected by blocklist");
            return Err(CredentialError::DomainRejected);
        }
        if !self.signup.allowed_domains.is_empty()
            && !self
                .signup
                .allowed_domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(domain))
        {
            warn!(domain = %domain, "signup domain absent from allowlist");
            return Err(CredentialError::DomainRejected);
        }
        Ok(())
    }

    /// Read the usage row for `key_id`, zeroing any counter whose stored
    /// window id differs from the current one. Does not persist: callers
    /// write back as part of their own update.
    fn rolled_over_counters(
        &self,
        conn: &Connection,
        key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Counters> {
        let (hour_w, day_w, month_w) = self.window_ids(now);
        let row = conn
            .query_row(
                "SELECT hour_window, hour_count, day_window, day_count,
                        month_window, month_count
                 FROM usage_counters WHERE key_id = ?1",
                params![key_id],
                |row| {
                    Ok(Counters {
                        hour_window: row.get(0)?,
                        hour_count: row.get(1)?,
                        day_window: row.get(2)?,
                        day_count: row.get(3)?,
                        month_window: row.get(4)?,
                        month_count: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(map_transient)?;

        let mut counters = match row {
            Some(c) => c,
            None => {
                // Row is created at issue time; tolerate its absence anyway.
                conn.execute(
                    "INSERT OR IGNORE INTO usage_counters
                        (key_id, hour_window, hour_count, day_window, day_count,
                         month_window, month_count)
                     VALUES (?1,?2,0,?3,0,?4,0)",
                    params![key_id, hour_w, day_w, month_w],
                )?;
                Counters {
                    hour_window: hour_w.clone(),
                    hour_count: 0,
                    day_window: day_w.clone(),
                    day_count: 0,
                    month_window: month_w.clone(),
                    month_count: 0,
                }
            }
        };

        if counters.hour_window != hour_w {
            counters.hour_window = hour_w;
            counters.hour_count = 0;
        }
        if counters.day_window != day_w {
            counters.day_window = day_w;
            counters.day_count = 0;
        }
        if counters.month_window != month_w {
            counters.month_window = month_w;
            counters.month_count = 0;
        }
        Ok(counters)
    }

    /// Window identifiers in the configured zone: hour of day, civil date,
    /// civil month.
    fn window_ids(&self, now: DateTime<Utc>) -> (String, String, String) {
        let local = now.with_timezone(&self.zone);
        (
            local.format("%Y-%m-%dT%H").to_string(),
            local.format("%Y-%m-%d").to_string(),
            local.format("%Y-%m").to_string(),
        )
    }

    fn secs_to_next_hour(&self, now: DateTime<Utc>) -> u64 {
        let local = now.with_timezone(&self.zone);
        (3600 - (u64::from(local.minute()) * 60 + u64::from(local.second()))).max(1)
    }

    fn secs_to_next_day(&self, now: DateTime<Utc>) -> u64 {
        let local = now.with_timezone(&self.zone);
        let elapsed =
            u64::from(local.hour()) * 3600 + u64::from(local.minute()) * 60 + u64::from(local.second());
        (86_400 - elapsed).max(1)
    }

    fn secs_to_next_month(&self, now: DateTime<Utc>) -> u64 {
        let local = now.with_timezone(&self.zone);
        let (year, month) = if local.month() == 12 {
            (local.year() + 1, 1)
        } else {
            (local.year(), local.month() + 1)
        };
        match self.zone.with_ymd_and_hms(year, month, 1, 0, 0, 0).earliest() {
            Some(boundary) => (boundary.timestamp() - now.timestamp()).max(1) as u64,
            None => 86_400,
        }
    }
}

#[derive(Debug, Clone)]
struct Counters {
    hour_window: String,
    hour_count: u32,
    day_window: String,
    day_count: u32,
    month_window: String,
    month_count: u32,
}

fn digest_hex(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn check_email(email: &str) -> Result<()> {
    let (local, domain) = email.split_once('@').ok_or(CredentialError::MalformedEmail)?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || domain.contains('@') {
        return Err(CredentialError::MalformedEmail);
    }
    if email.chars().any(|c| c.is_whitespace()) {
        return Err(CredentialError::MalformedEmail);
    }
    Ok(())
}

fn check_website(website: &str) -> Result<()> {
    let rest = website
        .strip_prefix("https://")
        .or_else(|| website.strip_prefix("http://"))
        .ok_or(CredentialError::MalformedWebsite)?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || !host.contains('.') {
        return Err(CredentialError::MalformedWebsite);
    }
    Ok(())
}

/// SQLITE_BUSY and friends are transient; the caller must not read them as
/// "unknown key".
fn map_transient(e: rusqlite::Error) -> CredentialError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::DatabaseBusy
                || inner.code == rusqlite::ErrorCode::DatabaseLocked =>
        {
            CredentialError::TransientUnavailable(e.to_string())
        }
        _ => CredentialError::Database(e),
    }
}
