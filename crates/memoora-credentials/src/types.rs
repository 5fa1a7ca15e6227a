use serde::{Deserialize, Serialize};

/// Operations a key is allowed to perform. New keys get all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Place outbound calls.
    Call,
    /// List and download recordings.
    Recordings,
    /// Read call records and stats.
    Read,
}

impl Permission {
    pub fn default_set() -> Vec<Permission> {
        vec![Permission::Call, Permission::Recordings, Permission::Read]
    }
}

/// Per-window call allowances for one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_hour: u32,
    pub per_day: u32,
    pub per_month: u32,
}

/// Stored credential row. The key value itself is absent — only its SHA-256
/// digest survives issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Stable identifier, safe to log and to return to clients.
    pub key_id: String,
    pub account_id: String,
    pub client_name: String,
    pub email: String,
    pub website: String,
    pub phone: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub limits: RateLimits,
    pub active: bool,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

/// Returned exactly once, from `issue`. The plaintext key is not
/// recoverable afterwards.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub api_key: String,
    pub key_id: String,
    pub account_id: String,
    pub created_at: String,
    pub permissions: Vec<Permission>,
    pub limits: RateLimits,
}

/// What `validate` hands back to the gateway on success.
#[derive(Debug, Clone)]
pub struct ValidatedKey {
    pub key_id: String,
    pub account_id: String,
    pub permissions: Vec<Permission>,
    pub limits: RateLimits,
}

impl ValidatedKey {
    pub fn allows(&self, p: Permission) -> bool {
        self.permissions.contains(&p)
    }
}

/// Current counter values after rollover, for /stats.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub hour: u32,
    pub day: u32,
    pub month: u32,
    pub limits: RateLimits,
}
