use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::types::CallStatus;

/// A provider callback that arrived before `AttachProviderSid` was written.
/// Held briefly and replayed once the SID shows up, or dropped after the TTL.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub provider_sid: String,
    pub status: CallStatus,
    pub provider_ts: DateTime<Utc>,
    pub duration_secs: Option<u32>,
    pub metadata: Map<String, Value>,
    pub expires_at: DateTime<Utc>,
}

/// Bounded buffer for callbacks that beat their own call record.
pub struct PendingUpdates {
    entries: Mutex<Vec<PendingUpdate>>,
    ttl: chrono::Duration,
}

impl PendingUpdates {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ttl,
        }
    }

    pub fn push(
        &self,
        provider_sid: &str,
        status: CallStatus,
        provider_ts: DateTime<Utc>,
        duration_secs: Option<u32>,
        metadata: Map<String, Value>,
        now: DateTime<Utc>,
    ) {
        let mut entries = self.entries.lock().unwrap();
        entries.push(PendingUpdate {
            provider_sid: provider_sid.to_string(),
            status,
            provider_ts,
            duration_secs,
            metadata,
            expires_at: now + self.ttl,
        });
    }

    /// Remove and return every buffered update for `provider_sid`, in
    /// provider-timestamp order.
    pub fn drain_for(&self, provider_sid: &str) -> Vec<PendingUpdate> {
        let mut entries = self.entries.lock().unwrap();
        let mut matched: Vec<PendingUpdate> = Vec::new();
        entries.retain(|e| {
            if e.provider_sid == provider_sid {
                matched.push(e.clone());
                false
            } else {
                true
            }
        });
        matched.sort_by_key(|e| e.provider_ts);
        matched
    }

    /// Drop expired entries. Each drop is logged: losing a callback here
    /// means the record never appeared within the TTL.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| {
            let keep = e.expires_at > now;
            if !keep {
                warn!(
                    provider_sid = %e.provider_sid,
                    status = %e.status,
                    "dropping buffered callback after TTL; no record appeared"
                );
            }
            keep
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
