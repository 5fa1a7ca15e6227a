use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use memoora_core::clock::Clock;

use crate::db::{init_db, row_to_call, CALL_COLUMNS};
use crate::error::{RegistryError, Result};
use crate::pending::PendingUpdates;
use crate::types::{
    CallCounts, CallFilter, CallRecord, CallStatus, NewCall, RecordingRef, UpdateOutcome,
};

/// How long an early provider callback is held while waiting for its record.
const PENDING_TTL_SECS: i64 = 30;

/// Source of truth for every outbound call. Guards the status transition
/// graph, correlates provider callbacks by SID, and owns the recording
/// reference.
pub struct CallRegistry {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    pending: PendingUpdates,
}

impl CallRegistry {
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
            pending: PendingUpdates::new(chrono::Duration::seconds(PENDING_TTL_SECS)),
        })
    }

    /// Insert a brand-new record in `Initiated`. The id is generated here
    /// so the caller immediately has the canonical handle.
    #[instrument(skip(self, call), fields(to = %call.to))]
    pub fn create(&self, call: NewCall) -> Result<CallRecord> {
        let id = Uuid::new_v4().to_string();
        let now = self.clock.now().to_rfc3339();
        let metadata_json = serde_json::to_string(&call.metadata)
            .map_err(|e| RegistryError::Internal(e.to_string()))?;

        let conn = self.lock_db()?;
        conn.execute(
            "INSERT INTO calls
                (id, key_id, account_id, to_number, caller, kind, status,
                 question, initiated_at, metadata)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                id,
                call.key_id,
                call.account_id,
                call.to,
                call.caller,
                call.kind.as_str(),
                CallStatus::Initiated.as_str(),
                call.question,
                now,
                metadata_json,
            ],
        )?;
        drop(conn);

        info!(call_id = %id, kind = %call.kind, "call record created");
        self.get_by_internal_id(&id)
    }

    /// Bind the provider SID to an internal record. Immutable once set.
    /// Replays any callbacks that arrived before this write.
    pub fn attach_provider_sid(&self, internal_id: &str, provider_sid: &str) -> Result<()> {
        {
            let conn = self.lock_db()?;
            let existing: Option<Option<String>> = conn
                .query_row(
                    "SELECT provider_sid FROM calls WHERE id = ?1",
                    params![internal_id],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                None => return Err(RegistryError::NotFound(internal_id.to_string())),
                Some(Some(_)) => {
                    return Err(RegistryError::SidAlreadyAttached(internal_id.to_string()))
                }
                Some(None) => {}
            }
            conn.execute(
                "UPDATE calls SET provider_sid = ?1 WHERE id = ?2",
                params![provider_sid, internal_id],
            )?;
        }

        for update in self.pending.drain_for(provider_sid) {
            debug!(provider_sid, status = %update.status, "replaying buffered callback");
            self.update_status(
                provider_sid,
                update.status,
                Some(update.provider_ts),
                update.duration_secs,
                update.metadata,
            )?;
        }
        Ok(())
    }

    /// Mark a record that never reached the provider as failed. Used when
    /// placement itself errors, before any SID exists.
    pub fn fail_unplaced(&self, internal_id: &str, reason: &str) -> Result<()> {
        let record = self.get_by_internal_id(internal_id)?;
        let mut merged = record.metadata.clone();
        merged.insert(
            "placementError".to_string(),
            Value::String(reason.to_string()),
        );
        let metadata_json = serde_json::to_string(&merged)
            .map_err(|e| RegistryError::Internal(e.to_string()))?;
        let now = self.clock.now().to_rfc3339();
        let conn = self.lock_db()?;
        conn.execute(
            "UPDATE calls SET status = ?1, completed_at = ?2, metadata = ?3 WHERE id = ?4",
            params![CallStatus::Failed.as_str(), now, metadata_json, internal_id],
        )?;
        warn!(call_id = %internal_id, reason, "placement failed; call marked failed");
        Ok(())
    }

    /// Record the outcome of a successful placement: the SID, the "from"
    /// the provider actually accepted, and any fallback metadata.
    pub fn record_placement(
        &self,
        internal_id: &str,
        provider_sid: &str,
        from_used: &str,
        extra_metadata: Map<String, Value>,
    ) -> Result<()> {
        {
            let record = self.get_by_internal_id(internal_id)?;
            let mut merged = record.metadata.clone();
            merged.extend(extra_metadata);
            let metadata_json = serde_json::to_string(&merged)
                .map_err(|e| RegistryError::Internal(e.to_string()))?;
            let conn = self.lock_db()?;
            conn.execute(
                "UPDATE calls SET caller = ?1, metadata = ?2 WHERE id = ?3",
                params![from_used, metadata_json, internal_id],
            )?;
        }
        self.attach_provider_sid(internal_id, provider_sid)
    }

    /// Apply a provider status callback.
    ///
    /// Unknown SIDs are buffered (the callback may have raced the
    /// `attach_provider_sid` write). Updates older than the last applied
    /// provider event are dropped. Illegal transitions are logged and leave
    /// the record untouched: the provider cannot be told it is wrong.
    pub fn update_status(
        &self,
        provider_sid: &str,
        new_status: CallStatus,
        provider_ts: Option<DateTime<Utc>>,
        duration_secs: Option<u32>,
        metadata: Map<String, Value>,
    ) -> Result<UpdateOutcome> {
        let now = self.clock.now();
        let event_ts = provider_ts.unwrap_or(now);

        let conn = self.lock_db()?;
        let record = conn
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM calls WHERE provider_sid = ?1"),
                params![provider_sid],
                row_to_call,
            )
            .optional()?;

        let record = match record {
            Some(r) => r,
            None => {
                drop(conn);
                debug!(provider_sid, status = %new_status, "callback for unknown SID buffered");
                self.pending
                    .push(provider_sid, new_status, event_ts, duration_secs, metadata, now);
                return Ok(UpdateOutcome::Buffered);
            }
        };

        let last_event: Option<DateTime<Utc>> = conn
            .query_row(
                "SELECT last_event_at FROM calls WHERE id = ?1",
                params![record.id],
                |row| row.get::<_, Option<String>>(0),
            )?
            .and_then(|s| s.parse().ok());
        if let Some(last) = last_event {
            if event_ts < last {
                debug!(
                    call_id = %record.id,
                    status = %new_status,
                    "stale provider callback dropped"
                );
                return Ok(UpdateOutcome::Stale);
            }
        }

        if record.status == new_status {
            // Duplicate delivery; refresh the event watermark only.
            conn.execute(
                "UPDATE calls SET last_event_at = ?1 WHERE id = ?2",
                params![event_ts.to_rfc3339(), record.id],
            )?;
            return Ok(UpdateOutcome::Applied);
        }

        if !record.status.can_transition_to(new_status) {
            warn!(
                call_id = %record.id,
                from = %record.status,
                to = %new_status,
                "illegal transition from provider; ignored"
            );
            return Ok(UpdateOutcome::IgnoredIllegal);
        }

        let now_str = now.to_rfc3339();
        let answered_at = match new_status {
            CallStatus::Answered if record.answered_at.is_none() => Some(now_str.clone()),
            _ => record.answered_at.clone(),
        };
        let completed_at = if new_status.is_terminal() {
            Some(now_str.clone())
        } else {
            record.completed_at.clone()
        };
        let duration = duration_secs.or(record.duration_secs);

        let mut merged = record.metadata.clone();
        merged.extend(metadata);
        let metadata_json = serde_json::to_string(&merged)
            .map_err(|e| RegistryError::Internal(e.to_string()))?;

        conn.execute(
            "UPDATE calls SET status = ?1, answered_at = ?2, completed_at = ?3,
                duration_secs = ?4, last_event_at = ?5, metadata = ?6
             WHERE id = ?7",
            params![
                new_status.as_str(),
                answered_at,
                completed_at,
                duration,
                event_ts.to_rfc3339(),
                metadata_json,
                record.id,
            ],
        )?;

        info!(call_id = %record.id, from = %record.status, to = %new_status, "call status updated");
        Ok(UpdateOutcome::Applied)
    }

    /// `Answered -> InProgress`, triggered by the first prompt-handler hit.
    /// A no-op from any other state.
    pub fn mark_in_progress(&self, provider_sid: &str) -> Result<()> {
        let record = self.get_by_provider_sid(provider_sid)?;
        if record.status.can_transition_to(CallStatus::InProgress) {
            self.update_status(
                provider_sid,
                CallStatus::InProgress,
                None,
                None,
                Map::new(),
            )?;
        }
        Ok(())
    }

    /// Attach the recording reference. At most once per record.
    pub fn attach_recording(&self, provider_sid: &str, recording: RecordingRef) -> Result<()> {
        let conn = self.lock_db()?;
        let existing: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT id, recording_file FROM calls WHERE provider_sid = ?1",
                params![provider_sid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (id, current) = existing.ok_or_else(|| RegistryError::NotFound(provider_sid.into()))?;
        if current.is_some() {
            return Err(RegistryError::RecordingAlreadySet(id));
        }
        conn.execute(
            "UPDATE calls SET recording_file = ?1, recording_size = ?2,
                recording_duration = ?3
             WHERE id = ?4",
            params![
                recording.filename,
                recording.size_bytes as i64,
                recording.duration_secs,
                id,
            ],
        )?;
        info!(call_id = %id, filename = %recording.filename, "recording attached");
        Ok(())
    }

    /// Record the upstream delivery outcome for the completion event.
    pub fn mark_notified(&self, provider_sid: &str, delivered: bool) -> Result<()> {
        let conn = self.lock_db()?;
        let n = conn.execute(
            "UPDATE calls SET notified = ?1 WHERE provider_sid = ?2",
            params![delivered as i32, provider_sid],
        )?;
        if n == 0 {
            return Err(RegistryError::NotFound(provider_sid.to_string()));
        }
        Ok(())
    }

    /// Explicit client-initiated cancel. Unlike provider callbacks, an
    /// illegal cancel (terminal record) is an error the caller sees.
    pub fn cancel(&self, internal_id: &str) -> Result<CallRecord> {
        let record = self.get_by_internal_id(internal_id)?;
        if !record.status.can_transition_to(CallStatus::Canceled) {
            return Err(RegistryError::IllegalTransition {
                from: record.status.to_string(),
                to: CallStatus::Canceled.to_string(),
            });
        }
        let now = self.clock.now().to_rfc3339();
        let conn = self.lock_db()?;
        conn.execute(
            "UPDATE calls SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params![CallStatus::Canceled.as_str(), now, internal_id],
        )?;
        drop(conn);
        self.get_by_internal_id(internal_id)
    }

    pub fn get_by_internal_id(&self, id: &str) -> Result<CallRecord> {
        let conn = self.lock_db()?;
        conn.query_row(
            &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
            params![id],
            row_to_call,
        )
        .optional()?
        .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn get_by_provider_sid(&self, provider_sid: &str) -> Result<CallRecord> {
        let conn = self.lock_db()?;
        conn.query_row(
            &format!("SELECT {CALL_COLUMNS} FROM calls WHERE provider_sid = ?1"),
            params![provider_sid],
            row_to_call,
        )
        .optional()?
        .ok_or_else(|| RegistryError::NotFound(provider_sid.to_string()))
    }

    /// Records owned by one credential, newest first.
    pub fn list_by_credential(&self, key_id: &str, filter: &CallFilter) -> Result<Vec<CallRecord>> {
        let limit = filter.limit.unwrap_or(100).min(500);
        let conn = self.lock_db()?;
        let records = match filter.status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CALL_COLUMNS} FROM calls
                     WHERE key_id = ?1 AND status = ?2
                     ORDER BY initiated_at DESC LIMIT ?3"
                ))?;
                let rows = stmt.query_map(params![key_id, status.as_str(), limit], row_to_call)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CALL_COLUMNS} FROM calls
                     WHERE key_id = ?1 ORDER BY initiated_at DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![key_id, limit], row_to_call)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }

    /// Aggregate counts for the stats surface.
    pub fn counts_for_credential(&self, key_id: &str) -> Result<CallCounts> {
        let conn = self.lock_db()?;
        let mut stmt = conn.prepare(
            "SELECT status, recording_file IS NOT NULL FROM calls WHERE key_id = ?1",
        )?;
        let rows = stmt.query_map(params![key_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?;

        let mut counts = CallCounts::default();
        for row in rows {
            let (status, recorded) = row?;
            counts.total += 1;
            if recorded {
                counts.recorded += 1;
            }
            match status.parse::<CallStatus>() {
                Ok(CallStatus::Completed) => counts.completed += 1,
                Ok(s) if s.is_terminal() => counts.failed += 1,
                _ => counts.in_flight += 1,
            }
        }
        Ok(counts)
    }

    /// Drop buffered callbacks past their TTL. Called by the sweeper.
    pub fn sweep_pending(&self) -> usize {
        self.pending.sweep(self.clock.now())
    }

    fn lock_db(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| RegistryError::Internal("registry lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use memoora_core::clock::ManualClock;
    use memoora_core::types::CallKind;

    fn registry() -> (CallRegistry, Arc<ManualClock>) {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap());
        let reg = CallRegistry::new(Connection::open_in_memory().unwrap(), clock.clone()).unwrap();
        (reg, clock)
    }

    fn new_call() -> NewCall {
        NewCall {
            key_id: "key-1".into(),
            account_id: "acct-1".into(),
            to: "+13128484329".into(),
            caller: "+17085547471".into(),
            kind: CallKind::Basic,
            question: Some("Tell me about your childhood.".into()),
            metadata: Map::new(),
        }
    }

    fn ts(reg_clock: &ManualClock, offset_secs: i64) -> DateTime<Utc> {
        reg_clock.now() + chrono::Duration::seconds(offset_secs)
    }

    #[test]
    fn happy_path_progression() {
        let (reg, clock) = registry();
        let record = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&record.id, "CA100").unwrap();

        for (i, status) in [CallStatus::Ringing, CallStatus::Answered, CallStatus::Completed]
            .into_iter()
            .enumerate()
        {
            let outcome = reg
                .update_status("CA100", status, Some(ts(&clock, i as i64)), None, Map::new())
                .unwrap();
            assert_eq!(outcome, UpdateOutcome::Applied);
        }

        let record = reg.get_by_provider_sid("CA100").unwrap();
        assert_eq!(record.status, CallStatus::Completed);
        assert!(record.answered_at.is_some());
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn correlation_by_both_ids_agrees() {
        let (reg, _) = registry();
        let record = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&record.id, "CA200").unwrap();
        let by_sid = reg.get_by_provider_sid("CA200").unwrap();
        let by_id = reg.get_by_internal_id(&record.id).unwrap();
        assert_eq!(by_sid.id, by_id.id);
        assert_eq!(by_sid.provider_sid.as_deref(), Some("CA200"));
    }

    #[test]
    fn provider_sid_is_immutable() {
        let (reg, _) = registry();
        let record = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&record.id, "CA300").unwrap();
        assert!(matches!(
            reg.attach_provider_sid(&record.id, "CA301"),
            Err(RegistryError::SidAlreadyAttached(_))
        ));
    }

    #[test]
    fn illegal_transition_is_ignored_not_applied() {
        let (reg, clock) = registry();
        let record = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&record.id, "CA400").unwrap();
        // completed straight from initiated is not in the graph
        let outcome = reg
            .update_status("CA400", CallStatus::Completed, Some(ts(&clock, 1)), None, Map::new())
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::IgnoredIllegal);
        assert_eq!(
            reg.get_by_provider_sid("CA400").unwrap().status,
            CallStatus::Initiated
        );
    }

    #[test]
    fn early_callback_is_buffered_and_replayed() {
        let (reg, clock) = registry();
        let record = reg.create(new_call()).unwrap();

        // Callback beats the attach write.
        let outcome = reg
            .update_status("CA500", CallStatus::Ringing, Some(ts(&clock, 1)), None, Map::new())
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Buffered);

        reg.attach_provider_sid(&record.id, "CA500").unwrap();
        assert_eq!(
            reg.get_by_provider_sid("CA500").unwrap().status,
            CallStatus::Ringing
        );
    }

    #[test]
    fn buffered_callback_expires_after_ttl() {
        let (reg, clock) = registry();
        reg.update_status("CA600", CallStatus::Ringing, None, None, Map::new())
            .unwrap();
        clock.advance(chrono::Duration::seconds(PENDING_TTL_SECS + 1));
        assert_eq!(reg.sweep_pending(), 1);
    }

    #[test]
    fn stale_updates_are_dropped() {
        let (reg, clock) = registry();
        let record = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&record.id, "CA700").unwrap();

        reg.update_status("CA700", CallStatus::Ringing, Some(ts(&clock, 10)), None, Map::new())
            .unwrap();
        let outcome = reg
            .update_status("CA700", CallStatus::Busy, Some(ts(&clock, 5)), None, Map::new())
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Stale);
        assert_eq!(
            reg.get_by_provider_sid("CA700").unwrap().status,
            CallStatus::Ringing
        );
    }

    #[test]
    fn recording_attaches_at_most_once() {
        let (reg, _) = registry();
        let record = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&record.id, "CA800").unwrap();

        let rec = RecordingRef {
            filename: "story-1754049600000.mp3".into(),
            size_bytes: 52_000,
            duration_secs: Some(42),
        };
        reg.attach_recording("CA800", rec.clone()).unwrap();
        assert!(matches!(
            reg.attach_recording("CA800", rec),
            Err(RegistryError::RecordingAlreadySet(_))
        ));

        let loaded = reg.get_by_provider_sid("CA800").unwrap();
        let loaded_rec = loaded.recording.unwrap();
        assert_eq!(loaded_rec.size_bytes, 52_000);
        assert_eq!(loaded_rec.duration_secs, Some(42));
    }

    #[test]
    fn cancel_of_terminal_call_is_an_error() {
        let (reg, clock) = registry();
        let record = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&record.id, "CA900").unwrap();
        reg.update_status("CA900", CallStatus::Ringing, Some(ts(&clock, 1)), None, Map::new())
            .unwrap();
        reg.update_status("CA900", CallStatus::Busy, Some(ts(&clock, 2)), None, Map::new())
            .unwrap();
        assert!(matches!(
            reg.cancel(&record.id),
            Err(RegistryError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn list_filters_by_status() {
        let (reg, clock) = registry();
        let a = reg.create(new_call()).unwrap();
        let b = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&a.id, "CA1000").unwrap();
        reg.attach_provider_sid(&b.id, "CA1001").unwrap();
        reg.update_status("CA1000", CallStatus::Ringing, Some(ts(&clock, 1)), None, Map::new())
            .unwrap();

        let all = reg
            .list_by_credential("key-1", &CallFilter::default())
            .unwrap();
        assert_eq!(all.len(), 2);

        let ringing = reg
            .list_by_credential(
                "key-1",
                &CallFilter {
                    status: Some(CallStatus::Ringing),
                    limit: None,
                },
            )
            .unwrap();
        assert_eq!(ringing.len(), 1);
        assert_eq!(ringing[0].id, a.id);
    }

    #[test]
    fn counts_aggregate() {
        let (reg, clock) = registry();
        let a = reg.create(new_call()).unwrap();
        reg.attach_provider_sid(&a.id, "CA1100").unwrap();
        for (i, s) in [CallStatus::Ringing, CallStatus::Answered, CallStatus::Completed]
            .into_iter()
            .enumerate()
        {
            reg.update_status("CA1100", s, Some(ts(&clock, i as i64)), None, Map::new())
                .unwrap();
        }
        reg.create(new_call()).unwrap();

        let counts = reg.counts_for_credential("key-1").unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.in_flight, 1);
    }
}
