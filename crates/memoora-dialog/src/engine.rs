use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use memoora_core::clock::Clock;

use crate::error::{DialogError, Result};
use crate::flow::ConversationFlow;
use crate::types::{
    Answer, ConversationSnapshot, ConversationState, DialogPhase, NextAction, NextPointer,
    Question, TurnAnalysis,
};

const DEFAULT_RETRY_FEEDBACK: &str =
    "I'm sorry, I didn't quite catch that. Could you say it again?";

/// Holds one `ConversationState` per live interactive call and decides turn
/// transitions. One lock per conversation, held only across the critical
/// read-modify-write; the prompt handler gets point-in-time snapshots.
///
/// Exactly one engine exists per process, owned by the gateway state.
pub struct DialogEngine {
    flow: Arc<ConversationFlow>,
    states: DashMap<String, Arc<Mutex<ConversationState>>>,
    clock: Arc<dyn Clock>,
    max_call_secs: u32,
}

impl DialogEngine {
    pub fn new(flow: Arc<ConversationFlow>, clock: Arc<dyn Clock>, max_call_secs: u32) -> Self {
        Self {
            flow,
            states: DashMap::new(),
            clock,
            max_call_secs,
        }
    }

    pub fn flow(&self) -> &ConversationFlow {
        &self.flow
    }

    /// Initialise state at the flow's first question. Idempotent: a second
    /// begin for a live call returns the existing current question.
    pub fn begin(&self, call_id: &str) -> Question {
        if let Some(entry) = self.states.get(call_id) {
            let state = entry.lock().unwrap();
            if let Some(q) = self.flow.get(&state.current_question_id) {
                return q.clone();
            }
        }

        let first = self.flow.first().clone();
        let now = self.clock.now();
        self.states.insert(
            call_id.to_string(),
            Arc::new(Mutex::new(ConversationState {
                call_id: call_id.to_string(),
                current_question_id: first.id.clone(),
                answers: Vec::new(),
                context: HashMap::new(),
                phase: DialogPhase::Asking,
                started_at: now,
                updated_at: now,
            })),
        );
        info!(call_id, first = %first.id, "conversation started");
        first
    }

    /// Point-in-time view for the prompt handler. Never mutates.
    pub fn current(&self, call_id: &str) -> Result<ConversationSnapshot> {
        let entry = self
            .states
            .get(call_id)
            .ok_or_else(|| DialogError::UnknownCall(call_id.to_string()))?;
        let state = entry.lock().unwrap();
        let question = self
            .flow
            .get(&state.current_question_id)
            .ok_or_else(|| DialogError::UnknownQuestion(state.current_question_id.clone()))?;
        Ok(ConversationSnapshot {
            phase: state.phase.clone(),
            question_id: question.id.clone(),
            rendered_prompt: self.flow.render_prompt(question, &state.context),
        })
    }

    /// Mark that a recording callback is in flight so the prompt handler
    /// can hold its next response until the decision lands.
    pub fn mark_awaiting_turn(&self, call_id: &str) -> Result<()> {
        let entry = self
            .states
            .get(call_id)
            .ok_or_else(|| DialogError::UnknownCall(call_id.to_string()))?;
        let mut state = entry.lock().unwrap();
        state.phase = DialogPhase::AwaitingTurn;
        state.updated_at = self.clock.now();
        Ok(())
    }

    /// Append an answer; re-answering the same question (after a retry)
    /// replaces the earlier entry, so the answered set only grows.
    pub fn record_answer(
        &self,
        call_id: &str,
        question_id: &str,
        raw_transcript: &str,
        normalized: &str,
    ) -> Result<()> {
        let question = self
            .flow
            .get(question_id)
            .ok_or_else(|| DialogError::UnknownQuestion(question_id.to_string()))?;

        let entry = self
            .states
            .get(call_id)
            .ok_or_else(|| DialogError::UnknownCall(call_id.to_string()))?;
        let mut state = entry.lock().unwrap();

        let now = self.clock.now();
        let answer = Answer {
            question_id: question_id.to_string(),
            raw_transcript: raw_transcript.to_string(),
            normalized: normalized.to_string(),
            recorded_at: now,
        };
        match state
            .answers
            .iter()
            .position(|a| a.question_id == question_id)
        {
            Some(i) => state.answers[i] = answer,
            None => state.answers.push(answer),
        }

        if let Some(key) = &question.context_key {
            let key = key.clone();
            state.context.insert(key, normalized.trim().to_string());
        }
        state.updated_at = now;
        debug!(call_id, question_id, "answer recorded");
        Ok(())
    }

    /// Map an analysis verdict onto the next action and commit it to the
    /// conversation state in one critical section.
    pub fn decide(&self, call_id: &str, analysis: &TurnAnalysis) -> Result<NextAction> {
        let entry = self
            .states
            .get(call_id)
            .ok_or_else(|| DialogError::UnknownCall(call_id.to_string()))?;
        let mut state = entry.lock().unwrap();

        let current = self
            .flow
            .get(&state.current_question_id)
            .ok_or_else(|| DialogError::UnknownQuestion(state.current_question_id.clone()))?
            .clone();

        let mechanical_ok = state
            .answers
            .iter()
            .find(|a| a.question_id == current.id)
            .map(|a| current.validation.check(&a.normalized))
            .unwrap_or(false);

        let action = if !analysis.valid || !mechanical_ok {
            if !analysis.should_proceed || !mechanical_ok {
                let feedback = analysis
                    .feedback
                    .clone()
                    .unwrap_or_else(|| DEFAULT_RETRY_FEEDBACK.to_string());
                NextAction::Retry(feedback)
            } else {
                // Reasoning wants to move on despite doubts; honor it.
                self.resolve_continue(&current, &state, analysis)
            }
        } else if !analysis.should_proceed {
            let feedback = analysis
                .feedback
                .clone()
                .unwrap_or_else(|| DEFAULT_RETRY_FEEDBACK.to_string());
            NextAction::Retry(feedback)
        } else {
            self.resolve_continue(&current, &state, analysis)
        };

        match &action {
            NextAction::ContinueWith(q) => {
                state.current_question_id = q.id.clone();
                state.phase = DialogPhase::Asking;
            }
            NextAction::Retry(feedback) => {
                state.phase = DialogPhase::Retrying(feedback.clone());
            }
            NextAction::Close(text) => {
                state.phase = DialogPhase::Closing(text.clone());
            }
        }
        state.updated_at = self.clock.now();
        info!(call_id, action = action_name(&action), "turn decided");
        Ok(action)
    }

    /// Re-ask the current question with a spoken clarification. Used by the
    /// turn processor when recognition failed and no answer was recorded.
    pub fn request_retry(&self, call_id: &str, feedback: &str) -> Result<()> {
        let entry = self
            .states
            .get(call_id)
            .ok_or_else(|| DialogError::UnknownCall(call_id.to_string()))?;
        let mut state = entry.lock().unwrap();
        state.phase = DialogPhase::Retrying(feedback.to_string());
        state.updated_at = self.clock.now();
        Ok(())
    }

    /// Close the conversation unconditionally with the standard farewell.
    /// Used by the degradation path when recognition and reasoning both
    /// keep failing.
    pub fn force_close(&self, call_id: &str) -> Result<NextAction> {
        let entry = self
            .states
            .get(call_id)
            .ok_or_else(|| DialogError::UnknownCall(call_id.to_string()))?;
        let mut state = entry.lock().unwrap();
        let text = self
            .flow
            .render_prompt(self.flow.closing(), &state.context);
        state.phase = DialogPhase::Closing(text.clone());
        state.updated_at = self.clock.now();
        Ok(NextAction::Close(text))
    }

    /// Ordered question-id -> answer map for the completed conversation.
    pub fn summary(&self, call_id: &str) -> Result<Vec<Answer>> {
        let entry = self
            .states
            .get(call_id)
            .ok_or_else(|| DialogError::UnknownCall(call_id.to_string()))?;
        let state = entry.lock().unwrap();
        Ok(state.answers.clone())
    }

    /// Compact textual context for the reasoning prompt.
    pub fn context_summary(&self, call_id: &str) -> Result<String> {
        let entry = self
            .states
            .get(call_id)
            .ok_or_else(|| DialogError::UnknownCall(call_id.to_string()))?;
        let state = entry.lock().unwrap();
        let mut parts: Vec<String> = state
            .context
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        parts.sort();
        Ok(parts.join("; "))
    }

    /// Discard state at end of call.
    pub fn end(&self, call_id: &str) {
        if self.states.remove(call_id).is_some() {
            debug!(call_id, "conversation state discarded");
        }
    }

    /// Drop conversations idle past the TTL. Returns how many were removed.
    pub fn sweep_idle(&self, ttl: chrono::Duration) -> usize {
        let cutoff = self.clock.now() - ttl;
        let stale: Vec<String> = self
            .states
            .iter()
            .filter(|entry| entry.value().lock().unwrap().updated_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for call_id in &stale {
            warn!(call_id = %call_id, "discarding idle conversation");
            self.states.remove(call_id);
        }
        stale.len()
    }

    pub fn live_conversations(&self) -> usize {
        self.states.len()
    }

    // --- private helpers ---------------------------------------------------

    /// Resolve the next question when the turn moves forward: the
    /// reasoning client's explicit choice first, then the current
    /// question's static pointer, then dynamic scoring.
    fn resolve_continue(
        &self,
        current: &Question,
        state: &ConversationState,
        analysis: &TurnAnalysis,
    ) -> NextAction {
        if let Some(next_id) = &analysis.next_question_id {
            if let Some(q) = self.flow.get(next_id) {
                if self.flow.is_closing(&q.id) {
                    return self.close_action(state);
                }
                return NextAction::ContinueWith(q.clone());
            }
            warn!(next_id = %next_id, "reasoning chose unknown question; using flow pointer");
        }

        match &current.next {
            NextPointer::Static(id) => match self.flow.get(id) {
                Some(q) if self.flow.is_closing(&q.id) => self.close_action(state),
                Some(q) => NextAction::ContinueWith(q.clone()),
                None => self.close_action(state),
            },
            NextPointer::End => self.close_action(state),
            NextPointer::Dynamic => {
                let elapsed = (self.clock.now() - state.started_at).num_seconds();
                let remaining = i64::from(self.max_call_secs) - elapsed;
                match self.flow.select_dynamic(state, remaining) {
                    Some(q) => NextAction::ContinueWith(q.clone()),
                    None => self.close_action(state),
                }
            }
        }
    }

    fn close_action(&self, state: &ConversationState) -> NextAction {
        NextAction::Close(self.flow.render_prompt(self.flow.closing(), &state.context))
    }
}

fn action_name(action: &NextAction) -> &'static str {
    match action {
        NextAction::ContinueWith(_) => "continue",
        NextAction::Retry(_) => "retry",
        NextAction::Close(_) => "close",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use memoora_core::clock::ManualClock;

    const FLOW_TOML: &str = r#"
[flow]
first = "q1"
closing = "closing"

[[questions]]
id = "q1"
prompt = "Hello! What is your first name?"
kind = "free-text"
validation = "non-empty"
context_key = "name"
next = "q2"

[[questions]]
id = "q2"
prompt = "How old are you?"
kind = "free-text"
validation = { integer-in-range = { min = 1, max = 120 } }
context_key = "age"
next = "dynamic"

[[questions]]
id = "q3"
prompt = "{{name}}, tell me a favorite story from your childhood."
kind = "free-text"
next = "dynamic"

[[questions]]
id = "closing"
prompt = "Thank you so much for sharing, {{name}}. Goodbye!"
kind = "free-text"
next = "end"
"#;

    fn engine() -> (DialogEngine, Arc<ManualClock>) {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap());
        let flow = Arc::new(ConversationFlow::from_toml_str(FLOW_TOML).unwrap());
        (DialogEngine::new(flow, clock.clone(), 300), clock)
    }

    fn proceed_to(next: &str) -> TurnAnalysis {
        TurnAnalysis {
            valid: true,
            summary: Some("fine".into()),
            should_proceed: true,
            next_question_id: Some(next.to_string()),
            feedback: None,
        }
    }

    #[test]
    fn begin_is_idempotent() {
        let (engine, _) = engine();
        assert_eq!(engine.begin("CA1").id, "q1");
        engine
            .record_answer("CA1", "q1", "My name is Ada", "Ada")
            .unwrap();
        engine.decide("CA1", &proceed_to("q2")).unwrap();
        // A repeated begin must not reset the conversation.
        assert_eq!(engine.begin("CA1").id, "q2");
    }

    #[test]
    fn reasoning_choice_skips_static_pointer() {
        let (engine, _) = engine();
        engine.begin("CA1");
        engine
            .record_answer("CA1", "q1", "My name is Ada", "Ada")
            .unwrap();

        // q1's static pointer is q2, but the reasoning client picks q3.
        let action = engine.decide("CA1", &proceed_to("q3")).unwrap();
        match action {
            NextAction::ContinueWith(q) => assert_eq!(q.id, "q3"),
            other => panic!("expected continue, got {other:?}"),
        }

        // The answered set is exactly {q1}, and the next prompt resolves
        // the {{name}} slot.
        let snapshot = engine.current("CA1").unwrap();
        assert_eq!(snapshot.question_id, "q3");
        assert_eq!(
            snapshot.rendered_prompt,
            "Ada, tell me a favorite story from your childhood."
        );
        let answered: Vec<String> = engine
            .summary("CA1")
            .unwrap()
            .into_iter()
            .map(|a| a.question_id)
            .collect();
        assert_eq!(answered, vec!["q1".to_string()]);
    }

    #[test]
    fn invalid_answer_retries_with_feedback() {
        let (engine, _) = engine();
        engine.begin("CA1");
        engine.record_answer("CA1", "q1", "...", "").unwrap();

        let analysis = TurnAnalysis {
            valid: false,
            summary: None,
            should_proceed: false,
            next_question_id: None,
            feedback: Some("Could you tell me just your first name?".into()),
        };
        let action = engine.decide("CA1", &analysis).unwrap();
        assert_eq!(
            action,
            NextAction::Retry("Could you tell me just your first name?".into())
        );
        assert!(matches!(
            engine.current("CA1").unwrap().phase,
            DialogPhase::Retrying(_)
        ));
    }

    #[test]
    fn mechanical_validation_overrides_reasoning() {
        let (engine, _) = engine();
        engine.begin("CA1");
        engine
            .record_answer("CA1", "q1", "My name is Ada", "Ada")
            .unwrap();
        engine.decide("CA1", &proceed_to("q2")).unwrap();

        // q2 requires an integer in range; "three hundred" normalizes badly.
        engine
            .record_answer("CA1", "q2", "three hundred", "300")
            .unwrap();
        let action = engine
            .decide("CA1", &TurnAnalysis::static_fallback())
            .unwrap();
        assert!(matches!(action, NextAction::Retry(_)));
    }

    #[test]
    fn reasoning_pick_of_closing_closes_with_context() {
        let (engine, _) = engine();
        engine.begin("CA1");
        engine
            .record_answer("CA1", "q1", "My name is Ada", "Ada")
            .unwrap();
        let action = engine.decide("CA1", &proceed_to("closing")).unwrap();
        assert_eq!(
            action,
            NextAction::Close("Thank you so much for sharing, Ada. Goodbye!".into())
        );
    }

    #[test]
    fn static_fallback_follows_pointer_then_dynamic() {
        let (engine, _) = engine();
        engine.begin("CA1");
        engine
            .record_answer("CA1", "q1", "My name is Ada", "Ada")
            .unwrap();
        // No explicit next from reasoning; q1's pointer goes to q2.
        let action = engine
            .decide("CA1", &TurnAnalysis::static_fallback())
            .unwrap();
        match action {
            NextAction::ContinueWith(q) => assert_eq!(q.id, "q2"),
            other => panic!("expected q2, got {other:?}"),
        }

        engine.record_answer("CA1", "q2", "forty two", "42").unwrap();
        // q2 is dynamic; the scorer picks q3 (context-rich free text).
        let action = engine
            .decide("CA1", &TurnAnalysis::static_fallback())
            .unwrap();
        match action {
            NextAction::ContinueWith(q) => assert_eq!(q.id, "q3"),
            other => panic!("expected q3, got {other:?}"),
        }
    }

    #[test]
    fn exhausted_flow_closes() {
        let (engine, _) = engine();
        engine.begin("CA1");
        let mut closed = false;
        for (qid, answer) in [("q1", "Ada"), ("q2", "42"), ("q3", "A story")] {
            engine.record_answer("CA1", qid, answer, answer).unwrap();
            let action = engine
                .decide("CA1", &TurnAnalysis::static_fallback())
                .unwrap();
            if qid == "q3" {
                assert!(matches!(action, NextAction::Close(_)));
                closed = true;
            } else {
                assert!(matches!(action, NextAction::ContinueWith(_)));
            }
        }
        assert!(closed);
    }

    #[test]
    fn answered_set_grows_monotonically_within_flow() {
        let (engine, _) = engine();
        engine.begin("CA1");
        engine.record_answer("CA1", "q1", "Ada", "Ada").unwrap();
        engine.record_answer("CA1", "q1", "Ada Lovelace", "Ada Lovelace").unwrap();

        let summary = engine.summary("CA1").unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].normalized, "Ada Lovelace");
        // Every answered id belongs to the flow.
        let flow_ids: Vec<&str> = engine.flow().question_ids().collect();
        for answer in &summary {
            assert!(flow_ids.contains(&answer.question_id.as_str()));
        }
    }

    #[test]
    fn unknown_call_is_an_error() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.current("CA-nope"),
            Err(DialogError::UnknownCall(_))
        ));
    }

    #[test]
    fn idle_conversations_are_swept() {
        let (engine, clock) = engine();
        engine.begin("CA1");
        engine.begin("CA2");
        clock.advance(chrono::Duration::hours(25));
        engine.begin("CA3");
        assert_eq!(engine.sweep_idle(chrono::Duration::hours(24)), 2);
        assert_eq!(engine.live_conversations(), 1);
        assert!(engine.current("CA3").is_ok());
    }

    #[test]
    fn force_close_renders_farewell() {
        let (engine, _) = engine();
        engine.begin("CA1");
        engine.record_answer("CA1", "q1", "Ada", "Ada").unwrap();
        let action = engine.force_close("CA1").unwrap();
        assert_eq!(
            action,
            NextAction::Close("Thank you so much for sharing, Ada. Goodbye!".into())
        );
    }
}
