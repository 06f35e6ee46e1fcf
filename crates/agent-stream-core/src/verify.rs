//! Ordering-grammar enforcement for run-stream events.

use std::collections::HashSet;

use thiserror::Error;

use crate::event::Event;

/// Violation of the event ordering grammar.
///
/// Each variant names the rule broken and the offending kind/id, so a
/// failed run reports exactly why it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{kind} received before RUN_STARTED")]
    BeforeStart { kind: &'static str },
    #[error("{kind} received after the run's terminal event")]
    AfterTerminal { kind: &'static str },
    #[error("RUN_STARTED received while the run is already running")]
    DuplicateStart,
    #[error("TEXT_MESSAGE_START for message '{id}' which is already open")]
    MessageAlreadyOpen { id: String },
    #[error("{kind} for message '{id}' which is not open")]
    MessageNotOpen { kind: &'static str, id: String },
    #[error("TOOL_CALL_START for tool call '{id}' which is already open")]
    ToolCallAlreadyOpen { id: String },
    #[error("{kind} for tool call '{id}' which is not open")]
    ToolCallNotOpen { kind: &'static str, id: String },
    #[error("stream ended while the run was still active")]
    PrematureEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Running,
    Terminated,
}

/// Finite-state check over one run's event sequence.
///
/// `check` either accepts an event (pass-through: callers forward the
/// event unchanged, in order) or returns the single terminal violation
/// that ends the stream. One verifier per run; no state is shared
/// between runs.
#[derive(Debug)]
pub struct EventVerifier {
    phase: Phase,
    open_messages: HashSet<String>,
    open_tool_calls: HashSet<String>,
}

impl Default for EventVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventVerifier {
    /// Create a verifier in the not-started phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::NotStarted,
            open_messages: HashSet::new(),
            open_tool_calls: HashSet::new(),
        }
    }

    /// Whether the run has started and not yet reached its terminal event.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running)
    }

    /// Validate the next event in the sequence.
    ///
    /// # Errors
    /// Returns the violated rule; after an error the stream must end.
    pub fn check(&mut self, event: &Event) -> Result<(), VerifyError> {
        match self.phase {
            Phase::NotStarted if !matches!(event, Event::RunStarted { .. }) => {
                return Err(VerifyError::BeforeStart { kind: event.kind() });
            }
            Phase::Terminated => {
                return Err(VerifyError::AfterTerminal { kind: event.kind() });
            }
            Phase::NotStarted | Phase::Running => {}
        }

        match event {
            Event::RunStarted { .. } => {
                if self.phase == Phase::Running {
                    return Err(VerifyError::DuplicateStart);
                }
                self.phase = Phase::Running;
            }
            // Terminal events are accepted even with messages or tool
            // calls still open; whether the stream may end mid-run is
            // the pipeline's call, not a grammar rule.
            Event::RunFinished { .. } | Event::RunError { .. } => {
                self.phase = Phase::Terminated;
            }
            Event::TextMessageStart { message_id, .. } => {
                if !self.open_messages.insert(message_id.clone()) {
                    return Err(VerifyError::MessageAlreadyOpen {
                        id: message_id.clone(),
                    });
                }
            }
            Event::TextMessageContent { message_id, .. } => {
                if !self.open_messages.contains(message_id) {
                    return Err(VerifyError::MessageNotOpen {
                        kind: event.kind(),
                        id: message_id.clone(),
                    });
                }
            }
            Event::TextMessageEnd { message_id } => {
                if !self.open_messages.remove(message_id) {
                    return Err(VerifyError::MessageNotOpen {
                        kind: event.kind(),
                        id: message_id.clone(),
                    });
                }
            }
            Event::ToolCallStart { tool_call_id, .. } => {
                if !self.open_tool_calls.insert(tool_call_id.clone()) {
                    return Err(VerifyError::ToolCallAlreadyOpen {
                        id: tool_call_id.clone(),
                    });
                }
            }
            Event::ToolCallArgs { tool_call_id, .. } => {
                if !self.open_tool_calls.contains(tool_call_id) {
                    return Err(VerifyError::ToolCallNotOpen {
                        kind: event.kind(),
                        id: tool_call_id.clone(),
                    });
                }
            }
            Event::ToolCallEnd { tool_call_id } => {
                if !self.open_tool_calls.remove(tool_call_id) {
                    return Err(VerifyError::ToolCallNotOpen {
                        kind: event.kind(),
                        id: tool_call_id.clone(),
                    });
                }
            }
            // Legal whenever the run is active; the result references a
            // call that already ended, so there is no open-set check.
            Event::ToolCallResult { .. }
            | Event::StateSnapshot { .. }
            | Event::StateDelta { .. }
            | Event::MessagesSnapshot { .. }
            | Event::Custom { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn started() -> Event {
        Event::RunStarted {
            thread_id: "t1".into(),
            run_id: "r1".into(),
        }
    }

    fn finished() -> Event {
        Event::RunFinished {
            thread_id: "t1".into(),
            run_id: "r1".into(),
            result: None,
        }
    }

    fn msg_start(id: &str) -> Event {
        Event::TextMessageStart {
            message_id: id.into(),
            role: Role::Assistant,
        }
    }

    fn msg_content(id: &str, delta: &str) -> Event {
        Event::TextMessageContent {
            message_id: id.into(),
            delta: delta.into(),
        }
    }

    fn msg_end(id: &str) -> Event {
        Event::TextMessageEnd {
            message_id: id.into(),
        }
    }

    #[test]
    fn test_legal_sequence_passes_in_order() {
        let events = vec![
            started(),
            msg_start("m1"),
            msg_content("m1", "Hi"),
            msg_end("m1"),
            Event::StateSnapshot {
                snapshot: serde_json::json!({"done": true}),
            },
            finished(),
        ];

        let mut verifier = EventVerifier::new();
        let mut passed = Vec::new();
        for event in &events {
            verifier.check(event).unwrap();
            passed.push(event.clone());
        }
        assert_eq!(passed, events);
    }

    #[test]
    fn test_event_before_start_fails() {
        let mut verifier = EventVerifier::new();
        let err = verifier.check(&msg_start("m1")).unwrap_err();
        assert_eq!(
            err,
            VerifyError::BeforeStart {
                kind: "TEXT_MESSAGE_START"
            }
        );
    }

    #[test]
    fn test_event_after_terminal_fails() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        verifier.check(&finished()).unwrap();
        let err = verifier
            .check(&Event::Custom {
                name: "late".into(),
                value: serde_json::Value::Null,
            })
            .unwrap_err();
        assert_eq!(err, VerifyError::AfterTerminal { kind: "CUSTOM" });
    }

    #[test]
    fn test_duplicate_start_fails() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        assert_eq!(
            verifier.check(&started()).unwrap_err(),
            VerifyError::DuplicateStart
        );
    }

    #[test]
    fn test_content_without_open_message_fails() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        let err = verifier.check(&msg_content("m1", "Hi")).unwrap_err();
        assert_eq!(
            err,
            VerifyError::MessageNotOpen {
                kind: "TEXT_MESSAGE_CONTENT",
                id: "m1".into()
            }
        );
    }

    #[test]
    fn test_duplicate_open_message_fails() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        verifier.check(&msg_start("m1")).unwrap();
        let err = verifier.check(&msg_start("m1")).unwrap_err();
        assert_eq!(err, VerifyError::MessageAlreadyOpen { id: "m1".into() });
    }

    #[test]
    fn test_message_reopen_after_end_is_legal() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        verifier.check(&msg_start("m1")).unwrap();
        verifier.check(&msg_end("m1")).unwrap();
        verifier.check(&msg_start("m1")).unwrap();
    }

    #[test]
    fn test_tool_call_ids_are_their_own_space() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        verifier.check(&msg_start("x")).unwrap();
        // Same id as the open message is fine: separate id space.
        verifier
            .check(&Event::ToolCallStart {
                tool_call_id: "x".into(),
                tool_call_name: "search".into(),
                parent_message_id: None,
            })
            .unwrap();
        verifier
            .check(&Event::ToolCallArgs {
                tool_call_id: "x".into(),
                delta: "{}".into(),
            })
            .unwrap();
        verifier
            .check(&Event::ToolCallEnd {
                tool_call_id: "x".into(),
            })
            .unwrap();
    }

    #[test]
    fn test_tool_call_args_without_open_call_fails() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        let err = verifier
            .check(&Event::ToolCallArgs {
                tool_call_id: "c1".into(),
                delta: "{".into(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            VerifyError::ToolCallNotOpen {
                kind: "TOOL_CALL_ARGS",
                id: "c1".into()
            }
        );
    }

    #[test]
    fn test_state_events_require_running() {
        let mut verifier = EventVerifier::new();
        let err = verifier
            .check(&Event::StateSnapshot {
                snapshot: serde_json::json!({}),
            })
            .unwrap_err();
        assert_eq!(
            err,
            VerifyError::BeforeStart {
                kind: "STATE_SNAPSHOT"
            }
        );
    }

    #[test]
    fn test_run_error_is_accepted_as_terminal() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        verifier
            .check(&Event::RunError {
                message: "boom".into(),
                code: None,
            })
            .unwrap();
        assert!(!verifier.is_running());
        assert_eq!(
            verifier.check(&finished()).unwrap_err(),
            VerifyError::AfterTerminal {
                kind: "RUN_FINISHED"
            }
        );
    }

    #[test]
    fn test_terminal_with_open_message_is_accepted() {
        let mut verifier = EventVerifier::new();
        verifier.check(&started()).unwrap();
        verifier.check(&msg_start("m1")).unwrap();
        verifier.check(&finished()).unwrap();
    }
}
