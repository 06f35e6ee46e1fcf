//! Typed run-stream events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, Role};

/// One typed record in a run's event stream.
///
/// Closed union: every kind the wire can carry is a variant here, and
/// the verifier and reducer match exhaustively. Discriminated on the
/// wire by a SCREAMING_SNAKE_CASE `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// Run started; first legal event of every stream.
    RunStarted {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },

    /// Run completed successfully. Terminal.
    RunFinished {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    /// Run failed on the agent side. Terminal.
    RunError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Opens a streaming text message.
    TextMessageStart {
        #[serde(rename = "messageId")]
        message_id: String,
        role: Role,
    },

    /// Incremental content for an open text message.
    TextMessageContent {
        #[serde(rename = "messageId")]
        message_id: String,
        delta: String,
    },

    /// Closes an open text message.
    TextMessageEnd {
        #[serde(rename = "messageId")]
        message_id: String,
    },

    /// Opens a streaming tool call.
    ToolCallStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolCallName")]
        tool_call_name: String,
        #[serde(rename = "parentMessageId", skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },

    /// Incremental argument text for an open tool call.
    ToolCallArgs {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        delta: String,
    },

    /// Closes an open tool call.
    ToolCallEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },

    /// Result of a completed tool call, delivered as a tool message.
    ToolCallResult {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        content: String,
    },

    /// Wholesale replacement of the run's application state.
    StateSnapshot { snapshot: Value },

    /// RFC 6902 patch against the run's application state.
    StateDelta { delta: json_patch::Patch },

    /// Wholesale replacement of the conversation messages.
    MessagesSnapshot { messages: Vec<Message> },

    /// Application-defined event; validated for placement, otherwise opaque.
    Custom { name: String, value: Value },
}

impl Event {
    /// Wire discriminant of this event, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Self::StateDelta { .. } => "STATE_DELTA",
            Self::MessagesSnapshot { .. } => "MESSAGES_SNAPSHOT",
            Self::Custom { .. } => "CUSTOM",
        }
    }

    /// Whether this event ends the run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags() {
        let event = Event::TextMessageContent {
            message_id: "m1".into(),
            delta: "Hi".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"TEXT_MESSAGE_CONTENT""#));
        assert!(json.contains(r#""messageId":"m1""#));
    }

    #[test]
    fn test_parse_run_started() {
        let event: Event =
            serde_json::from_str(r#"{"type":"RUN_STARTED","threadId":"t1","runId":"r1"}"#).unwrap();
        assert_eq!(
            event,
            Event::RunStarted {
                thread_id: "t1".into(),
                run_id: "r1".into(),
            }
        );
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_parse_state_delta() {
        let event: Event = serde_json::from_str(
            r#"{"type":"STATE_DELTA","delta":[{"op":"replace","path":"/count","value":2}]}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), "STATE_DELTA");
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let result = serde_json::from_str::<Event>(r#"{"type":"NOT_A_THING"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_terminal_kinds() {
        let finished: Event = serde_json::from_str(
            r#"{"type":"RUN_FINISHED","threadId":"t1","runId":"r1"}"#,
        )
        .unwrap();
        let error: Event =
            serde_json::from_str(r#"{"type":"RUN_ERROR","message":"boom"}"#).unwrap();
        assert!(finished.is_terminal());
        assert!(error.is_terminal());
    }
}
