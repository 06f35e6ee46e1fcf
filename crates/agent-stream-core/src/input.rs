//! Immutable per-invocation run input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

/// A tool the agent may call during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: Value,
}

/// A piece of caller-supplied context forwarded to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub description: String,
    pub value: String,
}

/// Snapshot of everything one invocation needs, taken once at run start.
///
/// Every field is deep-copied from the owning agent and the caller's
/// parameters, so later mutation on either side cannot alias into an
/// in-flight run. Read-only after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInput {
    pub thread_id: String,
    /// Unique per invocation.
    pub run_id: String,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub context: Vec<Context>,
    #[serde(default)]
    pub forwarded_props: Value,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn test_wire_field_names() {
        let input = RunInput {
            thread_id: "t1".into(),
            run_id: "r1".into(),
            tools: Vec::new(),
            context: Vec::new(),
            forwarded_props: Value::Null,
            state: serde_json::json!({}),
            messages: vec![Message::new("m1", Role::User)],
        };
        let json = serde_json::to_string(&input).unwrap();
        assert!(json.contains(r#""threadId":"t1""#));
        assert!(json.contains(r#""runId":"r1""#));
        assert!(json.contains(r#""forwardedProps""#));
    }

    #[test]
    fn test_clone_is_deep() {
        let mut original = RunInput {
            thread_id: "t1".into(),
            run_id: "r1".into(),
            tools: Vec::new(),
            context: Vec::new(),
            forwarded_props: Value::Null,
            state: serde_json::json!({"count": 1}),
            messages: vec![Message::new("m1", Role::User)],
        };
        let snapshot = original.clone();

        original.state = serde_json::json!({"count": 99});
        original.messages[0].content.push_str("mutated");

        assert_eq!(snapshot.state, serde_json::json!({"count": 1}));
        assert_eq!(snapshot.messages[0].content, "");
    }
}
