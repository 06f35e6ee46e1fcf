//! Folding verified events into caller-visible state snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::Event;
use crate::input::RunInput;
use crate::message::{Message, Role, ToolCall};

/// Caller-visible projection of a run: one snapshot per accepted event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

/// Reducer failure; terminal for the run.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("incremental update targets unknown message '{0}'")]
    UnknownMessage(String),
    #[error("incremental update targets unknown tool call '{0}'")]
    UnknownToolCall(String),
    #[error("state patch failed: {0}")]
    Patch(#[from] json_patch::PatchError),
}

/// Folds verified events into `AgentState` snapshots.
///
/// Any implementation honoring "verified events in, snapshots out, in
/// the same order" is a valid substitute for the default, which is how
/// domain-specific state derivations plug in.
pub trait Reducer: Send {
    /// Apply one verified event and return the resulting snapshot.
    ///
    /// # Errors
    /// A reducer error terminates the run.
    fn apply(&mut self, event: &Event) -> Result<AgentState, ReduceError>;
}

/// Default reducer: materializes the conversation and application state
/// exactly as the event stream describes them.
#[derive(Debug)]
pub struct DefaultReducer {
    messages: Vec<Message>,
    state: Value,
}

impl DefaultReducer {
    /// Seed working copies from the run's input snapshot.
    #[must_use]
    pub fn new(input: &RunInput) -> Self {
        Self {
            messages: input.messages.clone(),
            state: input.state.clone(),
        }
    }

    fn snapshot(&self) -> AgentState {
        AgentState {
            messages: Some(self.messages.clone()),
            state: Some(self.state.clone()),
        }
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCall> {
        self.messages
            .iter_mut()
            .rev()
            .flat_map(|m| m.tool_calls.iter_mut())
            .find(|c| c.id == id)
    }
}

impl Reducer for DefaultReducer {
    fn apply(&mut self, event: &Event) -> Result<AgentState, ReduceError> {
        match event {
            Event::TextMessageStart { message_id, role } => {
                self.messages.push(Message::new(message_id.clone(), *role));
            }
            Event::TextMessageContent { message_id, delta } => {
                self.message_mut(message_id)
                    .ok_or_else(|| ReduceError::UnknownMessage(message_id.clone()))?
                    .content
                    .push_str(delta);
            }
            Event::ToolCallStart {
                tool_call_id,
                tool_call_name,
                parent_message_id,
            } => {
                let call = ToolCall {
                    id: tool_call_id.clone(),
                    name: tool_call_name.clone(),
                    arguments: String::new(),
                };
                let parent = parent_message_id
                    .as_deref()
                    .and_then(|id| self.messages.iter().rposition(|m| m.id == id));
                match parent {
                    Some(index) => self.messages[index].tool_calls.push(call),
                    None => {
                        // No parent in the conversation: the call gets a
                        // fresh assistant message to hang off.
                        let id = parent_message_id
                            .clone()
                            .unwrap_or_else(|| tool_call_id.clone());
                        let mut message = Message::new(id, Role::Assistant);
                        message.tool_calls.push(call);
                        self.messages.push(message);
                    }
                }
            }
            Event::ToolCallArgs {
                tool_call_id,
                delta,
            } => {
                self.tool_call_mut(tool_call_id)
                    .ok_or_else(|| ReduceError::UnknownToolCall(tool_call_id.clone()))?
                    .arguments
                    .push_str(delta);
            }
            Event::ToolCallResult {
                message_id,
                tool_call_id,
                content,
            } => {
                let mut message = Message::new(message_id.clone(), Role::Tool);
                message.content = content.clone();
                message.tool_call_id = Some(tool_call_id.clone());
                self.messages.push(message);
            }
            Event::StateSnapshot { snapshot } => {
                self.state = snapshot.clone();
            }
            Event::StateDelta { delta } => {
                json_patch::patch(&mut self.state, delta)?;
            }
            Event::MessagesSnapshot { messages } => {
                self.messages = messages.clone();
            }
            // Open/close bookkeeping lives in the verifier; lifecycle
            // and passthrough events leave the working copies alone.
            Event::RunStarted { .. }
            | Event::RunFinished { .. }
            | Event::RunError { .. }
            | Event::TextMessageEnd { .. }
            | Event::ToolCallEnd { .. }
            | Event::Custom { .. } => {}
        }

        Ok(self.snapshot())
    }
}
