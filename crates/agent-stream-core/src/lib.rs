//! Core protocol types for agent run streams.
//!
//! This crate provides the fundamental building blocks:
//! - `Event` - Typed run-stream event enum
//! - `Message` / `Role` / `ToolCall` - Conversation types
//! - `RunInput` - Immutable per-invocation snapshot
//! - `EventVerifier` - Ordering-grammar enforcement
//! - `Reducer` / `DefaultReducer` - Event folding into `AgentState`

pub mod event;
pub mod input;
pub mod message;
pub mod reduce;
pub mod verify;

pub use event::Event;
pub use input::{Context, RunInput, Tool};
pub use message::{Message, Role, ToolCall};
pub use reduce::{AgentState, DefaultReducer, ReduceError, Reducer};
pub use verify::{EventVerifier, VerifyError};
