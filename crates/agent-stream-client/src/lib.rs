//! Run orchestration for agent streams.
//!
//! The `Agent` is the single public entry point: it owns identity and
//! persisted conversation state, builds the immutable `RunInput` for
//! each invocation, and composes Transport → Decoder → Verifier →
//! Reducer into one cold, cancellable pipeline.

pub mod agent;
pub mod bridge;
mod pipeline;

pub use agent::{
    Agent, AgentConfig, AgentError, AgentStateStream, ErrorHook, EventStream, FinalizeHook,
    ReducerFactory, RunAgentParams,
};
pub use bridge::{LegacyEncoder, RunIdentifiers};
