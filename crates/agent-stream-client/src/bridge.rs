//! Seam for bridging verified events to a legacy wire protocol.

use agent_stream_core::Event;
use serde_json::Value;

/// Identifiers accompanying every bridged event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentifiers {
    pub agent_id: String,
    pub thread_id: String,
    pub run_id: String,
}

/// Converts verified events into an older external wire representation.
///
/// The encoder is an external collaborator: the shape of its output is
/// entirely its own. The orchestrator's obligation is to feed it every
/// verified event, in order, together with the run's identifiers. One
/// event may expand to any number of legacy frames.
pub trait LegacyEncoder: Send + Sync {
    fn encode(&self, event: &Event, ids: &RunIdentifiers) -> Vec<Value>;
}
