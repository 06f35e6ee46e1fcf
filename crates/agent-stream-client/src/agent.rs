//! The run orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use agent_stream_core::{
    AgentState, Context, DefaultReducer, Event, Message, ReduceError, Reducer, RunInput, Tool,
    VerifyError,
};
use agent_stream_transport::{DecodeError, HttpTransport, StreamRequest, StreamTransport, TransportError};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bridge::{LegacyEncoder, RunIdentifiers};
use crate::pipeline;

/// Any failure a run can surface to its subscriber.
///
/// Every variant is terminal; retrying a whole invocation is the
/// caller's decision. Cancellation is not represented here because it
/// is not an error.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("decode failure: {0}")]
    Decode(#[from] DecodeError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] VerifyError),
    #[error("reducer failure: {0}")]
    Reduce(#[from] ReduceError),
    #[error("agent reported failure: {message}")]
    Run {
        message: String,
        code: Option<String>,
    },
}

/// Builds a reducer bound to one run's input.
pub type ReducerFactory = Arc<dyn Fn(&RunInput) -> Box<dyn Reducer> + Send + Sync>;
/// Observes a run failure before it is re-raised to the subscriber.
pub type ErrorHook = Arc<dyn Fn(&AgentError) + Send + Sync>;
/// Runs exactly once when a consumed run terminates, however it ends.
pub type FinalizeHook = Arc<dyn Fn() + Send + Sync>;

/// Snapshot stream returned by [`Agent::run_agent`].
pub type AgentStateStream = BoxStream<'static, Result<AgentState, AgentError>>;
/// Verified event stream returned by [`Agent::run`].
pub type EventStream = BoxStream<'static, Result<Event, AgentError>>;

/// Construction parameters for an [`Agent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Endpoint the agent process is reachable at.
    pub url: String,
    /// Caller headers sent on every run request.
    pub headers: HashMap<String, String>,
    /// Stable identity; generated on first run when absent.
    pub agent_id: Option<String>,
    /// Conversation identity; generated at construction when absent.
    pub thread_id: Option<String>,
    pub initial_messages: Vec<Message>,
    pub initial_state: Value,
}

impl AgentConfig {
    /// Config with defaults for everything but the endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            agent_id: None,
            thread_id: None,
            initial_messages: Vec::new(),
            initial_state: Value::Null,
        }
    }
}

/// Per-invocation parameters for [`Agent::run_agent`].
#[derive(Debug, Clone, Default)]
pub struct RunAgentParams {
    /// Run identity; generated when absent.
    pub run_id: Option<String>,
    pub tools: Vec<Tool>,
    pub context: Vec<Context>,
    pub forwarded_props: Option<Value>,
}

#[derive(Debug, Clone)]
struct Persisted {
    messages: Vec<Message>,
    state: Value,
}

struct ActiveRun {
    run_id: String,
    cancel: CancellationToken,
}

/// Drives runs against one remote agent and owns its persisted
/// conversation state between runs.
///
/// Concurrent runs on the same instance are permitted but share the
/// persisted fields only at invocation start (each run clones them into
/// its `RunInput`); callers needing stronger guarantees synchronize
/// themselves.
pub struct Agent {
    agent_id: OnceLock<String>,
    thread_id: String,
    url: String,
    headers: HashMap<String, String>,
    persisted: Arc<RwLock<Persisted>>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    transport: Arc<dyn StreamTransport>,
    reducer_factory: ReducerFactory,
    on_error: Option<ErrorHook>,
    on_finalize: Option<FinalizeHook>,
}

impl Agent {
    /// Create an agent speaking HTTP to `config.url`.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    /// Create an agent over a caller-supplied transport.
    #[must_use]
    pub fn with_transport(config: AgentConfig, transport: Arc<dyn StreamTransport>) -> Self {
        let agent_id = OnceLock::new();
        if let Some(id) = config.agent_id {
            let _ = agent_id.set(id);
        }
        Self {
            agent_id,
            thread_id: config
                .thread_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            url: config.url,
            headers: config.headers,
            persisted: Arc::new(RwLock::new(Persisted {
                messages: config.initial_messages,
                state: config.initial_state,
            })),
            active: Arc::new(Mutex::new(None)),
            transport,
            reducer_factory: Arc::new(|input| Box::new(DefaultReducer::new(input))),
            on_error: None,
            on_finalize: None,
        }
    }

    /// Substitute the reducer built for each run.
    #[must_use]
    pub fn with_reducer(mut self, factory: ReducerFactory) -> Self {
        self.reducer_factory = factory;
        self
    }

    /// Hook invoked once per failed run, before the error reaches the
    /// subscriber.
    #[must_use]
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Hook invoked exactly once per consumed run, on success, failure
    /// or cancellation.
    #[must_use]
    pub fn with_finalize_hook(mut self, hook: FinalizeHook) -> Self {
        self.on_finalize = Some(hook);
        self
    }

    /// Stable identity, if assigned yet.
    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.get().map(String::as_str)
    }

    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Copy of the persisted conversation.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.persisted.read().unwrap().messages.clone()
    }

    /// Copy of the persisted application state.
    #[must_use]
    pub fn state(&self) -> Value {
        self.persisted.read().unwrap().state.clone()
    }

    /// Lazy run producer: the verified event stream for `input`,
    /// without reduction. Nothing connects until the first poll.
    #[must_use]
    pub fn run(&self, input: &RunInput, cancel: CancellationToken) -> EventStream {
        let mut request = StreamRequest::post(
            self.url.clone(),
            serde_json::to_value(input).unwrap(),
        );
        request.headers = self.headers.clone();
        pipeline::event_stream(Arc::clone(&self.transport), request, cancel)
    }

    /// Run the agent and observe one `AgentState` snapshot per event.
    ///
    /// Composes the full pipeline bound to a fresh immutable `RunInput`
    /// and registers the run's cancellation token as the active run.
    /// On success (`RUN_FINISHED` observed) the final snapshot becomes
    /// the agent's persisted messages/state.
    pub fn run_agent(&self, params: Option<RunAgentParams>) -> AgentStateStream {
        let params = params.unwrap_or_default();
        self.ensure_agent_id();
        let input = self.prepare_input(&params);
        let cancel = CancellationToken::new();
        self.register_active(&input.run_id, &cancel);

        let mut reducer = (self.reducer_factory)(&input);
        let events = self.run(&input, cancel);
        let guard = RunGuard {
            run_id: input.run_id,
            active: Arc::clone(&self.active),
            on_finalize: self.on_finalize.clone(),
        };
        let on_error = self.on_error.clone();
        let persisted = Arc::clone(&self.persisted);

        Box::pin(async_stream::stream! {
            let _guard = guard;
            let mut events = events;
            let mut last: Option<AgentState> = None;
            let mut finished = false;
            let mut failure: Option<AgentError> = None;

            while let Some(item) = events.next().await {
                match item {
                    Ok(Event::RunError { message, code }) => {
                        failure = Some(AgentError::Run { message, code });
                        break;
                    }
                    Ok(event) => {
                        finished = finished || event.is_terminal();
                        match reducer.apply(&event) {
                            Ok(snapshot) => {
                                last = Some(snapshot.clone());
                                yield Ok(snapshot);
                            }
                            Err(e) => {
                                failure = Some(e.into());
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            if let Some(error) = failure {
                tracing::warn!(%error, "run failed");
                if let Some(hook) = &on_error {
                    hook(&error);
                }
                yield Err(error);
            } else if finished {
                if let Some(snapshot) = last {
                    let mut persisted = persisted.write().unwrap();
                    if let Some(messages) = snapshot.messages {
                        persisted.messages = messages;
                    }
                    if let Some(state) = snapshot.state {
                        persisted.state = state;
                    }
                }
            }
        })
    }

    /// Run the agent through the legacy bridge: every verified event,
    /// pre-reduction, is handed to `encoder` in order together with the
    /// run's identifiers, and the encoder's frames are streamed out.
    pub fn run_agent_bridged(
        &self,
        params: Option<RunAgentParams>,
        encoder: Arc<dyn LegacyEncoder>,
    ) -> BoxStream<'static, Result<Value, AgentError>> {
        let params = params.unwrap_or_default();
        let agent_id = self.ensure_agent_id();
        let input = self.prepare_input(&params);
        let ids = RunIdentifiers {
            agent_id,
            thread_id: input.thread_id.clone(),
            run_id: input.run_id.clone(),
        };
        let cancel = CancellationToken::new();
        self.register_active(&input.run_id, &cancel);

        let events = self.run(&input, cancel);
        let guard = RunGuard {
            run_id: input.run_id,
            active: Arc::clone(&self.active),
            on_finalize: self.on_finalize.clone(),
        };
        let on_error = self.on_error.clone();

        Box::pin(async_stream::stream! {
            let _guard = guard;
            let mut events = events;

            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        for frame in encoder.encode(&event, &ids) {
                            yield Ok(frame);
                        }
                        // The encoder sees the terminal error event like
                        // any other; the subscription still fails.
                        if let Event::RunError { message, code } = event {
                            let error = AgentError::Run { message, code };
                            if let Some(hook) = &on_error {
                                hook(&error);
                            }
                            yield Err(error);
                            break;
                        }
                    }
                    Err(error) => {
                        if let Some(hook) = &on_error {
                            hook(&error);
                        }
                        yield Err(error);
                        break;
                    }
                }
            }
        })
    }

    /// Cancel the active run, if any. No-op otherwise, and a no-op for
    /// runs that already completed.
    pub fn abort_run(&self) {
        if let Some(active) = self.active.lock().unwrap().as_ref() {
            tracing::debug!(run_id = %active.run_id, "aborting run");
            active.cancel.cancel();
        }
    }

    fn ensure_agent_id(&self) -> String {
        self.agent_id
            .get_or_init(|| Uuid::new_v4().to_string())
            .clone()
    }

    /// Immutable per-invocation snapshot; every field deep-copied.
    fn prepare_input(&self, params: &RunAgentParams) -> RunInput {
        let persisted = self.persisted.read().unwrap();
        RunInput {
            thread_id: self.thread_id.clone(),
            run_id: params
                .run_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            tools: params.tools.clone(),
            context: params.context.clone(),
            forwarded_props: params.forwarded_props.clone().unwrap_or(Value::Null),
            state: persisted.state.clone(),
            messages: persisted.messages.clone(),
        }
    }

    fn register_active(&self, run_id: &str, cancel: &CancellationToken) {
        *self.active.lock().unwrap() = Some(ActiveRun {
            run_id: run_id.to_owned(),
            cancel: cancel.clone(),
        });
    }
}

impl Clone for Agent {
    /// Independent copy of identity, messages and state. The clone has
    /// no active run; an in-flight run stays with the original.
    fn clone(&self) -> Self {
        let snapshot = self.persisted.read().unwrap().clone();
        Self {
            agent_id: self.agent_id.clone(),
            thread_id: self.thread_id.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            persisted: Arc::new(RwLock::new(snapshot)),
            active: Arc::new(Mutex::new(None)),
            transport: Arc::clone(&self.transport),
            reducer_factory: Arc::clone(&self.reducer_factory),
            on_error: self.on_error.clone(),
            on_finalize: self.on_finalize.clone(),
        }
    }
}

/// Clears the active-run slot and fires the finalize hook when the run
/// stream is dropped, consumed or abandoned.
struct RunGuard {
    run_id: String,
    active: Arc<Mutex<Option<ActiveRun>>>,
    on_finalize: Option<FinalizeHook>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if active.as_ref().is_some_and(|a| a.run_id == self.run_id) {
                *active = None;
            }
        }
        if let Some(hook) = self.on_finalize.take() {
            hook();
        }
    }
}
