//! The verified event pipeline: transport notifications in, ordered
//! typed events out.

use std::sync::Arc;

use agent_stream_core::{Event, EventVerifier, VerifyError};
use agent_stream_transport::{SseDecoder, StreamNotification, StreamRequest, StreamTransport};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentError;

/// Compose Transport → Decoder → Verifier for one run.
///
/// Cold: the connection is not opened until the stream is first polled.
/// The first failure at any stage terminates the stream; a cancelled
/// token terminates it without an error. A stream that ends while the
/// run is still active (started, no terminal event, not cancelled) is
/// reported as a protocol violation.
pub(crate) fn event_stream(
    transport: Arc<dyn StreamTransport>,
    request: StreamRequest,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<Event, AgentError>> {
    Box::pin(async_stream::try_stream! {
        let mut notifications = transport.open(request, cancel.clone()).await?;
        let mut decoder = SseDecoder::new();
        let mut verifier = EventVerifier::new();

        while let Some(notification) = notifications.next().await {
            match notification? {
                StreamNotification::Open { status, .. } => {
                    tracing::debug!(status, "run stream open");
                }
                StreamNotification::Chunk(chunk) => {
                    for event in decoder.feed(&chunk)? {
                        verifier.check(&event)?;
                        yield event;
                    }
                }
            }
        }

        if verifier.is_running() && !cancel.is_cancelled() {
            Err(VerifyError::PrematureEnd)?
        }
    })
}
