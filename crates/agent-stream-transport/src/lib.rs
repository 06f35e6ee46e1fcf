//! Transport layer for agent run streams.
//!
//! - `StreamTransport` / `HttpTransport` - Open a streaming connection
//!   and surface it as an ordered notification sequence
//! - `SseDecoder` - Reassemble byte chunks into typed events

pub mod decode;
pub mod http;

pub use decode::{DecodeError, SseDecoder};
pub use http::{
    HttpTransport, NotificationStream, StreamNotification, StreamRequest, StreamTransport,
    TransportError,
};
