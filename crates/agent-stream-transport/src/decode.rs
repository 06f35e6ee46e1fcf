//! SSE frame decoding: byte chunks in, typed events out.

use agent_stream_core::Event;
use thiserror::Error;

/// Decode failure. Fatal for the whole stream: skipping a record would
/// silently corrupt event ordering downstream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed event payload '{payload}': {source}")]
    Parse {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Incremental decoder for an event-stream body.
///
/// Bytes are buffered until a complete record (blank-line delimited) is
/// available, so the emitted event sequence is identical no matter how
/// chunk boundaries split records, lines, or multi-byte characters.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk and drain every event completed by it.
    ///
    /// # Errors
    /// Returns an error on the first malformed record; the decoder must
    /// not be fed afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Event>, DecodeError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, skip)) = find_record_end(&self.buffer) {
            let record: Vec<u8> = self.buffer.drain(..end + skip).collect();
            let text = std::str::from_utf8(&record[..end])?;
            if let Some(event) = parse_record(text)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Whether a partial record is still buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

/// Find the blank line ending the first complete record.
///
/// Returns `(record_end, delimiter_len)`. Accepts LF and CRLF line
/// endings; a trailing `\r` left inside the record is stripped during
/// line parsing.
fn find_record_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' {
            if buf[i + 1] == b'\n' {
                return Some((i, 2));
            }
            if buf[i + 1] == b'\r' && buf.get(i + 2) == Some(&b'\n') {
                return Some((i, 3));
            }
        }
        i += 1;
    }
    None
}

/// Parse one record's field lines into an event.
///
/// Multiple `data:` lines are joined with a newline, as EventSource does;
/// comment lines and non-data fields are ignored. A record with no data
/// (a keepalive) produces no event.
fn parse_record(text: &str) -> Result<Option<Event>, DecodeError> {
    let mut data = String::new();
    for line in text.lines() {
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        if !data.is_empty() {
            data.push('\n');
        }
        data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
    }

    if data.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| DecodeError::Parse {
            payload: data,
            source,
        })
}
