//! Content-Length framing over an arbitrary byte stream.
//!
//! The wire format is MIME-style: `Header-Name: value\r\n` lines, a blank
//! line, then exactly `Content-Length` bytes of UTF-8 JSON. `Content-Length`
//! is the only header the agent is required to send and the only one we emit.

use serde_json::Value;
use thiserror::Error;

/// Upper bound on the header region of a single frame. Bodies are bounded by
/// their declared `Content-Length`, never by this limit.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Errors raised while decoding framed messages. Any of these leaves the
/// stream position ambiguous, so callers must treat them as fatal to the
/// channel.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame header line: `{0}`")]
    MalformedHeader(String),
    #[error("frame headers missing Content-Length")]
    MissingContentLength,
    #[error("invalid Content-Length value `{0}`")]
    InvalidContentLength(String),
    #[error("frame header region exceeds {MAX_HEADER_BYTES} bytes")]
    HeaderTooLarge,
    #[error("frame body is not valid JSON: {0}")]
    Body(#[source] serde_json::Error),
}

/// Serializes one JSON-RPC message into a framed byte buffer.
pub fn encode_frame(message: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental decoder for Content-Length-framed JSON messages.
///
/// Feed it byte chunks of any size and shape; it emits every complete
/// message, in order, as soon as its final byte arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Body length of the frame whose headers have already been consumed.
    /// While set, `buffer` begins at the first body byte.
    pending_body: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and drains every message completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Value>, CodecError> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        loop {
            let body_len = match self.pending_body {
                Some(len) => len,
                None => match self.take_headers()? {
                    Some(len) => {
                        self.pending_body = Some(len);
                        len
                    }
                    None => break,
                },
            };

            if self.buffer.len() < body_len {
                break;
            }

            let body: Vec<u8> = self.buffer.drain(..body_len).collect();
            self.pending_body = None;
            messages.push(serde_json::from_slice(&body).map_err(CodecError::Body)?);
        }

        Ok(messages)
    }

    /// Parses the header region if it is fully buffered, consuming it and
    /// returning the declared body length. The size limit applies only to
    /// the header region: until the separator shows up, anything buffered is
    /// still headers and must fit under [`MAX_HEADER_BYTES`].
    fn take_headers(&mut self) -> Result<Option<usize>, CodecError> {
        let Some(separator) = find_subsequence(&self.buffer, HEADER_SEPARATOR) else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                return Err(CodecError::HeaderTooLarge);
            }
            return Ok(None);
        };

        if separator > MAX_HEADER_BYTES {
            return Err(CodecError::HeaderTooLarge);
        }

        let header_region = String::from_utf8_lossy(&self.buffer[..separator]).into_owned();
        let mut content_length = None;
        for line in header_region.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(CodecError::MalformedHeader(line.to_string()));
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let value = value.trim();
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?;
                content_length = Some(parsed);
            }
        }

        let length = content_length.ok_or(CodecError::MissingContentLength)?;
        self.buffer.drain(..separator + HEADER_SEPARATOR.len());
        Ok(Some(length))
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
