//! Length-prefixed message framing.
//!
//! Every frame on the wire is `Content-Length: <n>\r\n\r\n` followed by exactly `n`
//! bytes of UTF-8 JSON. Frames may arrive split across reads or several to a read.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

pub const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// Incremental decoder. Bytes that do not yet form a complete frame stay buffered
/// until the next [`FrameDecoder::feed`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Appends `chunk` and returns every complete message now available, in wire order.
    ///
    /// A header without a usable `Content-Length` discards the whole buffer. A body
    /// that is not valid JSON drops only that frame.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(header_end) = find_delimiter(&self.buffer) {
            let header = String::from_utf8_lossy(&self.buffer[..header_end]);
            let Some(content_length) = parse_content_length(&header) else {
                error!(
                    buffered_bytes = self.buffer.len(),
                    "frame header has no valid Content-Length, discarding buffered input"
                );
                self.buffer.clear();
                break;
            };

            let body_start = header_end + HEADER_DELIMITER.len();
            let Some(frame_end) = body_start.checked_add(content_length) else {
                error!(content_length, "frame length overflows, discarding buffered input");
                self.buffer.clear();
                break;
            };
            if self.buffer.len() < frame_end {
                debug!(
                    buffered_bytes = self.buffer.len(),
                    frame_end, "waiting for the rest of the frame body"
                );
                break;
            }

            let decoded = serde_json::from_slice::<Value>(&self.buffer[body_start..frame_end]);
            self.buffer.drain(..frame_end);
            match decoded {
                Ok(message) => messages.push(message),
                Err(err) => error!(error = %err, content_length, "dropping frame with malformed JSON body"),
            }
        }

        messages
    }
}

/// Serializes `message` as compact JSON behind its `Content-Length` header.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_DELIMITER.len())
        .position(|window| window == HEADER_DELIMITER)
}

/// First header line named `Content-Length` (any case) whose value is a valid length.
fn parse_content_length(header: &str) -> Option<usize> {
    header.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            return None;
        }
        value.trim().parse::<usize>().ok()
    })
}
