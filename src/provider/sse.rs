//! Line framing for streamed responses.
//!
//! Server-sent events (Gemini, OpenAI) and newline-delimited JSON
//! (Ollama) both arrive as arbitrary byte chunks. Lines are split on
//! raw bytes so a multi-byte character straddling two chunks is never
//! mangled.

use bytes::{Buf, BytesMut};
use futures::StreamExt;

use crate::error::PipelineError;

/// Accumulates bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every complete line, without its
    /// terminator. Blank lines are skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.buf.iter().position(|&b| b == b'\n') {
            let raw = self.buf.split_to(end);
            self.buf.advance(1);
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// The unterminated tail, if the stream ended without a newline.
    pub fn finish(self) -> Option<String> {
        let tail = String::from_utf8_lossy(&self.buf).trim().to_string();
        (!tail.is_empty()).then_some(tail)
    }
}

/// Payload of an SSE `data:` line.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Whether the line callback wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// Feed every line of `response` to `on_line` until it reports
/// [`Flow::Done`] or the body ends.
pub async fn read_lines(
    response: reqwest::Response,
    mut on_line: impl FnMut(&str) -> Result<Flow, PipelineError>,
) -> Result<(), PipelineError> {
    let mut stream = response.bytes_stream();
    let mut decoder = LineDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| PipelineError::Network(format!("stream interrupted: {e}")))?;
        for line in decoder.push(&chunk) {
            if on_line(&line)? == Flow::Done {
                return Ok(());
            }
        }
    }
    if let Some(tail) = decoder.finish() {
        on_line(&tail)?;
    }
    Ok(())
}
