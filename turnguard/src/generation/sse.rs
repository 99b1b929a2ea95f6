// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// SSE decoding for OpenAI-compatible chat completion streams.
//
// Format:
// - `data: {"choices":[{"delta":{"content":"Hello"}}]}` -> fragment
// - `data: {"error":{"message":"..."}}` -> provider error
// - `data: [DONE]` -> end of stream
// - blank lines, `:` comments, `event:` lines -> ignored

use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};

use super::{FragmentStream, GenerationError, ModelRegistry};

/// One `data:` payload from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseChunk {
    pub data: String,
}

/// Parse one SSE line. Returns `None` for separators, comments and
/// non-data fields.
pub fn parse_sse_line(line: &str) -> Option<SseChunk> {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))
        .map(|data| SseChunk {
            data: data.to_string(),
        })
}

#[derive(Debug, PartialEq)]
enum Delta {
    Content(String),
    Done,
    Skip,
}

fn classify_chunk(chunk: &SseChunk, registry: &ModelRegistry) -> Result<Delta, GenerationError> {
    let data = chunk.data.trim();
    if data == "[DONE]" {
        return Ok(Delta::Done);
    }

    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| GenerationError::Malformed(format!("stream chunk is not JSON: {e}")))?;

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("provider error");
        return Err(GenerationError::Upstream {
            status: 200,
            message: registry.sanitize(message),
        });
    }

    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str());

    Ok(match content {
        Some(text) if !text.is_empty() => Delta::Content(text.to_string()),
        _ => Delta::Skip,
    })
}

struct SseState<S> {
    input: std::pin::Pin<Box<S>>,
    line_buffer: Vec<u8>,
    pending: VecDeque<String>,
    /// Delivered after `pending` empties, so earlier fragments are not lost.
    failure: Option<GenerationError>,
    finished: bool,
    registry: Arc<ModelRegistry>,
}

impl<S> SseState<S> {
    /// Handle every complete line in the buffer. Lines are split on raw
    /// bytes so a multi-byte character cut across chunks stays intact.
    fn drain_lines(&mut self) -> Result<(), GenerationError> {
        while !self.finished {
            let Some(pos) = self.line_buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.line_buffer.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line))?;
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<(), GenerationError> {
        let Some(chunk) = parse_sse_line(line) else {
            return Ok(());
        };
        match classify_chunk(&chunk, &self.registry)? {
            Delta::Content(text) => self.pending.push_back(text),
            Delta::Done => self.finished = true,
            Delta::Skip => {}
        }
        Ok(())
    }
}

/// Turn a raw SSE byte stream into content fragments.
pub fn fragment_stream<S, E>(input: S, registry: Arc<ModelRegistry>) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        input: Box::pin(input),
        line_buffer: Vec::new(),
        pending: VecDeque::new(),
        failure: None,
        finished: false,
        registry,
    };

    let stream = futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if let Some(e) = st.failure.take() {
                return Some((Err(e), st));
            }
            if st.finished {
                return None;
            }
            match st.input.next().await {
                Some(Ok(bytes)) => {
                    st.line_buffer.extend_from_slice(&bytes);
                    if let Err(e) = st.drain_lines() {
                        st.finished = true;
                        st.failure = Some(e);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    let message = st.registry.sanitize(&e.to_string());
                    return Some((Err(GenerationError::Transport(message)), st));
                }
                None => {
                    let tail = std::mem::take(&mut st.line_buffer);
                    let result = st.handle_line(&String::from_utf8_lossy(&tail));
                    st.finished = true;
                    st.failure = result.err();
                }
            }
        }
    });

    Box::pin(stream)
}
