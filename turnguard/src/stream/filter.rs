// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Incremental suppressed-region filter.
//
// Invariants:
// - Nothing between an opening tag and its closing tag is ever emitted.
// - No emitted fragment ends in a prefix of a known tag while more input
//   may still arrive; that suffix is held back until it resolves.
// - Output is independent of how the input was split into fragments.
// - Inside an unclosed region the buffer never grows beyond the longest
//   closing tag.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};

/// One opening/closing delimiter pair, e.g. `<think>` / `</think>`.
///
/// Tags are ASCII and matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPair {
    pub open: String,
    pub close: String,
}

impl TagPair {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into().to_ascii_lowercase(),
            close: close.into().to_ascii_lowercase(),
        }
    }
}

/// Per-stream filter state: the pending buffer plus which region (if any)
/// the stream is currently inside.
///
/// Owned by exactly one stream; dropped when that stream ends.
#[derive(Debug)]
pub struct StreamFilter {
    tags: Arc<[TagPair]>,
    buffer: String,
    /// Index into `tags` of the region being suppressed.
    inside: Option<usize>,
    strip_decoration: bool,
}

impl StreamFilter {
    pub fn new(tags: Arc<[TagPair]>) -> Self {
        Self {
            tags,
            buffer: String::new(),
            inside: None,
            strip_decoration: true,
        }
    }

    /// Region removal only; markdown markers pass through untouched.
    pub fn without_decoration(tags: Arc<[TagPair]>) -> Self {
        Self {
            strip_decoration: false,
            ..Self::new(tags)
        }
    }

    pub fn is_inside_region(&self) -> bool {
        self.inside.is_some()
    }

    /// Bytes currently held back.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one fragment; returns whatever is now safe to emit (possibly empty).
    pub fn push(&mut self, fragment: &str) -> String {
        self.buffer.push_str(fragment);
        let mut out = String::new();

        loop {
            let lowered = self.buffer.to_ascii_lowercase();
            match self.inside {
                None => {
                    if let Some((pos, idx)) = self.earliest_open(&lowered) {
                        out.push_str(&self.buffer[..pos]);
                        self.buffer.drain(..pos + self.tags[idx].open.len());
                        self.inside = Some(idx);
                        continue;
                    }
                    let held = self.partial_tag_suffix(&lowered, None);
                    let emit_to = self.buffer.len() - held;
                    out.push_str(&self.buffer[..emit_to]);
                    self.buffer.drain(..emit_to);
                    break;
                }
                Some(idx) => {
                    let close = &self.tags[idx].close;
                    if let Some(pos) = lowered.find(close.as_str()) {
                        let end = pos + close.len();
                        self.buffer.drain(..end);
                        self.inside = None;
                        continue;
                    }
                    let held = self.partial_tag_suffix(&lowered, Some(idx));
                    let drop_to = self.buffer.len() - held;
                    self.buffer.drain(..drop_to);
                    break;
                }
            }
        }

        self.decorate(out)
    }

    /// End of input. A trailing partial tag is emitted literally; an
    /// unclosed region is discarded.
    pub fn finish(mut self) -> String {
        if self.inside.is_some() {
            return String::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        self.decorate(rest)
    }

    fn decorate(&self, text: String) -> String {
        if self.strip_decoration {
            strip_decoration(&text)
        } else {
            text
        }
    }

    /// Earliest opening tag in `lowered`; the longest tag wins a tie.
    fn earliest_open(&self, lowered: &str) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (idx, tag) in self.tags.iter().enumerate() {
            if let Some(pos) = lowered.find(tag.open.as_str()) {
                best = match best {
                    Some((bpos, bidx))
                        if bpos < pos
                            || (bpos == pos && self.tags[bidx].open.len() >= tag.open.len()) =>
                    {
                        Some((bpos, bidx))
                    }
                    _ => Some((pos, idx)),
                };
            }
        }
        best
    }

    /// Length of the longest buffer suffix that is a proper prefix of a tag
    /// that could still complete. Outside a region every opening and
    /// closing tag counts; inside, only the active closing tag.
    fn partial_tag_suffix(&self, lowered: &str, inside: Option<usize>) -> usize {
        let bytes = lowered.as_bytes();
        let candidates: Vec<&str> = match inside {
            Some(idx) => vec![self.tags[idx].close.as_str()],
            None => self
                .tags
                .iter()
                .flat_map(|t| [t.open.as_str(), t.close.as_str()])
                .collect(),
        };

        let longest = candidates.iter().map(|t| t.len()).max().unwrap_or(0);
        let upper = longest.saturating_sub(1).min(bytes.len());
        for len in (1..=upper).rev() {
            let suffix = &bytes[bytes.len() - len..];
            if candidates
                .iter()
                .any(|tag| tag.len() > len && tag.as_bytes().starts_with(suffix))
            {
                return len;
            }
        }
        0
    }
}

/// Remove emphasis, header and code markers from one emitted fragment.
///
/// Works character by character, so the result does not depend on where
/// fragment boundaries fall.
pub fn strip_decoration(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '#' | '`'))
        .collect()
}

// ---------------------------------------------------------------------------
// Stream adapter
// ---------------------------------------------------------------------------

pub type FilteredStream<E> = Pin<Box<dyn Stream<Item = Result<String, E>> + Send>>;

/// Wrap a fragment stream so it yields filtered, non-empty fragments.
///
/// An upstream error is forwarded as the last item; held-back text is
/// discarded in that case. A clean end flushes the held-back text.
pub fn filter_stream<S, E>(input: S, tags: Arc<[TagPair]>) -> FilteredStream<E>
where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Send + 'static,
{
    let state = (Box::pin(input), Some(StreamFilter::new(tags)));

    let stream = futures_util::stream::unfold(state, |(mut input, mut filter)| async move {
        loop {
            let active = filter.as_mut()?;
            match input.next().await {
                Some(Ok(fragment)) => {
                    let emitted = active.push(&fragment);
                    if !emitted.is_empty() {
                        return Some((Ok(emitted), (input, filter)));
                    }
                }
                Some(Err(e)) => {
                    return Some((Err(e), (input, None)));
                }
                None => {
                    let rest = filter.take().map(StreamFilter::finish).unwrap_or_default();
                    if rest.is_empty() {
                        return None;
                    }
                    return Some((Ok(rest), (input, None)));
                }
            }
        }
    });

    Box::pin(stream)
}

/// Run the region filter over a complete answer in one pass.
pub fn remove_suppressed_regions(text: &str, tags: Arc<[TagPair]>) -> String {
    let mut filter = StreamFilter::without_decoration(tags);
    let mut out = filter.push(text);
    out.push_str(&filter.finish());
    out
}
