// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Reasoning-markup filter for generated answers
//
// Responsibilities:
// - Drop suppressed regions (reasoning/thinking delimiters) from a token stream
// - Hold back possible partial tags until they resolve
// - Strip emphasis/header/code markers from each emitted fragment
// - Full-text cleanup for non-streamed answers

mod filter;
mod markdown;

pub use filter::{
    filter_stream, remove_suppressed_regions, strip_decoration, FilteredStream, StreamFilter,
    TagPair,
};
pub use markdown::{clean_response, strip_markdown};
