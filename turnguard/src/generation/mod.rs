// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Generation collaborator
//
// Responsibilities:
// - Generator trait: one-shot completion and fragment streaming
// - Specialist -> provider model mapping, never exposed
// - Error text scrubbed of provider model identifiers
// - OpenAI-compatible HTTP implementation

mod openai;
mod sse;

pub use openai::OpenAiCompatibleGenerator;
pub use sse::{fragment_stream, parse_sse_line, SseChunk};

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::config::ModelIds;
use crate::message::ChatMessage;
use crate::routing::Specialist;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Which hidden model a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Specialist(Specialist),
    Safety,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub role: ModelRole,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Errors from the generation provider. Message text has already been
/// scrubbed of model identifiers by the implementation that built it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Transport(String),

    #[error("generation request timed out")]
    Timeout,

    #[error("provider returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Text safe to show a caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            GenerationError::Timeout => "the model took too long to respond",
            _ => "the model is temporarily unavailable",
        }
    }
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

// ---------------------------------------------------------------------------
// Trait: Generator (dependency injection point)
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, request: GenerationRequest) -> Result<Completion, GenerationError>;

    /// Start a streamed completion. Errors before the first fragment are
    /// returned directly; later ones arrive as stream items.
    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, GenerationError>;
}

// ---------------------------------------------------------------------------
// Model registry
// ---------------------------------------------------------------------------

const MODEL_PLACEHOLDER: &str = "[model]";

/// Hidden mapping from roles to provider model identifiers.
pub struct ModelRegistry {
    ids: ModelIds,
}

impl ModelRegistry {
    pub fn new(ids: ModelIds) -> Self {
        Self { ids }
    }

    pub(crate) fn model_id(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Specialist(Specialist::Theory) => &self.ids.theory,
            ModelRole::Specialist(Specialist::Code) => &self.ids.code,
            ModelRole::Specialist(Specialist::Math) => &self.ids.math,
            ModelRole::Safety => &self.ids.safety,
        }
    }

    /// Replace every known model identifier in `text` with a placeholder.
    pub fn sanitize(&self, text: &str) -> String {
        let mut ids = [
            self.ids.theory.as_str(),
            self.ids.code.as_str(),
            self.ids.math.as_str(),
            self.ids.safety.as_str(),
        ];
        // Longest first, so an id that contains another is replaced whole.
        ids.sort_by_key(|id| std::cmp::Reverse(id.len()));

        let mut out = text.to_string();
        for id in ids.iter().filter(|id| !id.is_empty()) {
            out = out.replace(*id, MODEL_PLACEHOLDER);
        }
        out
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry").finish_non_exhaustive()
    }
}

/// Role description sent ahead of the conversation.
pub fn system_prompt(specialist: Specialist) -> &'static str {
    match specialist {
        Specialist::Theory => {
            "You are a data science tutor. Explain concepts clearly, building intuition before formalism."
        }
        Specialist::Code => {
            "You are a programming assistant. Give correct, runnable code with a short explanation."
        }
        Specialist::Math => {
            "You are a mathematics assistant. Work through problems step by step and state the result."
        }
    }
}
