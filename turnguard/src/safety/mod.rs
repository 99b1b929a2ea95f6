// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Safety gate -- content screening before and after generation
//
// Responsibilities:
// - Reject empty input outright (no remote call)
// - Primary classifier, then secondary on primary failure
// - Both unavailable: allow, labelled degraded, logged at warn

mod llama_guard;
mod primary;

pub use llama_guard::{parse_guard_output, LlamaGuardClassifier, HAZARD_CATEGORIES};
pub use primary::ChatSafetyClassifier;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

pub const EMPTY_INPUT_CODE: &str = "SAFETY_001";
pub const DEGRADED_CODE: &str = "SAFETY_FALLBACK";
pub const EMPTY_LABEL: &str = "empty";
pub const DEGRADED_LABEL: &str = "degraded";

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Whose words are being screened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub allowed: bool,
    pub labels: BTreeSet<String>,
    pub reason: Option<String>,
    pub reference_code: String,
}

impl SafetyVerdict {
    pub fn allow(reference_code: impl Into<String>) -> Self {
        Self {
            allowed: true,
            labels: BTreeSet::new(),
            reason: None,
            reference_code: reference_code.into(),
        }
    }

    pub fn deny<I, L>(labels: I, reason: Option<String>, reference_code: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self {
            allowed: false,
            labels: labels.into_iter().map(Into::into).collect(),
            reason,
            reference_code: reference_code.into(),
        }
    }

    pub fn empty_input() -> Self {
        Self::deny([EMPTY_LABEL], Some("Empty input".to_string()), EMPTY_INPUT_CODE)
    }

    pub fn degraded() -> Self {
        Self {
            allowed: true,
            labels: BTreeSet::from([DEGRADED_LABEL.to_string()]),
            reason: Some("safety classification unavailable".to_string()),
            reference_code: DEGRADED_CODE.to_string(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.labels.contains(DEGRADED_LABEL)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("safety classifier unavailable: {0}")]
    Unavailable(String),

    #[error("safety classifier timed out")]
    Timeout,

    #[error("safety classifier returned an unreadable verdict: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Trait: SafetyClassifier (dependency injection point)
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn classify(&self, text: &str, speaker: Speaker) -> Result<SafetyVerdict, SafetyError>;
}

// ---------------------------------------------------------------------------
// SafetyGate
// ---------------------------------------------------------------------------

pub struct SafetyGate {
    primary: Option<Arc<dyn SafetyClassifier>>,
    secondary: Option<Arc<dyn SafetyClassifier>>,
}

impl SafetyGate {
    pub fn new(
        primary: Option<Arc<dyn SafetyClassifier>>,
        secondary: Option<Arc<dyn SafetyClassifier>>,
    ) -> Self {
        Self { primary, secondary }
    }

    /// Screen a user prompt.
    pub async fn evaluate(&self, text: &str) -> SafetyVerdict {
        self.evaluate_as(text, Speaker::User).await
    }

    /// Screen a model answer.
    pub async fn evaluate_output(&self, text: &str) -> SafetyVerdict {
        self.evaluate_as(text, Speaker::Assistant).await
    }

    pub async fn evaluate_as(&self, text: &str, speaker: Speaker) -> SafetyVerdict {
        if text.trim().is_empty() {
            tracing::info!(
                speaker = speaker.as_str(),
                verdict = "deny",
                reference_code = EMPTY_INPUT_CODE,
                "empty content rejected"
            );
            return SafetyVerdict::empty_input();
        }

        for classifier in [&self.primary, &self.secondary].into_iter().flatten() {
            let start = Instant::now();
            match classifier.classify(text, speaker).await {
                Ok(verdict) => {
                    tracing::info!(
                        classifier = classifier.name(),
                        speaker = speaker.as_str(),
                        verdict = if verdict.allowed { "allow" } else { "deny" },
                        reference_code = %verdict.reference_code,
                        latency_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "safety verdict"
                    );
                    return verdict;
                }
                Err(e) => {
                    tracing::warn!(
                        classifier = classifier.name(),
                        speaker = speaker.as_str(),
                        error = %e,
                        latency_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "safety classifier failed"
                    );
                }
            }
        }

        tracing::warn!(
            speaker = speaker.as_str(),
            reference_code = DEGRADED_CODE,
            "no safety classifier available, failing open"
        );
        SafetyVerdict::degraded()
    }
}
