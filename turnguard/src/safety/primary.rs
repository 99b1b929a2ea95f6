// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;

use crate::generation::{GenerationError, GenerationRequest, Generator, ModelRole};
use crate::message::ChatMessage;

use super::{SafetyClassifier, SafetyError, SafetyVerdict, Speaker};

pub const SAFE_CODE: &str = "SAFETY_OK";
pub const BLOCKED_CODE: &str = "SAFETY_BLOCKED";

/// Primary classifier: asks the hidden safety model through the regular
/// generation provider and reads "unsafe" anywhere in its reply as a deny.
pub struct ChatSafetyClassifier {
    generator: Arc<dyn Generator>,
    max_tokens: u32,
}

impl ChatSafetyClassifier {
    pub fn new(generator: Arc<dyn Generator>, max_tokens: u32) -> Self {
        Self {
            generator,
            max_tokens,
        }
    }
}

#[async_trait]
impl SafetyClassifier for ChatSafetyClassifier {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn classify(&self, text: &str, _speaker: Speaker) -> Result<SafetyVerdict, SafetyError> {
        let request = GenerationRequest {
            role: ModelRole::Safety,
            messages: vec![ChatMessage::user(text)],
            temperature: 0.0,
            max_tokens: self.max_tokens,
        };

        let completion = self.generator.complete(request).await.map_err(|e| match e {
            GenerationError::Timeout => SafetyError::Timeout,
            other => SafetyError::Unavailable(other.to_string()),
        })?;

        if completion.text.to_lowercase().contains("unsafe") {
            Ok(SafetyVerdict::deny(
                ["unsafe"],
                Some("Content flagged by safety classifier".to_string()),
                BLOCKED_CODE,
            ))
        } else {
            Ok(SafetyVerdict::allow(SAFE_CODE))
        }
    }
}
