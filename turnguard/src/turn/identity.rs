// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

use crate::config::{CompiledPattern, IdentityConfig};

/// Answers "which model are you?" with the product name instead of asking
/// a model that might reveal its provider identity.
#[derive(Debug, Clone)]
pub struct IdentityResponder {
    display_name: String,
    patterns: Vec<CompiledPattern>,
}

impl IdentityResponder {
    pub fn new(display_name: impl Into<String>, patterns: Vec<CompiledPattern>) -> Self {
        Self {
            display_name: display_name.into(),
            patterns,
        }
    }

    /// `None` when identity handling is switched off.
    pub fn from_config(config: &IdentityConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.display_name.clone(), config.patterns.clone()))
    }

    pub fn is_inquiry(&self, message: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(message))
    }

    pub fn answer(&self) -> String {
        format!(
            "I am {}, an AI assistant here to help you with your questions. How can I assist you today?",
            self.display_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> IdentityResponder {
        let patterns = ["what.*model", "who.*are.*you", "your.*name"]
            .iter()
            .map(|p| CompiledPattern::compile(p).unwrap())
            .collect();
        IdentityResponder::new("DatAI", patterns)
    }

    #[test]
    fn recognises_inquiries_case_insensitively() {
        let r = responder();
        assert!(r.is_inquiry("What model is this?"));
        assert!(r.is_inquiry("WHO ARE YOU"));
        assert!(r.is_inquiry("tell me your name"));
        assert!(!r.is_inquiry("explain gradient descent"));
    }

    #[test]
    fn answer_names_the_product() {
        assert_eq!(
            responder().answer(),
            "I am DatAI, an AI assistant here to help you with your questions. How can I assist you today?"
        );
    }

    #[test]
    fn disabled_config_yields_none() {
        let config = IdentityConfig {
            enabled: false,
            display_name: "DatAI".into(),
            patterns: Vec::new(),
        };
        assert!(IdentityResponder::from_config(&config).is_none());
    }
}
