// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Intent classification and specialist routing
//
// Responsibilities:
// - Three-pass scoring: keywords, strong-signal patterns, tie-break
// - Explicit / auto / fallback routing decisions with fixed confidences
// - Specialist labels as they appear on the wire and in storage

mod vocabulary;

use std::fmt;
use std::str::FromStr;

use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};

use vocabulary::*;

/// Strategy name recorded with every routing decision.
pub const ROUTING_STRATEGY: &str = "moe";

pub const EXPLICIT_CONFIDENCE: f32 = 1.0;
pub const AUTO_CONFIDENCE: f32 = 0.75;
pub const AUTO_THEORY_CONFIDENCE: f32 = 0.65;
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Downstream model role a query is routed to.
///
/// Declaration order is the tie-break priority: code > math > theory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Specialist {
    #[serde(rename = "code-specialist")]
    Code,
    #[serde(rename = "math-specialist")]
    Math,
    #[serde(rename = "theory-specialist")]
    Theory,
}

impl Specialist {
    pub const PRIORITY: [Specialist; 3] = [Specialist::Code, Specialist::Math, Specialist::Theory];

    pub fn label(&self) -> &'static str {
        match self {
            Specialist::Code => "code-specialist",
            Specialist::Math => "math-specialist",
            Specialist::Theory => "theory-specialist",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Specialist::Code => "code",
            Specialist::Math => "math",
            Specialist::Theory => "theory",
        }
    }
}

impl fmt::Display for Specialist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown specialist \"{0}\"")]
pub struct UnknownSpecialist(pub String);

impl FromStr for Specialist {
    type Err = UnknownSpecialist;

    /// Accepts the wire label (`code-specialist`) or the bare name (`code`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Specialist::PRIORITY
            .into_iter()
            .find(|sp| normalized == sp.label() || normalized == sp.short_name())
            .ok_or_else(|| UnknownSpecialist(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingSource {
    Explicit,
    Auto,
    Fallback,
}

/// Outcome of routing one turn. Immutable once attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    #[serde(rename = "model")]
    pub specialist: Specialist,
    pub confidence: f32,
    pub source: RoutingSource,
    /// Human-readable account of why this specialist won.
    pub reasons: String,
}

/// Per-label totals for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationScore {
    pub code: u32,
    pub math: u32,
    pub theory: u32,
}

impl ClassificationScore {
    pub fn get(&self, specialist: Specialist) -> u32 {
        match specialist {
            Specialist::Code => self.code,
            Specialist::Math => self.math,
            Specialist::Theory => self.theory,
        }
    }

    /// Highest-scoring label; ties go to the earlier entry in
    /// `Specialist::PRIORITY`, all-zero goes to theory.
    pub fn winner(&self) -> Specialist {
        let best = Specialist::PRIORITY
            .into_iter()
            .map(|sp| self.get(sp))
            .max()
            .unwrap_or(0);
        if best == 0 {
            return Specialist::Theory;
        }
        Specialist::PRIORITY
            .into_iter()
            .find(|sp| self.get(*sp) == best)
            .unwrap_or(Specialist::Theory)
    }
}

impl fmt::Display for ClassificationScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code={} math={} theory={}", self.code, self.math, self.theory)
    }
}

/// What the caller asked for in the `model` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    Auto,
    Explicit(Specialist),
    Malformed(String),
}

impl ModelSelection {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => ModelSelection::Auto,
            Some(s) if s.eq_ignore_ascii_case("auto") => ModelSelection::Auto,
            Some(s) => match s.parse::<Specialist>() {
                Ok(sp) => ModelSelection::Explicit(sp),
                Err(_) => ModelSelection::Malformed(s.to_string()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// IntentClassifier
// ---------------------------------------------------------------------------

/// Deterministic heuristic scorer. Build once per process and share.
pub struct IntentClassifier {
    code_patterns: RegexSet,
    math_patterns: RegexSet,
    theory_patterns: RegexSet,
}

impl IntentClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            code_patterns: pattern_set(CODE_PATTERNS)?,
            math_patterns: pattern_set(MATH_PATTERNS)?,
            theory_patterns: pattern_set(THEORY_PATTERNS)?,
        })
    }

    pub fn score(&self, message: &str) -> ClassificationScore {
        let lowered = message.to_lowercase();
        let trimmed = message.trim_start();

        let mut score = ClassificationScore {
            code: keyword_hits(&lowered, CODE_KEYWORDS),
            math: keyword_hits(&lowered, MATH_KEYWORDS),
            theory: keyword_hits(&lowered, THEORY_KEYWORDS),
        };

        if self.code_patterns.is_match(message) {
            score.code += CODE_PATTERN_WEIGHT;
        }
        if self.math_patterns.is_match(message) {
            score.math += MATH_PATTERN_WEIGHT;
        }
        if self.theory_patterns.is_match(trimmed) {
            score.theory += THEORY_PATTERN_WEIGHT;
        }
        score
    }

    pub fn classify(&self, message: &str) -> Specialist {
        self.score(message).winner()
    }

    /// Route a turn given the caller's `model` field.
    ///
    /// Never fails: a malformed label falls back to theory. Strict
    /// deployments reject `ModelSelection::Malformed` before calling this.
    pub fn decide(&self, explicit: Option<&str>, message: &str) -> RoutingDecision {
        match ModelSelection::parse(explicit) {
            ModelSelection::Explicit(specialist) => RoutingDecision {
                specialist,
                confidence: EXPLICIT_CONFIDENCE,
                source: RoutingSource::Explicit,
                reasons: format!("explicit_user_selection: {}", specialist.label()),
            },
            ModelSelection::Auto => {
                let score = self.score(message);
                let specialist = score.winner();
                let confidence = if specialist == Specialist::Theory {
                    AUTO_THEORY_CONFIDENCE
                } else {
                    AUTO_CONFIDENCE
                };
                RoutingDecision {
                    specialist,
                    confidence,
                    source: RoutingSource::Auto,
                    reasons: format!("auto_routing: {score}"),
                }
            }
            ModelSelection::Malformed(_) => RoutingDecision {
                specialist: Specialist::Theory,
                confidence: FALLBACK_CONFIDENCE,
                source: RoutingSource::Fallback,
                reasons: "default_fallback: unrecognized model selection".to_string(),
            },
        }
    }
}

fn pattern_set(patterns: &[&str]) -> Result<RegexSet, regex::Error> {
    RegexSetBuilder::new(patterns).case_insensitive(true).build()
}

fn keyword_hits(lowered: &str, keywords: &[&str]) -> u32 {
    keywords.iter().filter(|kw| lowered.contains(*kw)).count() as u32
}
