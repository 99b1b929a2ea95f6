// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

use crate::stream::TagPair;

use super::error::ConfigError;
use super::pattern::CompiledPattern;

pub const DEFAULT_PER_IP: u32 = 10;
pub const DEFAULT_PER_USER: u32 = 60;
pub const DEFAULT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_REDIS_POOL_SIZE: usize = 8;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_GENERATION_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const MAX_TEMPERATURE: f32 = 2.0;
pub const MAX_TOKENS_CEILING: u32 = 8192;

pub const DEFAULT_SAFETY_MAX_TOKENS: u32 = 100;
pub const DEFAULT_SECONDARY_API_URL: &str = "https://api.replicate.com/v1/predictions";
pub const DEFAULT_SECONDARY_MODEL_VERSION: &str = "meta/llama-guard-3-8b";
pub const DEFAULT_SECONDARY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 30;

pub const DEFAULT_DISPLAY_NAME: &str = "DatAI";
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9810;

/// Reasoning delimiters emitted by common chat models.
const DEFAULT_ANGLE_TAGS: &[&str] = &["think", "thinking", "reasoning", "thought", "internal"];
const DEFAULT_BRACKET_TAGS: &[&str] = &["thinking", "reasoning"];

/// Questions about which model sits behind the assistant.
const DEFAULT_IDENTITY_PATTERNS: &[&str] = &[
    r"what.*model",
    r"which.*model",
    r"what.*are.*you",
    r"who.*are.*you",
    r"what.*is.*this.*model",
    r"what.*ai.*are.*you",
    r"what.*llm",
    r"which.*llm",
    r"what.*version",
    r"your.*name",
    r"identify.*yourself",
    r"what.*assistant",
];

pub fn default_tag_pairs() -> Vec<TagPair> {
    let angle = DEFAULT_ANGLE_TAGS
        .iter()
        .map(|name| TagPair::new(format!("<{name}>"), format!("</{name}>")));
    let bracket = DEFAULT_BRACKET_TAGS
        .iter()
        .map(|name| TagPair::new(format!("[{name}]"), format!("[/{name}]")));
    angle.chain(bracket).collect()
}

pub fn default_identity_patterns() -> Result<Vec<CompiledPattern>, ConfigError> {
    DEFAULT_IDENTITY_PATTERNS
        .iter()
        .map(|p| CompiledPattern::compile(p))
        .collect()
}
