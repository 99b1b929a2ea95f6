// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::net::IpAddr;

use crate::stream::TagPair;

use super::pattern::CompiledPattern;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated turnguard config.
#[derive(Debug)]
pub struct Config {
    /// Config format version. Always "v1".
    pub version: String,
    pub rate_limit: RateLimitConfig,
    pub routing: RoutingConfig,
    pub generation: GenerationConfig,
    pub safety: SafetyConfig,
    pub stream: StreamConfig,
    pub identity: IdentityConfig,
    pub server: ServerConfig,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per client IP per window.
    pub per_ip: u32,
    /// Requests allowed per user per window.
    pub per_user: u32,
    pub window_secs: u64,
    /// Shared counter store. `None` selects the in-process store.
    pub redis_url: Option<Secret>,
    pub redis_pool_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    /// Reject unknown explicit model labels instead of falling back to theory.
    pub strict_model_selection: bool,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: Option<Secret>,
    pub timeout_ms: u64,
    /// Prior messages sent along with each turn.
    pub history_window: usize,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub models: ModelIds,
}

/// Provider model identifiers behind each specialist role.
///
/// These are deployment secrets: `Debug` prints nothing but the field names.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelIds {
    pub theory: String,
    pub code: String,
    pub math: String,
    pub safety: String,
}

impl fmt::Debug for ModelIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelIds")
            .field("theory", &"[hidden]")
            .field("code", &"[hidden]")
            .field("math", &"[hidden]")
            .field("safety", &"[hidden]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub primary: PrimarySafetyConfig,
    pub secondary: Option<SecondarySafetyConfig>,
}

#[derive(Debug, Clone)]
pub struct PrimarySafetyConfig {
    pub enabled: bool,
    pub max_tokens: u32,
}

/// Predict-then-poll classifier used when the primary fails.
#[derive(Debug, Clone)]
pub struct SecondarySafetyConfig {
    pub api_url: String,
    pub api_key: Secret,
    pub model_version: String,
    /// Overall budget for one classification, polling included.
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub suppressed_tags: Vec<TagPair>,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub enabled: bool,
    pub display_name: String,
    pub patterns: Vec<CompiledPattern>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
}
