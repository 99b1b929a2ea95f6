// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
// Kept apart from the public Config structs: interpolation, regex
// compilation and defaulting all happen between the two.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub turnguard: String,
    pub rate_limit: Option<RawRateLimit>,
    pub routing: Option<RawRouting>,
    pub generation: RawGeneration,
    pub safety: Option<RawSafety>,
    pub stream: Option<RawStream>,
    pub identity: Option<RawIdentity>,
    pub server: Option<RawServer>,
}

#[derive(Debug, Deserialize)]
pub struct RawRateLimit {
    pub per_ip: Option<u32>,
    pub per_user: Option<u32>,
    pub window_secs: Option<u64>,
    pub redis_url: Option<String>,
    pub redis_pool_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RawRouting {
    #[serde(default)]
    pub strict_model_selection: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawGeneration {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub history_window: Option<usize>,
    pub default_temperature: Option<f32>,
    pub default_max_tokens: Option<u32>,
    pub models: RawModels,
}

#[derive(Debug, Deserialize)]
pub struct RawModels {
    pub theory: Option<String>,
    pub code: Option<String>,
    pub math: Option<String>,
    pub safety: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawSafety {
    pub primary: Option<RawPrimarySafety>,
    pub secondary: Option<RawSecondarySafety>,
}

#[derive(Debug, Deserialize)]
pub struct RawPrimarySafety {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RawSecondarySafety {
    pub api_url: Option<String>,
    pub api_key: String,
    pub model_version: Option<String>,
    pub timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RawStream {
    #[serde(default)]
    pub suppressed_tags: Vec<RawTagPair>,
    /// If false, only the listed tags are used. Default: true.
    pub use_default_tags: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RawTagPair {
    pub open: String,
    pub close: String,
}

#[derive(Debug, Deserialize)]
pub struct RawIdentity {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub display_name: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawServer {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

fn default_true() -> bool {
    true
}
