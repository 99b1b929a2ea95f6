// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Config loading -- turnguard.yaml
//
// Responsibilities:
// - Read YAML from a ConfigSource (file or inline string)
// - ${VAR} / ${VAR:-default} interpolation for URLs, keys and model ids
// - Range validation with actionable messages
// - Identity pattern compilation
// - Config hash for startup logging

mod defaults;
mod error;
mod interpolation;
mod loader;
mod pattern;
mod raw;
mod source;
mod types;

pub use defaults::{default_tag_pairs, MAX_TEMPERATURE, MAX_TOKENS_CEILING};
pub use error::ConfigError;
pub use interpolation::resolve_variables;
pub use loader::{compute_hash, load_config};
pub use pattern::CompiledPattern;
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;
