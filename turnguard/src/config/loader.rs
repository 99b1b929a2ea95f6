// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

use std::net::IpAddr;

use sha2::{Digest, Sha256};

use crate::stream::TagPair;

use super::defaults::*;
use super::error::ConfigError;
use super::interpolation::{resolve_optional, resolve_variables};
use super::pattern::CompiledPattern;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a turnguard config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version and numeric ranges
/// 5. Resolve variable interpolation in URL, key and model fields
/// 6. Compile identity patterns
/// 7. Build typed Config struct
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.turnguard != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.turnguard
        )));
    }

    Ok(Config {
        version: raw.turnguard,
        rate_limit: build_rate_limit(raw.rate_limit)?,
        routing: RoutingConfig {
            strict_model_selection: raw
                .routing
                .map(|r| r.strict_model_selection)
                .unwrap_or(false),
        },
        generation: build_generation(raw.generation)?,
        safety: build_safety(raw.safety)?,
        stream: build_stream(raw.stream)?,
        identity: build_identity(raw.identity)?,
        server: build_server(raw.server)?,
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_rate_limit(raw: Option<raw::RawRateLimit>) -> Result<RateLimitConfig, ConfigError> {
    let raw = raw.unwrap_or(raw::RawRateLimit {
        per_ip: None,
        per_user: None,
        window_secs: None,
        redis_url: None,
        redis_pool_size: None,
    });

    let per_ip = raw.per_ip.unwrap_or(DEFAULT_PER_IP);
    let per_user = raw.per_user.unwrap_or(DEFAULT_PER_USER);
    let window_secs = raw.window_secs.unwrap_or(DEFAULT_WINDOW_SECS);
    let redis_pool_size = raw.redis_pool_size.unwrap_or(DEFAULT_REDIS_POOL_SIZE);

    if per_ip == 0 || per_user == 0 {
        return Err(ConfigError::Validation(
            "rate_limit per_ip and per_user must be >= 1".into(),
        ));
    }
    if window_secs == 0 {
        return Err(ConfigError::Validation(
            "rate_limit window_secs must be >= 1".into(),
        ));
    }
    if redis_pool_size == 0 {
        return Err(ConfigError::Validation(
            "rate_limit redis_pool_size must be >= 1".into(),
        ));
    }

    // An interpolated empty URL means "no shared store".
    let redis_url = resolve_optional(raw.redis_url)?
        .filter(|url| !url.trim().is_empty())
        .map(Secret::new);

    Ok(RateLimitConfig {
        per_ip,
        per_user,
        window_secs,
        redis_url,
        redis_pool_size,
    })
}

fn build_generation(raw: raw::RawGeneration) -> Result<GenerationConfig, ConfigError> {
    let base_url = match raw.base_url {
        Some(url) => resolve_variables(&url)?,
        None => DEFAULT_BASE_URL.to_string(),
    };
    let api_key = resolve_optional(raw.api_key)?
        .filter(|key| !key.is_empty())
        .map(Secret::new);

    let default_temperature = raw.default_temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=MAX_TEMPERATURE).contains(&default_temperature) {
        return Err(ConfigError::Validation(format!(
            "generation default_temperature must be in [0.0, {MAX_TEMPERATURE}], got {default_temperature}"
        )));
    }
    let default_max_tokens = raw.default_max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if !(1..=MAX_TOKENS_CEILING).contains(&default_max_tokens) {
        return Err(ConfigError::Validation(format!(
            "generation default_max_tokens must be in [1, {MAX_TOKENS_CEILING}], got {default_max_tokens}"
        )));
    }

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_GENERATION_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "generation timeout_ms must be > 0".into(),
        ));
    }

    Ok(GenerationConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key,
        timeout_ms,
        history_window: raw.history_window.unwrap_or(DEFAULT_HISTORY_WINDOW),
        default_temperature,
        default_max_tokens,
        models: build_models(raw.models)?,
    })
}

fn build_models(raw: raw::RawModels) -> Result<ModelIds, ConfigError> {
    fn required(role: &str, value: Option<String>) -> Result<String, ConfigError> {
        let value = resolve_optional(value)?.unwrap_or_default();
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "generation.models.{role} is required"
            )));
        }
        Ok(value)
    }

    Ok(ModelIds {
        theory: required("theory", raw.theory)?,
        code: required("code", raw.code)?,
        math: required("math", raw.math)?,
        safety: required("safety", raw.safety)?,
    })
}

fn build_safety(raw: Option<raw::RawSafety>) -> Result<SafetyConfig, ConfigError> {
    let (primary, secondary) = match raw {
        Some(r) => (r.primary, r.secondary),
        None => (None, None),
    };

    let primary = PrimarySafetyConfig {
        enabled: primary.as_ref().map(|p| p.enabled).unwrap_or(true),
        max_tokens: primary
            .and_then(|p| p.max_tokens)
            .unwrap_or(DEFAULT_SAFETY_MAX_TOKENS),
    };

    let secondary = secondary
        .map(|s| {
            let api_key = resolve_variables(&s.api_key)?;
            if api_key.is_empty() {
                return Ok(None);
            }
            let poll_interval_ms = s.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
            let max_poll_attempts = s.max_poll_attempts.unwrap_or(DEFAULT_MAX_POLL_ATTEMPTS);
            if max_poll_attempts == 0 {
                return Err(ConfigError::Validation(
                    "safety.secondary max_poll_attempts must be >= 1".into(),
                ));
            }
            Ok(Some(SecondarySafetyConfig {
                api_url: resolve_optional(s.api_url)?
                    .unwrap_or_else(|| DEFAULT_SECONDARY_API_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_key: Secret::new(api_key),
                model_version: resolve_optional(s.model_version)?
                    .unwrap_or_else(|| DEFAULT_SECONDARY_MODEL_VERSION.to_string()),
                timeout_ms: s.timeout_ms.unwrap_or(DEFAULT_SECONDARY_TIMEOUT_MS),
                poll_interval_ms,
                max_poll_attempts,
            }))
        })
        .transpose()?
        .flatten();

    Ok(SafetyConfig { primary, secondary })
}

fn build_stream(raw: Option<raw::RawStream>) -> Result<StreamConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(StreamConfig {
            suppressed_tags: default_tag_pairs(),
        });
    };

    let mut suppressed_tags = if raw.use_default_tags != Some(false) {
        default_tag_pairs()
    } else {
        Vec::new()
    };
    for pair in raw.suppressed_tags {
        if pair.open.is_empty() || pair.close.is_empty() {
            return Err(ConfigError::Validation(
                "stream.suppressed_tags entries need non-empty open and close".into(),
            ));
        }
        if !pair.open.is_ascii() || !pair.close.is_ascii() {
            return Err(ConfigError::Validation(format!(
                "stream tag pair {} / {} must be ASCII",
                pair.open, pair.close
            )));
        }
        suppressed_tags.push(TagPair::new(pair.open, pair.close));
    }
    if suppressed_tags.is_empty() {
        return Err(ConfigError::Validation(
            "stream.suppressed_tags is empty and defaults are disabled".into(),
        ));
    }

    Ok(StreamConfig { suppressed_tags })
}

fn build_identity(raw: Option<raw::RawIdentity>) -> Result<IdentityConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(IdentityConfig {
            enabled: true,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            patterns: default_identity_patterns()?,
        });
    };

    let patterns = if raw.patterns.is_empty() {
        default_identity_patterns()?
    } else {
        raw.patterns
            .iter()
            .map(|p| CompiledPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(IdentityConfig {
        enabled: raw.enabled,
        display_name: raw
            .display_name
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
        patterns,
    })
}

fn build_server(raw: Option<raw::RawServer>) -> Result<ServerConfig, ConfigError> {
    let (bind, port) = match raw {
        Some(r) => (r.bind, r.port),
        None => (None, None),
    };
    let bind_str = bind.unwrap_or_else(|| DEFAULT_BIND.to_string());
    let bind: IpAddr = bind_str.parse().map_err(|_| {
        ConfigError::Validation(format!("server.bind \"{bind_str}\" is not an IP address"))
    })?;
    Ok(ServerConfig {
        bind,
        port: port.unwrap_or(DEFAULT_PORT),
    })
}
