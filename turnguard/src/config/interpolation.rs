// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Resolves `${VAR}` and `${VAR:-fallback}` references from the environment.
///
/// A bare `${VAR}` whose variable is unset fails with
/// `ConfigError::UndefinedVariable`. With `:-` the fallback text is used
/// when the variable is unset or empty.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut body = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                body.push(c);
            }
            if !found_close || body.is_empty() {
                // Malformed interpolation -- treat literally
                result.push('$');
                result.push('{');
                result.push_str(&body);
                continue;
            }
            let (name, fallback) = match body.split_once(":-") {
                Some((name, fallback)) => (name, Some(fallback)),
                None => (body.as_str(), None),
            };
            match (std::env::var(name), fallback) {
                (Ok(value), Some(fallback)) if value.is_empty() => result.push_str(fallback),
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(fallback)) => result.push_str(fallback),
                (Err(_), None) => {
                    return Err(ConfigError::UndefinedVariable {
                        name: name.to_string(),
                    })
                }
            }
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Interpolate an optional field, passing `None` through.
pub fn resolve_optional(input: Option<String>) -> Result<Option<String>, ConfigError> {
    input.map(|s| resolve_variables(&s)).transpose()
}
