// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Secondary classifier -- hosted Llama Guard via a predict-then-poll API
//
// Responsibilities:
// - Build the hazard-taxonomy prompt for a user or assistant turn
// - Submit a prediction, poll until it settles or attempts run out
// - Parse "safe" / "unsafe\nS1,S9" into a verdict

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SecondarySafetyConfig;

use super::{SafetyClassifier, SafetyError, SafetyVerdict, Speaker};

pub const SAFE_CODE: &str = "LLAMAGUARD_SAFE";
pub const UNSAFE_CODE: &str = "LLAMAGUARD_UNSAFE";

const MAX_NEW_TOKENS: u32 = 100;

/// Llama Guard 3 hazard taxonomy.
pub const HAZARD_CATEGORIES: &[(&str, &str)] = &[
    ("S1", "Violent Crimes"),
    ("S2", "Non-Violent Crimes"),
    ("S3", "Sex-Related Crimes"),
    ("S4", "Child Sexual Exploitation"),
    ("S5", "Defamation"),
    ("S6", "Specialized Advice"),
    ("S7", "Privacy"),
    ("S8", "Intellectual Property"),
    ("S9", "Indiscriminate Weapons"),
    ("S10", "Hate"),
    ("S11", "Suicide & Self-Harm"),
    ("S12", "Sexual Content"),
    ("S13", "Elections"),
    ("S14", "Code Interpreter Abuse"),
];

fn category_name(code: &str) -> Option<&'static str> {
    HAZARD_CATEGORIES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

// ---------------------------------------------------------------------------
// Prompt and parsing
// ---------------------------------------------------------------------------

fn build_prompt(text: &str, speaker: Speaker) -> String {
    let role = match speaker {
        Speaker::User => "User",
        Speaker::Assistant => "Agent",
    };
    let categories: String = HAZARD_CATEGORIES
        .iter()
        .map(|(code, name)| format!("{code}: {name}.\n"))
        .collect();

    format!(
        "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n\
         Task: Check if there is unsafe content in '{role}' messages in conversations \
         according to our safety policy with the below categories.\n\n\
         <BEGIN UNSAFE CONTENT CATEGORIES>\n\
         {categories}\
         <END UNSAFE CONTENT CATEGORIES>\n\n\
         <BEGIN CONVERSATION>\n\n{role}: {text}\n\n<END CONVERSATION>\n\n\
         Provide your safety assessment for ONLY THE LAST {role} message in the above conversation:\n\
         - First line must read 'safe' or 'unsafe'.\n\
         - If unsafe, a second line must include a comma-separated list of violated categories.\
         <|eot_id|><|start_header_id|>assistant<|end_header_id|>"
    )
}

/// Read a classifier reply. The first line decides; the second, when
/// present, lists violated category codes. Unknown codes are dropped.
pub fn parse_guard_output(output: &str) -> Result<SafetyVerdict, SafetyError> {
    let lowered = output.trim().to_lowercase();
    let mut lines = lowered.lines().map(str::trim);

    match lines.next() {
        Some("safe") => Ok(SafetyVerdict::allow(SAFE_CODE)),
        Some("unsafe") => {
            let codes: Vec<String> = lines
                .next()
                .unwrap_or_default()
                .split(',')
                .map(|c| c.trim().to_uppercase())
                .filter(|c| category_name(c).is_some())
                .collect();

            if codes.is_empty() {
                return Ok(SafetyVerdict::deny(["unsafe"], None, UNSAFE_CODE));
            }

            let names: Vec<&str> = codes.iter().filter_map(|c| category_name(c)).collect();
            let reason = format!("Violated: {}", names.join(", "));
            Ok(SafetyVerdict::deny(codes, Some(reason), UNSAFE_CODE))
        }
        _ => Err(SafetyError::Malformed(
            lowered.chars().take(64).collect::<String>(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

/// Outputs arrive either as one string or as a list of token strings.
fn output_text(output: Option<serde_json::Value>) -> String {
    match output {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Array(parts)) => parts
            .iter()
            .map(|p| match p {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

enum PollState {
    Done(String),
    Pending,
}

fn settle(prediction: Prediction) -> Result<PollState, SafetyError> {
    match prediction.status.as_deref() {
        Some("succeeded") => Ok(PollState::Done(output_text(prediction.output))),
        Some("failed") => Err(SafetyError::Unavailable(format!(
            "prediction failed: {}",
            prediction
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        ))),
        Some("canceled") => Err(SafetyError::Unavailable("prediction canceled".to_string())),
        _ => Ok(PollState::Pending),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct LlamaGuardClassifier {
    client: reqwest::Client,
    config: SecondarySafetyConfig,
}

impl LlamaGuardClassifier {
    pub fn new(config: SecondarySafetyConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: SecondarySafetyConfig) -> Self {
        Self { client, config }
    }

    async fn predict_and_poll(&self, prompt: String) -> Result<String, SafetyError> {
        let body = serde_json::json!({
            "version": self.config.model_version,
            "input": {
                "prompt": prompt,
                "max_new_tokens": MAX_NEW_TOKENS,
                "temperature": 0.0,
            },
        });

        let created: Prediction = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(self.config.api_key.expose())
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SafetyError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| SafetyError::Malformed(e.to_string()))?;

        let poll_url = match (&created.urls, &created.id) {
            (Some(PredictionUrls { get: Some(url) }), _) => url.clone(),
            (_, Some(id)) => format!("{}/{}", self.config.api_url.trim_end_matches('/'), id),
            _ => String::new(),
        };

        if let PollState::Done(text) = settle(created)? {
            return Ok(text);
        }
        if poll_url.is_empty() {
            return Err(SafetyError::Malformed(
                "prediction has neither id nor poll url".to_string(),
            ));
        }

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        for attempt in 0..self.config.max_poll_attempts {
            let prediction: Prediction = self
                .client
                .get(&poll_url)
                .bearer_auth(self.config.api_key.expose())
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| SafetyError::Unavailable(e.to_string()))?
                .json()
                .await
                .map_err(|e| SafetyError::Malformed(e.to_string()))?;

            match settle(prediction)? {
                PollState::Done(text) => return Ok(text),
                PollState::Pending => {
                    tracing::debug!(attempt, "prediction pending");
                    tokio::time::sleep(interval).await;
                }
            }
        }

        Err(SafetyError::Timeout)
    }
}

#[async_trait]
impl SafetyClassifier for LlamaGuardClassifier {
    fn name(&self) -> &'static str {
        "llama_guard"
    }

    async fn classify(&self, text: &str, speaker: Speaker) -> Result<SafetyVerdict, SafetyError> {
        let budget = Duration::from_millis(self.config.timeout_ms);
        let output = tokio::time::timeout(budget, self.predict_and_poll(build_prompt(text, speaker)))
            .await
            .map_err(|_| SafetyError::Timeout)??;
        parse_guard_output(&output)
    }
}
