// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Turn orchestrator tests

use super::*;
use crate::config::CompiledPattern;
use crate::generation::{Completion, FragmentStream, Usage};
use crate::ratelimit::SubjectKind;
use crate::routing::RoutingSource;
use crate::safety::{SafetyError, Speaker};
use async_trait::async_trait;
use futures_util::stream;
use std::sync::Mutex;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Script {
    Text(String),
    Fragments(Vec<Result<String, GenerationError>>),
    /// Yields the fragments, then never finishes.
    Hang(Vec<String>),
    Fail(GenerationError),
}

struct ScriptedGenerator {
    script: Script,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn text(text: &str) -> Arc<Self> {
        Self::new(Script::Text(text.to_string()))
    }

    fn fragments(parts: &[&str]) -> Arc<Self> {
        Self::new(Script::Fragments(
            parts.iter().map(|p| Ok(p.to_string())).collect(),
        ))
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> GenerationRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, request: GenerationRequest) -> Result<Completion, GenerationError> {
        self.requests.lock().unwrap().push(request);
        match &self.script {
            Script::Text(text) => Ok(Completion {
                text: text.clone(),
                usage: Some(Usage {
                    prompt_tokens: 12,
                    completion_tokens: 5,
                    total_tokens: 17,
                }),
            }),
            Script::Fragments(parts) => Ok(Completion {
                text: parts.iter().filter_map(|p| p.clone().ok()).collect(),
                usage: None,
            }),
            Script::Hang(_) => Err(GenerationError::Timeout),
            Script::Fail(e) => Err(e.clone()),
        }
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, GenerationError> {
        self.requests.lock().unwrap().push(request);
        match &self.script {
            Script::Text(text) => Ok(Box::pin(stream::iter(vec![Ok(text.clone())]))),
            Script::Fragments(parts) => Ok(Box::pin(stream::iter(parts.clone()))),
            Script::Hang(parts) => {
                let head: Vec<Result<String, GenerationError>> =
                    parts.iter().cloned().map(Ok).collect();
                Ok(Box::pin(stream::iter(head).chain(stream::pending())))
            }
            Script::Fail(e) => Err(e.clone()),
        }
    }
}

/// Separate verdicts for user input and model output; records every call.
struct ScriptedClassifier {
    input: Result<SafetyVerdict, ()>,
    output: Result<SafetyVerdict, ()>,
    calls: Mutex<Vec<Speaker>>,
}

impl ScriptedClassifier {
    fn new(input: Result<SafetyVerdict, ()>, output: Result<SafetyVerdict, ()>) -> Arc<Self> {
        Arc::new(Self {
            input,
            output,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn allow_all() -> Arc<Self> {
        Self::new(Ok(SafetyVerdict::allow("SAFETY_OK")), Ok(SafetyVerdict::allow("SAFETY_OK")))
    }

    fn output_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|s| **s == Speaker::Assistant)
            .count()
    }
}

#[async_trait]
impl SafetyClassifier for ScriptedClassifier {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn classify(&self, _text: &str, speaker: Speaker) -> Result<SafetyVerdict, SafetyError> {
        self.calls.lock().unwrap().push(speaker);
        let scripted = match speaker {
            Speaker::User => &self.input,
            Speaker::Assistant => &self.output,
        };
        scripted
            .clone()
            .map_err(|_| SafetyError::Unavailable("scripted outage".into()))
    }
}

fn blocked() -> SafetyVerdict {
    SafetyVerdict::deny(
        ["unsafe"],
        Some("Content flagged by safety classifier".into()),
        "SAFETY_BLOCKED",
    )
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    orchestrator: TurnOrchestrator,
    history: Arc<InMemoryHistoryStore>,
    generator: Arc<ScriptedGenerator>,
    classifier: Arc<ScriptedClassifier>,
    counters: Arc<InMemoryCounterStore>,
}

fn generous() -> RatePolicy {
    RatePolicy {
        per_ip: 100,
        per_user: 100,
        window: Duration::from_secs(60),
    }
}

fn harness_with(
    generator: Arc<ScriptedGenerator>,
    classifier: Arc<ScriptedClassifier>,
    settings: TurnSettings,
    policy: RatePolicy,
) -> Harness {
    let history = Arc::new(InMemoryHistoryStore::new());
    let counters = Arc::new(InMemoryCounterStore::new());
    let deps = TurnDeps {
        rate_limiter: Arc::new(RateLimiter::new(counters.clone(), policy)),
        classifier: Arc::new(IntentClassifier::new().unwrap()),
        safety: Arc::new(SafetyGate::new(Some(classifier.clone()), None)),
        generator: generator.clone(),
        history: history.clone(),
        settings,
    };
    Harness {
        orchestrator: TurnOrchestrator::new_with(deps),
        history,
        generator,
        classifier,
        counters,
    }
}

fn harness(generator: Arc<ScriptedGenerator>) -> Harness {
    harness_with(
        generator,
        ScriptedClassifier::allow_all(),
        TurnSettings::default(),
        generous(),
    )
}

fn alice() -> Caller {
    Caller {
        ip: "203.0.113.7".into(),
        user_id: "alice".into(),
    }
}

async fn collect(stream: TurnEventStream) -> Vec<TurnEvent> {
    stream.collect().await
}

fn chunks(events: &[TurnEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Non-streaming turns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn code_turn_persists_user_assistant_and_decision() {
    let h = harness(ScriptedGenerator::text("Use **enumerate**."));
    let outcome = h
        .orchestrator
        .run(&alice(), TurnRequest::new("def parse(x): return x"))
        .await
        .unwrap();

    assert_eq!(outcome.routing.specialist, Specialist::Code);
    assert_eq!(outcome.routing.source, RoutingSource::Auto);
    assert_eq!(outcome.content, "Use enumerate.");

    let messages = h.history.messages(outcome.conversation_id);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "def parse(x): return x");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].id, outcome.message_id);

    let decision = h.history.routing_decision(outcome.message_id).unwrap();
    assert_eq!(decision.endpoint, "code-specialist");
    assert_eq!(decision.strategy, "moe");
    assert_eq!(decision.confidence, 0.75);
    assert_eq!(decision.source, RoutingSource::Auto);

    assert_eq!(messages[0].metrics, MessageMetrics::default());
    assert!(messages[1].metrics.latency_ms.is_some());
    assert_eq!(messages[1].metrics.tokens_in, Some(12));
    assert_eq!(messages[1].metrics.tokens_out, Some(5));

    let request = h.generator.last_request();
    assert_eq!(request.role, ModelRole::Specialist(Specialist::Code));
    assert_eq!(request.temperature, 0.7);
    assert_eq!(request.max_tokens, 2048);
}

#[tokio::test]
async fn reasoning_is_removed_from_non_streamed_answer() {
    let h = harness(ScriptedGenerator::text(
        "<think>the user wants a definition</think>Entropy measures uncertainty.",
    ));
    let outcome = h
        .orchestrator
        .run(&alice(), TurnRequest::new("What is entropy"))
        .await
        .unwrap();
    assert_eq!(outcome.content, "Entropy measures uncertainty.");
}

#[tokio::test]
async fn output_deny_persists_redaction_notice() {
    let classifier = ScriptedClassifier::new(Ok(SafetyVerdict::allow("SAFETY_OK")), Ok(blocked()));
    let h = harness_with(
        ScriptedGenerator::text("something harmful"),
        classifier,
        TurnSettings::default(),
        generous(),
    );

    let outcome = h
        .orchestrator
        .run(&alice(), TurnRequest::new("tell me something"))
        .await
        .unwrap();

    assert_eq!(outcome.content, REDACTION_NOTICE);
    assert!(outcome.safety_labels.contains("unsafe"));
    let stored = h.history.messages(outcome.conversation_id);
    assert_eq!(stored[1].content, REDACTION_NOTICE);
    assert!(h.history.routing_decision(outcome.message_id).is_some());
}

#[tokio::test]
async fn input_deny_rejects_without_persisting() {
    let classifier = ScriptedClassifier::new(Ok(blocked()), Ok(SafetyVerdict::allow("SAFETY_OK")));
    let h = harness_with(
        ScriptedGenerator::text("unused"),
        classifier,
        TurnSettings::default(),
        generous(),
    );

    let err = h
        .orchestrator
        .run(&alice(), TurnRequest::new("something bad"))
        .await
        .unwrap_err();

    assert!(matches!(&err, TurnError::UnsafeInput(v) if v.reference_code == "SAFETY_BLOCKED"));
    assert_eq!(err.reference_code(), Some("SAFETY_BLOCKED"));
    assert_eq!(h.history.conversation_count(), 0);
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn whitespace_message_rejected_with_empty_input_code() {
    let h = harness(ScriptedGenerator::text("unused"));
    let err = h
        .orchestrator
        .run(&alice(), TurnRequest::new("   "))
        .await
        .unwrap_err();
    assert_eq!(err.reference_code(), Some("SAFETY_001"));
    assert!(h.classifier.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rate_limit_rejects_before_safety() {
    let policy = RatePolicy {
        per_ip: 1,
        per_user: 100,
        window: Duration::from_secs(60),
    };
    let h = harness_with(
        ScriptedGenerator::text("ok"),
        ScriptedClassifier::allow_all(),
        TurnSettings::default(),
        policy,
    );

    h.orchestrator.run(&alice(), TurnRequest::new("hi")).await.unwrap();
    let calls_before = h.classifier.calls.lock().unwrap().len();

    let err = h
        .orchestrator
        .run(&alice(), TurnRequest::new("hi again"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TurnError::RateLimited(RateLimited {
            kind: SubjectKind::Ip
        })
    ));
    assert_eq!(h.classifier.calls.lock().unwrap().len(), calls_before);
}

#[tokio::test]
async fn generation_failure_keeps_user_message() {
    let h = harness(ScriptedGenerator::new(Script::Fail(GenerationError::Upstream {
        status: 503,
        message: "[model] overloaded".into(),
    })));

    let err = h
        .orchestrator
        .run(&alice(), TurnRequest::new("hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, TurnError::GenerationFailure(_)));
    assert_eq!(err.public_message(), "the model is temporarily unavailable");
    assert_eq!(h.history.conversation_count(), 1);
}

#[tokio::test]
async fn foreign_conversation_is_not_found() {
    let h = harness(ScriptedGenerator::text("ok"));
    let first = h
        .orchestrator
        .run(&alice(), TurnRequest::new("hello"))
        .await
        .unwrap();

    let mallory = Caller {
        ip: "198.51.100.1".into(),
        user_id: "mallory".into(),
    };
    let request = TurnRequest {
        conversation_id: Some(first.conversation_id),
        ..TurnRequest::new("let me in")
    };
    let err = h.orchestrator.run(&mallory, request).await.unwrap_err();
    assert!(matches!(err, TurnError::ConversationNotFound));
    assert_eq!(h.history.messages(first.conversation_id).len(), 2);
}

#[tokio::test]
async fn history_is_oldest_first_and_excludes_current_message() {
    let h = harness(ScriptedGenerator::text("answer"));
    let first = h
        .orchestrator
        .run(&alice(), TurnRequest::new("first question"))
        .await
        .unwrap();

    let follow_up = TurnRequest {
        conversation_id: Some(first.conversation_id),
        ..TurnRequest::new("second question")
    };
    h.orchestrator.run(&alice(), follow_up).await.unwrap();

    let messages = h.generator.last_request().messages;
    let shape: Vec<(Role, &str)> = messages
        .iter()
        .skip(1)
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(
        shape,
        vec![
            (Role::User, "first question"),
            (Role::Assistant, "answer"),
            (Role::User, "second question"),
        ]
    );
}

#[tokio::test]
async fn history_window_bounds_context() {
    let settings = TurnSettings {
        history_window: 2,
        ..TurnSettings::default()
    };
    let h = harness_with(
        ScriptedGenerator::text("a"),
        ScriptedClassifier::allow_all(),
        settings,
        generous(),
    );

    let first = h.orchestrator.run(&alice(), TurnRequest::new("q1")).await.unwrap();
    for q in ["q2", "q3"] {
        let req = TurnRequest {
            conversation_id: Some(first.conversation_id),
            ..TurnRequest::new(q)
        };
        h.orchestrator.run(&alice(), req).await.unwrap();
    }

    let contents: Vec<String> = h
        .generator
        .last_request()
        .messages
        .into_iter()
        .skip(1)
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["q2", "a", "q3"]);
}

#[tokio::test]
async fn unrecognised_model_falls_back_to_theory() {
    let h = harness(ScriptedGenerator::text("ok"));
    let request = TurnRequest {
        model: Some("gpt-4".into()),
        ..TurnRequest::new("def parse(x): return x")
    };
    let outcome = h.orchestrator.run(&alice(), request).await.unwrap();
    assert_eq!(outcome.routing.specialist, Specialist::Theory);
    assert_eq!(outcome.routing.confidence, 0.5);
    assert_eq!(outcome.routing.source, RoutingSource::Fallback);

    let decision = h.history.routing_decision(outcome.message_id).unwrap();
    assert_eq!(decision.source, RoutingSource::Fallback);
    assert_eq!(decision.endpoint, "theory-specialist");
}

#[tokio::test]
async fn strict_mode_rejects_unknown_specialist_before_remote_calls() {
    let settings = TurnSettings {
        strict_model_selection: true,
        ..TurnSettings::default()
    };
    let h = harness_with(
        ScriptedGenerator::text("unused"),
        ScriptedClassifier::allow_all(),
        settings,
        generous(),
    );

    let request = TurnRequest {
        model: Some("gpt-4".into()),
        ..TurnRequest::new("hello")
    };
    let err = h.orchestrator.run(&alice(), request).await.unwrap_err();

    assert!(matches!(err, TurnError::UnknownSpecialist(_)));
    assert!(h.counters.is_empty());
    assert!(h.classifier.calls.lock().unwrap().is_empty());
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn explicit_specialist_is_honoured() {
    let h = harness(ScriptedGenerator::text("ok"));
    let request = TurnRequest {
        model: Some("math-specialist".into()),
        ..TurnRequest::new("explain overfitting")
    };
    let outcome = h.orchestrator.run(&alice(), request).await.unwrap();
    assert_eq!(outcome.routing.specialist, Specialist::Math);
    assert_eq!(outcome.routing.confidence, 1.0);
    assert_eq!(
        h.generator.last_request().role,
        ModelRole::Specialist(Specialist::Math)
    );
    let decision = h.history.routing_decision(outcome.message_id).unwrap();
    assert_eq!(decision.source, RoutingSource::Explicit);
}

#[test]
fn parameter_ranges_are_enforced() {
    let h = harness(ScriptedGenerator::text("ok"));
    let o = &h.orchestrator;

    let params = o.resolve_params(&TurnRequest::new("hi")).unwrap();
    assert_eq!(params, TurnParams { temperature: 0.7, max_tokens: 2048 });

    for request in [
        TurnRequest::new(""),
        TurnRequest::new("x".repeat(MAX_MESSAGE_CHARS + 1)),
        TurnRequest {
            temperature: Some(2.5),
            ..TurnRequest::new("hi")
        },
        TurnRequest {
            temperature: Some(-0.1),
            ..TurnRequest::new("hi")
        },
        TurnRequest {
            max_tokens: Some(0),
            ..TurnRequest::new("hi")
        },
        TurnRequest {
            max_tokens: Some(8193),
            ..TurnRequest::new("hi")
        },
    ] {
        assert!(
            matches!(o.resolve_params(&request), Err(TurnError::InvalidRequest(_))),
            "accepted {request:?}"
        );
    }

    let edge = TurnRequest {
        temperature: Some(2.0),
        max_tokens: Some(8192),
        ..TurnRequest::new("x".repeat(MAX_MESSAGE_CHARS))
    };
    assert!(o.resolve_params(&edge).is_ok());
}

fn identity_settings() -> TurnSettings {
    let patterns = vec![CompiledPattern::compile("who.*are.*you").unwrap()];
    TurnSettings {
        identity: Some(IdentityResponder::new("DatAI", patterns)),
        ..TurnSettings::default()
    }
}

#[tokio::test]
async fn identity_inquiry_skips_generation() {
    let h = harness_with(
        ScriptedGenerator::text("I am a large model from a vendor"),
        ScriptedClassifier::allow_all(),
        identity_settings(),
        generous(),
    );

    let outcome = h
        .orchestrator
        .run(&alice(), TurnRequest::new("Who are you?"))
        .await
        .unwrap();

    assert!(outcome.content.starts_with("I am DatAI"));
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.classifier.output_calls(), 1);
    assert!(h.history.routing_decision(outcome.message_id).is_some());
}

#[tokio::test]
async fn answer_filtered_to_nothing_is_redacted_as_empty() {
    let h = harness(ScriptedGenerator::text("<think>only reasoning</think>"));
    let outcome = h
        .orchestrator
        .run(&alice(), TurnRequest::new("hello"))
        .await
        .unwrap();
    assert_eq!(outcome.content, REDACTION_NOTICE);
    assert!(outcome.safety_labels.contains("empty"));
}

#[tokio::test]
async fn classifier_outage_is_degraded_but_allowed() {
    let classifier = ScriptedClassifier::new(Err(()), Err(()));
    let h = harness_with(
        ScriptedGenerator::text("fine"),
        classifier,
        TurnSettings::default(),
        generous(),
    );

    let outcome = h
        .orchestrator
        .run(&alice(), TurnRequest::new("hello"))
        .await
        .unwrap();
    assert_eq!(outcome.content, "fine");
    assert!(outcome.safety_labels.contains("degraded"));
    let stored = h.history.messages(outcome.conversation_id);
    assert!(stored[0].safety_labels.contains("degraded"));
}

// ---------------------------------------------------------------------------
// Streaming turns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_emits_metadata_chunks_done_in_order() {
    let h = harness(ScriptedGenerator::fragments(&[
        "<thi",
        "nking>secret</thinking>Hello ",
        "world",
    ]));
    let events = collect(
        h.orchestrator
            .run_stream(alice(), TurnRequest::new("def parse(x): return x")),
    )
    .await;

    let TurnEvent::Metadata {
        conversation_id,
        message_id,
        model,
    } = events[0].clone()
    else {
        panic!("first event was {:?}", events[0]);
    };
    assert_eq!(model, Specialist::Code);
    assert_eq!(chunks(&events), "Hello world");
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let stored = h.history.messages(conversation_id);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].id, message_id);
    assert_eq!(stored[1].content, "Hello world");
    assert!(stored[1].metrics.latency_ms.is_some());
    assert_eq!(stored[1].metrics.tokens_in, None);
    assert_eq!(stored[1].metrics.tokens_out, None);
}

#[tokio::test]
async fn stream_output_deny_emits_safety_redacted() {
    let classifier = ScriptedClassifier::new(Ok(SafetyVerdict::allow("SAFETY_OK")), Ok(blocked()));
    let h = harness_with(
        ScriptedGenerator::fragments(&["bad ", "things"]),
        classifier,
        TurnSettings::default(),
        generous(),
    );

    let events = collect(h.orchestrator.run_stream(alice(), TurnRequest::new("hello"))).await;

    let redacted: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::SafetyRedacted { .. }))
        .collect();
    assert_eq!(
        redacted,
        vec![&TurnEvent::SafetyRedacted {
            content: REDACTION_NOTICE.to_string()
        }]
    );
    let Some(TurnEvent::Done { message_id }) = events.last().cloned() else {
        panic!("missing done: {events:?}");
    };
    let TurnEvent::Metadata {
        conversation_id, ..
    } = events[0].clone()
    else {
        panic!("missing metadata");
    };
    let stored = h.history.messages(conversation_id);
    assert_eq!(stored[1].id, message_id);
    assert_eq!(stored[1].content, REDACTION_NOTICE);
}

#[tokio::test]
async fn stream_rejection_is_a_single_error_event() {
    let classifier = ScriptedClassifier::new(Ok(blocked()), Ok(SafetyVerdict::allow("SAFETY_OK")));
    let h = harness_with(
        ScriptedGenerator::text("unused"),
        classifier,
        TurnSettings::default(),
        generous(),
    );

    let events = collect(h.orchestrator.run_stream(alice(), TurnRequest::new("bad"))).await;
    assert_eq!(
        events,
        vec![TurnEvent::Error {
            error: "Input flagged by safety policy".into(),
            reference_code: Some("SAFETY_BLOCKED".into()),
        }]
    );
}

#[tokio::test]
async fn stream_generation_error_ends_with_error_and_keeps_user_message() {
    let h = harness(ScriptedGenerator::new(Script::Fragments(vec![
        Ok("partial ".into()),
        Err(GenerationError::Transport("connection reset".into())),
    ])));

    let events = collect(h.orchestrator.run_stream(alice(), TurnRequest::new("hello"))).await;

    assert_eq!(chunks(&events), "partial ");
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Error { reference_code: None, .. })
    ));
    let TurnEvent::Metadata {
        conversation_id, ..
    } = events[0].clone()
    else {
        panic!("missing metadata");
    };
    let stored = h.history.messages(conversation_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
}

#[tokio::test]
async fn cancelled_stream_skips_output_check_and_assistant_write() {
    let h = harness(ScriptedGenerator::new(Script::Hang(vec!["Hello".into()])));

    let mut events = h.orchestrator.run_stream(alice(), TurnRequest::new("hello"));
    let Some(TurnEvent::Metadata {
        conversation_id, ..
    }) = events.next().await
    else {
        panic!("missing metadata");
    };
    assert_eq!(
        events.next().await,
        Some(TurnEvent::Chunk {
            content: "Hello".into()
        })
    );
    drop(events);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = h.history.messages(conversation_id);
    assert_eq!(stored.len(), 1, "only the user message stays");
    assert_eq!(h.classifier.output_calls(), 0);
}

#[tokio::test]
async fn stream_identity_answer_is_chunked_words() {
    let h = harness_with(
        ScriptedGenerator::text("unused"),
        ScriptedClassifier::allow_all(),
        identity_settings(),
        generous(),
    );

    let events = collect(h.orchestrator.run_stream(alice(), TurnRequest::new("who are you"))).await;
    let answer = chunks(&events);
    assert_eq!(
        answer,
        "I am DatAI, an AI assistant here to help you with your questions. How can I assist you today?"
    );
    assert!(events.iter().filter(|e| matches!(e, TurnEvent::Chunk { .. })).count() > 1);
    assert_eq!(h.generator.calls(), 0);
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[test]
fn events_serialize_type_tagged() {
    let id = Uuid::nil();
    let meta = serde_json::to_value(TurnEvent::Metadata {
        conversation_id: id,
        message_id: id,
        model: Specialist::Math,
    })
    .unwrap();
    assert_eq!(meta["type"], "metadata");
    assert_eq!(meta["model"], "math-specialist");

    let err = serde_json::to_value(TurnEvent::Error {
        error: "Rate limit exceeded".into(),
        reference_code: None,
    })
    .unwrap();
    assert_eq!(err, serde_json::json!({"type": "error", "error": "Rate limit exceeded"}));

    let redacted = serde_json::to_value(TurnEvent::SafetyRedacted {
        content: REDACTION_NOTICE.into(),
    })
    .unwrap();
    assert_eq!(redacted["type"], "safety_redacted");
}

#[test]
fn request_deserializes_with_optional_fields() {
    let req: TurnRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
    assert_eq!(req, TurnRequest::new("hi"));

    let req: TurnRequest = serde_json::from_str(
        r#"{"message": "hi", "model": "code", "temperature": 0.2, "max_tokens": 64}"#,
    )
    .unwrap();
    assert_eq!(req.model.as_deref(), Some("code"));
    assert_eq!(req.max_tokens, Some(64));
}
