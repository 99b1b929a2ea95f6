// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Turn orchestration -- one user message in, one answer out
//
// Responsibilities:
// - Admit, screen input, route, generate, screen output, persist
// - Non-streaming result and the streamed event sequence
// - Identity inquiries answered without a model call
// - A client that goes away mid-stream stops the turn before the output check

mod identity;

pub use identity::IdentityResponder;

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::{default_tag_pairs, Config, MAX_TEMPERATURE, MAX_TOKENS_CEILING};
use crate::generation::{
    system_prompt, GenerationError, GenerationRequest, Generator, ModelRegistry, ModelRole,
    OpenAiCompatibleGenerator, Usage,
};
use crate::history::{
    conversation_title, HistoryError, HistoryStore, InMemoryHistoryStore, MessageMetrics,
};
use crate::message::{ChatMessage, Role};
use crate::ratelimit::{
    CounterStore, CounterStoreError, InMemoryCounterStore, RateLimited, RateLimiter, RatePolicy,
    RedisCounterStore,
};
use crate::routing::{
    IntentClassifier, ModelSelection, RoutingDecision, Specialist, UnknownSpecialist,
};
use crate::safety::{
    ChatSafetyClassifier, LlamaGuardClassifier, SafetyClassifier, SafetyGate, SafetyVerdict,
};
use crate::stream::{clean_response, filter_stream, TagPair};

/// Stored and returned in place of an answer the output check denied.
pub const REDACTION_NOTICE: &str = "[This response was redacted by safety policy.]";

pub const MAX_MESSAGE_CHARS: usize = 10_000;

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Admitted,
    InputChecked,
    Routed,
    Generated,
    OutputChecked,
    Persisted,
    Done,
    Rejected,
    /// Client went away mid-stream. Nothing after generation ran.
    Cancelled,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Admitted => "admitted",
            TurnState::InputChecked => "input_checked",
            TurnState::Routed => "routed",
            TurnState::Generated => "generated",
            TurnState::OutputChecked => "output_checked",
            TurnState::Persisted => "persisted",
            TurnState::Done => "done",
            TurnState::Rejected => "rejected",
            TurnState::Cancelled => "cancelled",
        }
    }
}

/// Who is asking. Authentication happens before this point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub ip: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// Specialist label, bare name, `auto`, or absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Generation parameters after defaults and range checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub content: String,
    pub routing: RoutingDecision,
    pub safety_labels: BTreeSet<String>,
}

/// One framed event on the streaming path.
///
/// Per turn: at most one `metadata`, any number of `chunk`, at most one
/// `safety_redacted`, then exactly one `done` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Metadata {
        conversation_id: Uuid,
        /// The stored user message.
        message_id: Uuid,
        model: Specialist,
    },
    Chunk {
        content: String,
    },
    SafetyRedacted {
        content: String,
    },
    Done {
        message_id: Uuid,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference_code: Option<String>,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done { .. } | TurnEvent::Error { .. })
    }
}

impl From<&TurnError> for TurnEvent {
    fn from(err: &TurnError) -> Self {
        TurnEvent::Error {
            error: err.public_message(),
            reference_code: err.reference_code().map(str::to_string),
        }
    }
}

pub type TurnEventStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced to the caller. Infrastructure trouble in the rate
/// limiter or the safety classifiers never shows up here.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("input flagged by safety policy ({})", .0.reference_code)]
    UnsafeInput(SafetyVerdict),

    #[error(transparent)]
    UnknownSpecialist(#[from] UnknownSpecialist),

    #[error("conversation not found")]
    ConversationNotFound,

    #[error(transparent)]
    GenerationFailure(GenerationError),

    #[error("history storage failed: {0}")]
    Persistence(String),
}

impl TurnError {
    pub fn reference_code(&self) -> Option<&str> {
        match self {
            TurnError::UnsafeInput(verdict) => Some(&verdict.reference_code),
            _ => None,
        }
    }

    /// Message shown to the caller. Never carries provider detail.
    pub fn public_message(&self) -> String {
        match self {
            TurnError::RateLimited(_) => "Rate limit exceeded".to_string(),
            TurnError::InvalidRequest(msg) => msg.clone(),
            TurnError::UnsafeInput(_) => "Input flagged by safety policy".to_string(),
            TurnError::UnknownSpecialist(e) => e.to_string(),
            TurnError::ConversationNotFound => "Conversation not found".to_string(),
            TurnError::GenerationFailure(e) => e.public_message().to_string(),
            TurnError::Persistence(_) => "failed to save the conversation".to_string(),
        }
    }
}

impl From<HistoryError> for TurnError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound => TurnError::ConversationNotFound,
            other => TurnError::Persistence(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("counter store setup failed: {0}")]
    CounterStore(#[from] CounterStoreError),

    #[error("intent classifier patterns failed to compile: {0}")]
    Classifier(#[from] regex::Error),
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub strict_model_selection: bool,
    /// Prior messages sent with each generation request.
    pub history_window: usize,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub suppressed_tags: Arc<[TagPair]>,
    pub identity: Option<IdentityResponder>,
}

impl TurnSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strict_model_selection: config.routing.strict_model_selection,
            history_window: config.generation.history_window,
            default_temperature: config.generation.default_temperature,
            default_max_tokens: config.generation.default_max_tokens,
            suppressed_tags: config.stream.suppressed_tags.clone().into(),
            identity: IdentityResponder::from_config(&config.identity),
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            strict_model_selection: false,
            history_window: 10,
            default_temperature: 0.7,
            default_max_tokens: 2048,
            suppressed_tags: default_tag_pairs().into(),
            identity: None,
        }
    }
}

pub struct TurnDeps {
    pub rate_limiter: Arc<RateLimiter>,
    pub classifier: Arc<IntentClassifier>,
    pub safety: Arc<SafetyGate>,
    pub generator: Arc<dyn Generator>,
    pub history: Arc<dyn HistoryStore>,
    pub settings: TurnSettings,
}

// ---------------------------------------------------------------------------
// TurnOrchestrator
// ---------------------------------------------------------------------------

enum PlannedReply {
    Canned(String),
    Generate(GenerationRequest),
}

/// What is known about a turn once its user message is stored.
struct TurnContext {
    turn_id: Uuid,
    conversation_id: Uuid,
    user_message_id: Uuid,
    routing: RoutingDecision,
    started: Instant,
}

struct StoredReply {
    message_id: Uuid,
    content: String,
    labels: BTreeSet<String>,
    redacted: bool,
}

enum StreamStop {
    Cancelled,
    Failed(TurnError),
}

impl From<TurnError> for StreamStop {
    fn from(err: TurnError) -> Self {
        StreamStop::Failed(err)
    }
}

#[derive(Clone)]
pub struct TurnOrchestrator {
    deps: Arc<TurnDeps>,
}

impl TurnOrchestrator {
    pub fn new_with(deps: TurnDeps) -> Self {
        Self {
            deps: Arc::new(deps),
        }
    }

    /// Apply defaults and range checks. Runs before anything remote.
    pub fn resolve_params(&self, request: &TurnRequest) -> Result<TurnParams, TurnError> {
        let settings = &self.deps.settings;

        let chars = request.message.chars().count();
        if chars == 0 || chars > MAX_MESSAGE_CHARS {
            return Err(TurnError::InvalidRequest(format!(
                "message must be 1 to {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let temperature = request.temperature.unwrap_or(settings.default_temperature);
        if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(TurnError::InvalidRequest(format!(
                "temperature must be between 0 and {MAX_TEMPERATURE}"
            )));
        }

        let max_tokens = request.max_tokens.unwrap_or(settings.default_max_tokens);
        if !(1..=MAX_TOKENS_CEILING).contains(&max_tokens) {
            return Err(TurnError::InvalidRequest(format!(
                "max_tokens must be between 1 and {MAX_TOKENS_CEILING}"
            )));
        }

        if settings.strict_model_selection {
            if let ModelSelection::Malformed(label) = ModelSelection::parse(request.model.as_deref())
            {
                return Err(UnknownSpecialist(label).into());
            }
        }

        Ok(TurnParams {
            temperature,
            max_tokens,
        })
    }

    /// Run a turn to completion and return the stored answer.
    pub async fn run(&self, caller: &Caller, request: TurnRequest) -> Result<TurnOutcome, TurnError> {
        let turn_id = Uuid::new_v4();
        let result = self.run_inner(turn_id, caller, &request).await;
        if let Err(e) = &result {
            log_rejected(turn_id, e);
        }
        result
    }

    async fn run_inner(
        &self,
        turn_id: Uuid,
        caller: &Caller,
        request: &TurnRequest,
    ) -> Result<TurnOutcome, TurnError> {
        let (ctx, reply) = self.prepare(turn_id, caller, request).await?;

        let (answer, usage) = match reply {
            PlannedReply::Canned(text) => (text, None),
            PlannedReply::Generate(generation) => {
                let completion = self
                    .deps
                    .generator
                    .complete(generation)
                    .await
                    .map_err(TurnError::GenerationFailure)?;
                let text =
                    clean_response(&completion.text, self.deps.settings.suppressed_tags.clone());
                (text, completion.usage)
            }
        };
        log_state(&ctx, TurnState::Generated);

        let stored = self.check_and_store(&ctx, answer, usage).await?;
        log_done(&ctx);

        Ok(TurnOutcome {
            conversation_id: ctx.conversation_id,
            message_id: stored.message_id,
            content: stored.content,
            routing: ctx.routing,
            safety_labels: stored.labels,
        })
    }

    /// Run a turn, delivering its answer as a stream of events.
    ///
    /// The turn runs on its own task. Dropping the returned stream cancels
    /// it: fragment consumption stops and neither the output check nor the
    /// assistant write happens. The user message, if already stored, stays.
    pub fn run_stream(&self, caller: Caller, request: TurnRequest) -> TurnEventStream {
        let (tx, rx) = mpsc::channel::<TurnEvent>(EVENT_CHANNEL_CAPACITY);
        let this = self.clone();

        tokio::spawn(async move {
            let turn_id = Uuid::new_v4();
            match this.drive_stream(turn_id, &caller, &request, &tx).await {
                Ok(()) => {}
                Err(StreamStop::Cancelled) => {
                    tracing::info!(
                        turn_id = %turn_id,
                        state = TurnState::Cancelled.as_str(),
                        "client disconnected, turn abandoned"
                    );
                }
                Err(StreamStop::Failed(err)) => {
                    log_rejected(turn_id, &err);
                    let _ = tx.send(TurnEvent::from(&err)).await;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn drive_stream(
        &self,
        turn_id: Uuid,
        caller: &Caller,
        request: &TurnRequest,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), StreamStop> {
        let (ctx, reply) = self.prepare(turn_id, caller, request).await?;

        emit(
            tx,
            TurnEvent::Metadata {
                conversation_id: ctx.conversation_id,
                message_id: ctx.user_message_id,
                model: ctx.routing.specialist,
            },
        )
        .await?;

        let mut answer = String::new();
        match reply {
            PlannedReply::Canned(text) => {
                for (i, word) in text.split_whitespace().enumerate() {
                    let content = if i == 0 {
                        word.to_string()
                    } else {
                        format!(" {word}")
                    };
                    answer.push_str(&content);
                    emit(tx, TurnEvent::Chunk { content }).await?;
                }
            }
            PlannedReply::Generate(generation) => {
                let fragments = self
                    .deps
                    .generator
                    .stream(generation)
                    .await
                    .map_err(TurnError::GenerationFailure)?;
                let mut filtered =
                    filter_stream(fragments, self.deps.settings.suppressed_tags.clone());

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = tx.closed() => return Err(StreamStop::Cancelled),
                        next = filtered.next() => next,
                    };
                    match next {
                        Some(Ok(content)) => {
                            answer.push_str(&content);
                            emit(tx, TurnEvent::Chunk { content }).await?;
                        }
                        Some(Err(e)) => return Err(TurnError::GenerationFailure(e).into()),
                        None => break,
                    }
                }
            }
        }
        log_state(&ctx, TurnState::Generated);

        if tx.is_closed() {
            return Err(StreamStop::Cancelled);
        }

        // Streamed completions carry no usage report.
        let stored = self.check_and_store(&ctx, answer, None).await?;
        if stored.redacted {
            emit(
                tx,
                TurnEvent::SafetyRedacted {
                    content: stored.content,
                },
            )
            .await?;
        }
        // Stored already; a client leaving now changes nothing.
        let _ = tx
            .send(TurnEvent::Done {
                message_id: stored.message_id,
            })
            .await;
        log_done(&ctx);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    /// Admission through user-message persistence.
    async fn prepare(
        &self,
        turn_id: Uuid,
        caller: &Caller,
        request: &TurnRequest,
    ) -> Result<(TurnContext, PlannedReply), TurnError> {
        let started = Instant::now();
        let params = self.resolve_params(request)?;

        self.deps
            .rate_limiter
            .admit(&caller.ip, &caller.user_id)
            .await?;
        tracing::info!(turn_id = %turn_id, state = TurnState::Admitted.as_str(), "turn admitted");

        let verdict = self.deps.safety.evaluate(&request.message).await;
        if !verdict.allowed {
            return Err(TurnError::UnsafeInput(verdict));
        }
        tracing::info!(
            turn_id = %turn_id,
            state = TurnState::InputChecked.as_str(),
            reference_code = %verdict.reference_code,
            "input passed safety"
        );

        let routing = self
            .deps
            .classifier
            .decide(request.model.as_deref(), &request.message);
        tracing::info!(
            turn_id = %turn_id,
            state = TurnState::Routed.as_str(),
            specialist = routing.specialist.label(),
            confidence = routing.confidence,
            source = ?routing.source,
            "turn routed"
        );

        let history = &self.deps.history;
        let conversation = match request.conversation_id {
            Some(id) => history.get_conversation(id, &caller.user_id).await?,
            None => {
                history
                    .create_conversation(&caller.user_id, &conversation_title(&request.message))
                    .await?
            }
        };
        let user_message = history
            .create_message(
                conversation.id,
                Role::User,
                &request.message,
                &verdict.labels,
                MessageMetrics::default(),
            )
            .await?;

        let ctx = TurnContext {
            turn_id,
            conversation_id: conversation.id,
            user_message_id: user_message.id,
            routing,
            started,
        };

        let reply = match &self.deps.settings.identity {
            Some(identity) if identity.is_inquiry(&request.message) => {
                tracing::info!(turn_id = %turn_id, "identity inquiry answered locally");
                PlannedReply::Canned(identity.answer())
            }
            _ => PlannedReply::Generate(GenerationRequest {
                role: ModelRole::Specialist(ctx.routing.specialist),
                messages: self.build_messages(&ctx, &caller.user_id, &request.message).await,
                temperature: params.temperature,
                max_tokens: params.max_tokens,
            }),
        };

        Ok((ctx, reply))
    }

    /// System prompt, then up to `history_window` prior messages oldest
    /// first, then the message being answered.
    async fn build_messages(&self, ctx: &TurnContext, owner: &str, message: &str) -> Vec<ChatMessage> {
        let window = self.deps.settings.history_window;
        let mut messages = vec![ChatMessage::system(system_prompt(ctx.routing.specialist))];

        if window > 0 {
            match self
                .deps
                .history
                .get_recent_messages(ctx.conversation_id, owner, window + 1)
                .await
            {
                Ok(recent) => {
                    let prior: Vec<_> = recent
                        .into_iter()
                        .filter(|m| m.id != ctx.user_message_id)
                        .collect();
                    let skip = prior.len().saturating_sub(window);
                    messages.extend(
                        prior
                            .into_iter()
                            .skip(skip)
                            .map(|m| ChatMessage::new(m.role, m.content)),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        turn_id = %ctx.turn_id,
                        error = %e,
                        "history unavailable, generating without context"
                    );
                }
            }
        }

        messages.push(ChatMessage::user(message));
        messages
    }

    /// Output check, then the assistant message and routing decision.
    async fn check_and_store(
        &self,
        ctx: &TurnContext,
        answer: String,
        usage: Option<Usage>,
    ) -> Result<StoredReply, TurnError> {
        let metrics = MessageMetrics::reply(ctx.started.elapsed().as_millis() as u64, usage);
        let verdict = self.deps.safety.evaluate_output(&answer).await;
        let redacted = !verdict.allowed;
        let content = if redacted {
            REDACTION_NOTICE.to_string()
        } else {
            answer
        };
        tracing::info!(
            turn_id = %ctx.turn_id,
            state = TurnState::OutputChecked.as_str(),
            verdict = if redacted { "redact" } else { "allow" },
            reference_code = %verdict.reference_code,
            "output checked"
        );

        let message_id = match self
            .deps
            .history
            .record_assistant_reply(
                ctx.conversation_id,
                &content,
                &verdict.labels,
                metrics,
                &ctx.routing,
            )
            .await
        {
            Ok(message) => message.id,
            Err(HistoryError::Inconsistent { message_id }) => {
                tracing::error!(
                    turn_id = %ctx.turn_id,
                    conversation_id = %ctx.conversation_id,
                    message_id = %message_id,
                    "assistant message stored without its routing decision"
                );
                message_id
            }
            Err(e) => return Err(e.into()),
        };
        log_state(ctx, TurnState::Persisted);

        Ok(StoredReply {
            message_id,
            content,
            labels: verdict.labels,
            redacted,
        })
    }
}

async fn emit(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> Result<(), StreamStop> {
    tx.send(event).await.map_err(|_| StreamStop::Cancelled)
}

fn log_state(ctx: &TurnContext, state: TurnState) {
    tracing::info!(
        turn_id = %ctx.turn_id,
        conversation_id = %ctx.conversation_id,
        state = state.as_str(),
        "turn state"
    );
}

fn log_done(ctx: &TurnContext) {
    tracing::info!(
        turn_id = %ctx.turn_id,
        conversation_id = %ctx.conversation_id,
        state = TurnState::Done.as_str(),
        specialist = ctx.routing.specialist.label(),
        latency_ms = ctx.started.elapsed().as_secs_f64() * 1000.0,
        "turn complete"
    );
}

fn log_rejected(turn_id: Uuid, err: &TurnError) {
    match err {
        TurnError::GenerationFailure(e) => tracing::warn!(
            turn_id = %turn_id,
            state = TurnState::Rejected.as_str(),
            error = %e,
            "generation failed"
        ),
        TurnError::Persistence(detail) => tracing::error!(
            turn_id = %turn_id,
            state = TurnState::Rejected.as_str(),
            error = %detail,
            "history write failed"
        ),
        other => tracing::info!(
            turn_id = %turn_id,
            state = TurnState::Rejected.as_str(),
            reason = %other,
            reference_code = other.reference_code().unwrap_or(""),
            "turn rejected"
        ),
    }
}

// ---------------------------------------------------------------------------
// Public factory
// ---------------------------------------------------------------------------

/// Wire the production collaborators from config.
///
/// Redis backs the rate limiter when `rate_limit.redis_url` is set,
/// otherwise an in-memory store does. History is in-memory.
pub fn build_orchestrator(config: &Config) -> Result<TurnOrchestrator, SetupError> {
    let store: Arc<dyn CounterStore> = match &config.rate_limit.redis_url {
        Some(url) => Arc::new(RedisCounterStore::new(
            url.expose(),
            config.rate_limit.redis_pool_size,
        )?),
        None => Arc::new(InMemoryCounterStore::new()),
    };

    let registry = Arc::new(ModelRegistry::new(config.generation.models.clone()));
    let generator: Arc<dyn Generator> =
        Arc::new(OpenAiCompatibleGenerator::new(&config.generation, registry));

    let primary = config.safety.primary.enabled.then(|| {
        Arc::new(ChatSafetyClassifier::new(
            generator.clone(),
            config.safety.primary.max_tokens,
        )) as Arc<dyn SafetyClassifier>
    });
    let secondary = config
        .safety
        .secondary
        .clone()
        .map(|c| Arc::new(LlamaGuardClassifier::new(c)) as Arc<dyn SafetyClassifier>);

    let deps = TurnDeps {
        rate_limiter: Arc::new(RateLimiter::new(
            store,
            RatePolicy::from(&config.rate_limit),
        )),
        classifier: Arc::new(IntentClassifier::new()?),
        safety: Arc::new(SafetyGate::new(primary, secondary)),
        generator,
        history: Arc::new(InMemoryHistoryStore::new()),
        settings: TurnSettings::from_config(config),
    };

    Ok(TurnOrchestrator::new_with(deps))
}

#[cfg(test)]
mod tests;
