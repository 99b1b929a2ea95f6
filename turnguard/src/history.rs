// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Conversation history persistence.
//
// Conversations, their messages, and the routing decision attached to
// every assistant message. Read paths are scoped by owner: a conversation
// owned by someone else looks exactly like a missing one.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::generation::Usage;
use crate::message::Role;
use crate::routing::{RoutingDecision, RoutingSource, ROUTING_STRATEGY};

const TITLE_MAX_CHARS: usize = 50;

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Cost of producing an assistant message. Empty for user messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageMetrics {
    /// Turn start to answer ready.
    pub latency_ms: Option<u64>,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
}

impl MessageMetrics {
    /// Token counts are only known when the provider reports usage.
    pub fn reply(latency_ms: u64, usage: Option<Usage>) -> Self {
        Self {
            latency_ms: Some(latency_ms),
            tokens_in: usage.map(|u| u.prompt_tokens),
            tokens_out: usage.map(|u| u.completion_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub safety_labels: BTreeSet<String>,
    pub metrics: MessageMetrics,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRoutingDecision {
    pub id: Uuid,
    pub message_id: Uuid,
    pub strategy: String,
    /// Specialist wire label.
    pub endpoint: String,
    pub confidence: f32,
    pub source: RoutingSource,
    pub reasons: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("conversation not found")]
    NotFound,

    #[error("history storage failed: {0}")]
    Storage(String),

    /// The assistant message was written but its routing decision was not.
    #[error("assistant message {message_id} stored without a routing decision")]
    Inconsistent { message_id: Uuid },
}

/// Title for a new conversation: the opening of its first message,
/// cut at a word boundary when the message is longer.
pub fn conversation_title(message: &str) -> String {
    let head: String = message.chars().take(TITLE_MAX_CHARS).collect();
    let head = head.trim();
    if message.chars().count() <= TITLE_MAX_CHARS {
        return head.to_string();
    }
    let cut = head.rsplit_once(' ').map_or(head, |(before, _)| before);
    format!("{cut}...")
}

// ---------------------------------------------------------------------------
// HistoryStore trait
// ---------------------------------------------------------------------------

/// Persistence collaborator for turns.
///
/// Implementations must be thread-safe. The orchestrator holds
/// `Arc<dyn HistoryStore>` and calls it from concurrent turns.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create_conversation(&self, owner: &str, title: &str)
        -> Result<Conversation, HistoryError>;

    /// `NotFound` when missing or owned by someone else.
    async fn get_conversation(&self, id: Uuid, owner: &str) -> Result<Conversation, HistoryError>;

    async fn create_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
        safety_labels: &BTreeSet<String>,
        metrics: MessageMetrics,
    ) -> Result<StoredMessage, HistoryError>;

    async fn create_routing_decision(
        &self,
        message_id: Uuid,
        strategy: &str,
        endpoint: &str,
        confidence: f32,
        source: RoutingSource,
        reasons: &str,
    ) -> Result<StoredRoutingDecision, HistoryError>;

    /// The most recent `limit` messages, oldest first.
    async fn get_recent_messages(
        &self,
        conversation_id: Uuid,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, HistoryError>;

    /// Write an assistant message together with its routing decision.
    ///
    /// The default performs two writes. If the second fails the message
    /// stays and `Inconsistent` names it; stores with transactions should
    /// override this to write both or neither.
    async fn record_assistant_reply(
        &self,
        conversation_id: Uuid,
        content: &str,
        safety_labels: &BTreeSet<String>,
        metrics: MessageMetrics,
        routing: &RoutingDecision,
    ) -> Result<StoredMessage, HistoryError> {
        let message = self
            .create_message(conversation_id, Role::Assistant, content, safety_labels, metrics)
            .await?;
        self.create_routing_decision(
            message.id,
            ROUTING_STRATEGY,
            routing.specialist.label(),
            routing.confidence,
            routing.source,
            &routing.reasons,
        )
        .await
        .map_err(|_| HistoryError::Inconsistent {
            message_id: message.id,
        })?;
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// InMemoryHistoryStore
// ---------------------------------------------------------------------------

struct ConversationRecord {
    conversation: Conversation,
    messages: Vec<StoredMessage>,
}

/// In-memory history backed by `DashMap`.
///
/// Suitable for single-instance deployments and tests. A durable backend
/// implements `HistoryStore` over its own storage.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    conversations: DashMap<Uuid, ConversationRecord>,
    decisions: DashMap<Uuid, StoredRoutingDecision>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Every message of a conversation regardless of owner.
    pub fn messages(&self, conversation_id: Uuid) -> Vec<StoredMessage> {
        self.conversations
            .get(&conversation_id)
            .map(|record| record.messages.clone())
            .unwrap_or_default()
    }

    /// Routing decision attached to an assistant message.
    pub fn routing_decision(&self, message_id: Uuid) -> Option<StoredRoutingDecision> {
        self.decisions.get(&message_id).map(|d| d.clone())
    }

    fn new_message(
        conversation_id: Uuid,
        role: Role,
        content: &str,
        safety_labels: &BTreeSet<String>,
        metrics: MessageMetrics,
    ) -> StoredMessage {
        StoredMessage {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.to_string(),
            safety_labels: safety_labels.clone(),
            metrics,
            created_at: Utc::now(),
        }
    }

    fn new_decision(
        message_id: Uuid,
        strategy: &str,
        endpoint: &str,
        confidence: f32,
        source: RoutingSource,
        reasons: &str,
    ) -> StoredRoutingDecision {
        StoredRoutingDecision {
            id: Uuid::new_v4(),
            message_id,
            strategy: strategy.to_string(),
            endpoint: endpoint.to_string(),
            confidence,
            source,
            reasons: reasons.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_conversation(
        &self,
        owner: &str,
        title: &str,
    ) -> Result<Conversation, HistoryError> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.conversations.insert(
            conversation.id,
            ConversationRecord {
                conversation: conversation.clone(),
                messages: Vec::new(),
            },
        );
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid, owner: &str) -> Result<Conversation, HistoryError> {
        self.conversations
            .get(&id)
            .filter(|record| record.conversation.owner == owner)
            .map(|record| record.conversation.clone())
            .ok_or(HistoryError::NotFound)
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
        safety_labels: &BTreeSet<String>,
        metrics: MessageMetrics,
    ) -> Result<StoredMessage, HistoryError> {
        let mut record = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(HistoryError::NotFound)?;
        let message = Self::new_message(conversation_id, role, content, safety_labels, metrics);
        record.messages.push(message.clone());
        Ok(message)
    }

    async fn create_routing_decision(
        &self,
        message_id: Uuid,
        strategy: &str,
        endpoint: &str,
        confidence: f32,
        source: RoutingSource,
        reasons: &str,
    ) -> Result<StoredRoutingDecision, HistoryError> {
        let decision =
            Self::new_decision(message_id, strategy, endpoint, confidence, source, reasons);
        self.decisions.insert(message_id, decision.clone());
        Ok(decision)
    }

    async fn get_recent_messages(
        &self,
        conversation_id: Uuid,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, HistoryError> {
        let record = self
            .conversations
            .get(&conversation_id)
            .filter(|record| record.conversation.owner == owner)
            .ok_or(HistoryError::NotFound)?;
        let skip = record.messages.len().saturating_sub(limit);
        Ok(record.messages[skip..].to_vec())
    }

    async fn record_assistant_reply(
        &self,
        conversation_id: Uuid,
        content: &str,
        safety_labels: &BTreeSet<String>,
        metrics: MessageMetrics,
        routing: &RoutingDecision,
    ) -> Result<StoredMessage, HistoryError> {
        // Conversation write guard held across both inserts.
        let mut record = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(HistoryError::NotFound)?;
        let message = Self::new_message(
            conversation_id,
            Role::Assistant,
            content,
            safety_labels,
            metrics,
        );
        let decision = Self::new_decision(
            message.id,
            ROUTING_STRATEGY,
            routing.specialist.label(),
            routing.confidence,
            routing.source,
            &routing.reasons,
        );
        self.decisions.insert(message.id, decision);
        record.messages.push(message.clone());
        Ok(message)
    }
}
