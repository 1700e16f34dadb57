//! Conversation orchestrator.
//!
//! Bridges the pure state machine in `conversation` to persisted state and the
//! messaging channel. Events for one phone number are serialized with a keyed
//! lock; state is only written after the outbound message went out, so a
//! failed send leaves the previous state for the next event to recover from.

use crate::conversation::{self, ChatEstimateSettings, TransitionOutcome};
use crate::email_client::DeliveryError;
use crate::keyed_lock::KeyedLocks;
use crate::models::{
    ConversationState, ConversationStep, FollowUp, FollowUpStatus, InboundStatus, ReminderType,
};
use crate::phone::{normalize_phone, InvalidPhone};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::{ConversationStore, StoreError};
use crate::whatsapp_client::MessagingSender;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub first_reminder_offset: Duration,
    pub second_reminder_offset: Duration,
    pub default_area_m2: u32,
    pub retry: RetryPolicy,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            first_reminder_offset: Duration::hours(48),
            second_reminder_offset: Duration::hours(72),
            default_area_m2: 50,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("message delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    InvalidPhone(#[from] InvalidPhone),
    #[error("no conversation for {0}")]
    NoConversation(String),
    #[error("userResponse is required to continue a conversation")]
    MissingResponse,
    #[error("conversation with {0} changed concurrently")]
    ConcurrentUpdate(String),
}

/// A provider-agnostic inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub message_id: Option<String>,
    pub from: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// An inbound event whose dedupe key has been claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedInbound {
    pub dedupe_key: String,
    pub phone_number: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted(AcceptedInbound),
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub step: ConversationStep,
    pub outcome: TransitionOutcome,
    pub message_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Replied(ReplyOutcome),
    /// No conversation exists for the sender; unsolicited messages never
    /// create one.
    NoConversation,
    /// Older than the conversation's last interaction.
    Stale,
}

/// Programmatic start/continue request, e.g. from the lead-creation path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NurtureTrigger {
    pub lead_id: Uuid,
    pub phone_number: String,
    pub customer_name: String,
    pub step: ConversationStep,
    #[serde(default)]
    pub user_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Started(ConversationState),
    Replied(ReplyOutcome),
    /// The conversation is no longer at the step the caller expected.
    StepMismatch { current: ConversationStep },
}

#[derive(Clone)]
pub struct ConversationOrchestrator {
    conversations: Arc<dyn ConversationStore>,
    messaging: Arc<dyn MessagingSender>,
    locks: KeyedLocks,
    settings: Arc<ConversationSettings>,
}

impl ConversationOrchestrator {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messaging: Arc<dyn MessagingSender>,
        locks: KeyedLocks,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            conversations,
            messaging,
            locks,
            settings: Arc::new(settings),
        }
    }

    /// Opens (or restarts) the conversation for a phone number: sends the
    /// opening prompt, then persists state and schedules the first reminder.
    pub async fn start_conversation(
        &self,
        lead_id: Uuid,
        phone_number: &str,
        customer_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, ConversationError> {
        let phone = normalize_phone(phone_number)?;
        let _guard = self.locks.lock(&phone).await;

        let prompt = conversation::initial_prompt(customer_name);
        self.send(&phone, &prompt).await?;

        let state = ConversationState {
            lead_id,
            phone_number: phone.clone(),
            customer_name: customer_name.to_string(),
            current_step: ConversationStep::Initial,
            last_message: Some(prompt),
            last_interaction_at: now,
        };
        self.conversations.save_conversation(&state).await?;

        let stale = self.conversations.cancel_follow_ups(&phone).await?;
        if stale > 0 {
            tracing::info!("Cancelled {} reminder(s) from an earlier conversation with {}", stale, phone);
        }

        let follow_up = FollowUp {
            id: Uuid::new_v4(),
            lead_id,
            phone_number: phone.clone(),
            customer_name: customer_name.to_string(),
            step: ConversationStep::Initial,
            scheduled_for: now + self.settings.first_reminder_offset,
            reminder_type: ReminderType::FirstReminder,
            status: FollowUpStatus::Scheduled,
            created_at: now,
        };
        self.conversations.schedule_follow_up(&follow_up).await?;

        tracing::info!(
            "💬 Conversation started with {} for lead {} (first reminder at {})",
            phone,
            lead_id,
            follow_up.scheduled_for
        );
        Ok(state)
    }

    /// Normalizes the sender and claims the event's dedupe key. Cheap enough
    /// to run inline in the webhook request.
    pub async fn accept_inbound(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome, ConversationError> {
        let phone = normalize_phone(&event.from)?;
        let dedupe_key = match &event.message_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => fallback_dedupe_key(&phone, event),
        };

        if !self
            .conversations
            .claim_inbound_message(&dedupe_key, &phone, now)
            .await?
        {
            tracing::info!("🔁 Duplicate inbound message {} from {}, skipping", dedupe_key, phone);
            return Ok(AcceptOutcome::Duplicate);
        }

        Ok(AcceptOutcome::Accepted(AcceptedInbound {
            dedupe_key,
            phone_number: phone,
            body: event.body.clone(),
            timestamp: event.timestamp,
        }))
    }

    /// Runs an accepted event through the state machine and records the
    /// result in the inbound ledger.
    pub async fn process_inbound(
        &self,
        inbound: &AcceptedInbound,
    ) -> Result<InboundOutcome, ConversationError> {
        let result = self.process_locked(inbound).await;

        let (status, error) = match &result {
            Ok(InboundOutcome::Replied(_)) => (InboundStatus::Processed, None),
            Ok(InboundOutcome::NoConversation) => {
                (InboundStatus::Dropped, Some("no conversation".to_string()))
            }
            Ok(InboundOutcome::Stale) => (InboundStatus::Dropped, Some("stale".to_string())),
            Err(e) => (InboundStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = self
            .conversations
            .complete_inbound_message(&inbound.dedupe_key, status, error.as_deref())
            .await
        {
            tracing::error!(
                "❌ Failed to record inbound message {} as {}: {}",
                inbound.dedupe_key,
                status.as_str(),
                e
            );
        }

        result
    }

    /// `accept_inbound` + `process_inbound`; `None` for a duplicate.
    pub async fn handle_inbound(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<InboundOutcome>, ConversationError> {
        match self.accept_inbound(event, now).await? {
            AcceptOutcome::Accepted(inbound) => self.process_inbound(&inbound).await.map(Some),
            AcceptOutcome::Duplicate => Ok(None),
        }
    }

    pub async fn trigger(
        &self,
        request: &NurtureTrigger,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome, ConversationError> {
        if request.step == ConversationStep::Initial {
            let state = self
                .start_conversation(request.lead_id, &request.phone_number, &request.customer_name, now)
                .await?;
            return Ok(TriggerOutcome::Started(state));
        }

        let body = request
            .user_response
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or(ConversationError::MissingResponse)?;
        let phone = normalize_phone(&request.phone_number)?;
        let _guard = self.locks.lock(&phone).await;

        let state = self
            .conversations
            .get_conversation(&phone)
            .await?
            .ok_or_else(|| ConversationError::NoConversation(phone.clone()))?;
        if state.current_step != request.step {
            tracing::info!(
                "Trigger for {} expected step {} but conversation is at {}",
                phone,
                request.step,
                state.current_step
            );
            return Ok(TriggerOutcome::StepMismatch {
                current: state.current_step,
            });
        }

        let interaction_at = now.max(state.last_interaction_at);
        self.apply_reply(state, body, interaction_at)
            .await
            .map(TriggerOutcome::Replied)
    }

    async fn process_locked(
        &self,
        inbound: &AcceptedInbound,
    ) -> Result<InboundOutcome, ConversationError> {
        let _guard = self.locks.lock(&inbound.phone_number).await;

        let Some(state) = self.conversations.get_conversation(&inbound.phone_number).await? else {
            tracing::info!(
                "Dropping message {} from {}: no conversation",
                inbound.dedupe_key,
                inbound.phone_number
            );
            return Ok(InboundOutcome::NoConversation);
        };

        // Provider timestamps have second resolution.
        if inbound.timestamp.timestamp() < state.last_interaction_at.timestamp() {
            tracing::warn!(
                "Dropping stale message {} from {} (sent {}, last interaction {})",
                inbound.dedupe_key,
                inbound.phone_number,
                inbound.timestamp,
                state.last_interaction_at
            );
            return Ok(InboundOutcome::Stale);
        }

        // The message's own timestamp orders later events; a processing time
        // would make a quick follow-up message look stale.
        let interaction_at = inbound.timestamp.max(state.last_interaction_at);
        self.apply_reply(state, &inbound.body, interaction_at)
            .await
            .map(InboundOutcome::Replied)
    }

    /// Caller holds the phone number's lock.
    async fn apply_reply(
        &self,
        state: ConversationState,
        body: &str,
        interaction_at: DateTime<Utc>,
    ) -> Result<ReplyOutcome, ConversationError> {
        let settings = ChatEstimateSettings {
            default_area_m2: self.settings.default_area_m2,
        };
        let transition = conversation::transition(state.current_step, body, &settings);

        if let Some(message) = &transition.outbound {
            self.send(&state.phone_number, message).await?;
        }

        let next = ConversationState {
            current_step: transition.next,
            last_message: Some(transition.outbound.clone().unwrap_or_else(|| body.to_string())),
            last_interaction_at: interaction_at,
            ..state.clone()
        };

        let applied = self
            .conversations
            .advance_conversation(&next, state.current_step, state.last_interaction_at)
            .await?;
        if !applied {
            tracing::warn!(
                "⚠️  Conversation with {} changed concurrently; {} → {} not persisted",
                state.phone_number,
                state.current_step,
                transition.next
            );
            return Err(ConversationError::ConcurrentUpdate(state.phone_number));
        }

        let cancelled = self.conversations.cancel_follow_ups(&state.phone_number).await?;
        if cancelled > 0 {
            tracing::info!("Cancelled {} pending reminder(s) for {}", cancelled, state.phone_number);
        }

        if transition.outcome == TransitionOutcome::Unrecognized {
            tracing::info!(
                "Unrecognized reply from {} at {}, prompt re-sent",
                state.phone_number,
                state.current_step
            );
        } else {
            tracing::info!(
                "💬 {}: {} → {}",
                state.phone_number,
                state.current_step,
                transition.next
            );
        }

        Ok(ReplyOutcome {
            step: transition.next,
            outcome: transition.outcome,
            message_sent: transition.outbound.is_some(),
        })
    }

    async fn send(&self, phone: &str, body: &str) -> Result<String, DeliveryError> {
        let operation = format!("whatsapp message to {}", phone);
        retry_with_backoff(&self.settings.retry, &operation, |_| {
            self.messaging.send_text(phone, body)
        })
        .await
    }
}

/// Key for events the provider delivered without a message id.
fn fallback_dedupe_key(phone: &str, event: &InboundEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.body.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}:{}", phone, event.timestamp.timestamp(), &digest[..16])
}
