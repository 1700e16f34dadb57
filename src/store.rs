//! Storage seams for leads and conversations.
//!
//! Every mutating call that guards a state transition is conditional and
//! reports whether it took effect; callers treat `false` as "someone else got
//! there first", never as an error.

use crate::models::{
    ConversationState, ConversationStep, FollowUp, FollowUpStatus, InboundStatus,
    InterestResponse, Lead, LeadCategory, Money,
};
use crate::retry::Retryable;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl Retryable for StoreError {
    /// A row that fails to decode will fail the same way next time.
    fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Decode(_))
    }
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_lead(&self, category: LeadCategory, id: Uuid)
        -> Result<Option<Lead>, StoreError>;

    /// Leads with `status = new AND quote_sent_at IS NULL AND created_at >= since`.
    async fn find_dispatch_candidates(
        &self,
        category: LeadCategory,
        since: DateTime<Utc>,
    ) -> Result<Vec<Lead>, StoreError>;

    /// `new → sending`, only if still unclaimed and never quoted.
    async fn claim_for_dispatch(
        &self,
        category: LeadCategory,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `sending → new`, appending `note` for operator visibility.
    async fn release_claim(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Terminal dispatch update: `sending → quote_sent`, sets `quote_sent_at`
    /// exactly once. A `None` price keeps any stored price.
    async fn mark_quote_sent(
        &self,
        category: LeadCategory,
        id: Uuid,
        price: Option<Money>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Flags a lead for manual reconciliation without touching its status.
    async fn flag_for_reconciliation(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// First-wins interest capture: only applies while no response is recorded.
    async fn record_interest_response(
        &self,
        category: LeadCategory,
        id: Uuid,
        response: InterestResponse,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn list_reconciliation(&self) -> Result<Vec<Lead>, StoreError>;

    /// Explicit manual reset: `sending | quote_sent → new`, clears `quote_sent_at`.
    async fn reset_dispatch(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `interested | not_interested → closed`.
    async fn close_lead(
        &self,
        category: LeadCategory,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, phone: &str)
        -> Result<Option<ConversationState>, StoreError>;

    /// Create or overwrite the conversation for a phone number.
    async fn save_conversation(&self, state: &ConversationState) -> Result<(), StoreError>;

    /// Compare-and-swap update: applies only if the stored row still matches
    /// `expected_step` and `expected_interaction_at`.
    async fn advance_conversation(
        &self,
        state: &ConversationState,
        expected_step: ConversationStep,
        expected_interaction_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Records an inbound message key. `false` means it was seen before.
    async fn claim_inbound_message(
        &self,
        dedupe_key: &str,
        phone: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn complete_inbound_message(
        &self,
        dedupe_key: &str,
        status: InboundStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn schedule_follow_up(&self, follow_up: &FollowUp) -> Result<(), StoreError>;

    /// Follow-ups in `scheduled` whose `scheduled_for <= now`, oldest first.
    async fn due_follow_ups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUp>, StoreError>;

    /// Conditional status change `from → to`.
    async fn transition_follow_up(
        &self,
        id: Uuid,
        from: FollowUpStatus,
        to: FollowUpStatus,
    ) -> Result<bool, StoreError>;

    /// Cancels every still-scheduled follow-up for a phone number.
    async fn cancel_follow_ups(&self, phone: &str) -> Result<u64, StoreError>;

    async fn list_follow_ups(&self, phone: &str) -> Result<Vec<FollowUp>, StoreError>;
}
