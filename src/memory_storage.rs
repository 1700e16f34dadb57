//! In-memory implementations of the storage seams.
//!
//! Each conditional update runs under a single write lock, which gives the same
//! compare-and-swap semantics as the conditional `UPDATE`s in `db_storage`.

use crate::models::{
    ConversationState, ConversationStep, FollowUp, FollowUpStatus, InboundStatus,
    InterestResponse, Lead, LeadCategory, LeadStatus, Money,
};
use crate::store::{ConversationStore, LeadStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

fn append_note(notes: &mut Option<String>, note: &str) {
    match notes {
        Some(existing) if !existing.is_empty() => {
            existing.push('\n');
            existing.push_str(note);
        }
        _ => *notes = Some(note.to_string()),
    }
}

/// Takes one unit from a failure budget; `true` means "fail this call".
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: RwLock<HashMap<(LeadCategory, Uuid), Lead>>,
    failing_terminal_updates: AtomicU32,
    failing_flag_updates: AtomicU32,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, lead: Lead) {
        let mut leads = self.leads.write().await;
        leads.insert((lead.category, lead.id), lead);
    }

    pub async fn all(&self) -> Vec<Lead> {
        let leads = self.leads.read().await;
        leads.values().cloned().collect()
    }

    /// Makes the next `n` terminal `mark_quote_sent` calls fail as if storage
    /// were unreachable.
    pub fn fail_next_terminal_updates(&self, n: u32) {
        self.failing_terminal_updates.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` `flag_for_reconciliation` calls fail.
    pub fn fail_next_flag_updates(&self, n: u32) {
        self.failing_flag_updates.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn find_lead(
        &self,
        category: LeadCategory,
        id: Uuid,
    ) -> Result<Option<Lead>, StoreError> {
        let leads = self.leads.read().await;
        Ok(leads.get(&(category, id)).cloned())
    }

    async fn find_dispatch_candidates(
        &self,
        category: LeadCategory,
        since: DateTime<Utc>,
    ) -> Result<Vec<Lead>, StoreError> {
        let leads = self.leads.read().await;
        let mut candidates: Vec<Lead> = leads
            .values()
            .filter(|lead| {
                lead.category == category
                    && lead.status == LeadStatus::New
                    && lead.quote_sent_at.is_none()
                    && lead.created_at >= since
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|lead| lead.created_at);
        Ok(candidates)
    }

    async fn claim_for_dispatch(
        &self,
        category: LeadCategory,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&(category, id)) {
            Some(lead) if lead.status == LeadStatus::New && lead.quote_sent_at.is_none() => {
                lead.status = LeadStatus::Sending;
                lead.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&(category, id)) {
            Some(lead) if lead.status == LeadStatus::Sending && lead.quote_sent_at.is_none() => {
                lead.status = LeadStatus::New;
                append_note(&mut lead.notes, note);
                lead.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_quote_sent(
        &self,
        category: LeadCategory,
        id: Uuid,
        price: Option<Money>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if take_failure(&self.failing_terminal_updates) {
            return Err(StoreError::Unavailable(
                "simulated terminal update failure".to_string(),
            ));
        }

        let mut leads = self.leads.write().await;
        match leads.get_mut(&(category, id)) {
            Some(lead) if lead.status == LeadStatus::Sending && lead.quote_sent_at.is_none() => {
                lead.status = LeadStatus::QuoteSent;
                lead.quote_sent_at = Some(sent_at);
                if price.is_some() {
                    lead.computed_price = price;
                }
                lead.needs_reconciliation = false;
                lead.updated_at = sent_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn flag_for_reconciliation(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if take_failure(&self.failing_flag_updates) {
            return Err(StoreError::Unavailable(
                "simulated flag update failure".to_string(),
            ));
        }

        let mut leads = self.leads.write().await;
        if let Some(lead) = leads.get_mut(&(category, id)) {
            lead.needs_reconciliation = true;
            append_note(&mut lead.notes, note);
            lead.updated_at = now;
        }
        Ok(())
    }

    async fn record_interest_response(
        &self,
        category: LeadCategory,
        id: Uuid,
        response: InterestResponse,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&(category, id)) {
            Some(lead)
                if lead.interest_response_at.is_none() && lead.status == LeadStatus::QuoteSent =>
            {
                lead.status = response.resulting_status();
                lead.interest_response = Some(response);
                lead.interest_response_at = Some(at);
                lead.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_reconciliation(&self) -> Result<Vec<Lead>, StoreError> {
        let leads = self.leads.read().await;
        let mut flagged: Vec<Lead> = leads
            .values()
            .filter(|lead| lead.needs_reconciliation)
            .cloned()
            .collect();
        flagged.sort_by_key(|lead| lead.updated_at);
        Ok(flagged)
    }

    async fn reset_dispatch(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&(category, id)) {
            Some(lead) if matches!(lead.status, LeadStatus::Sending | LeadStatus::QuoteSent) => {
                lead.status = LeadStatus::New;
                lead.quote_sent_at = None;
                lead.needs_reconciliation = false;
                append_note(&mut lead.notes, note);
                lead.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close_lead(
        &self,
        category: LeadCategory,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&(category, id)) {
            Some(lead)
                if matches!(lead.status, LeadStatus::Interested | LeadStatus::NotInterested) =>
            {
                lead.status = LeadStatus::Closed;
                lead.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, ConversationState>>,
    inbound: RwLock<HashMap<String, (String, InboundStatus, Option<String>)>>,
    follow_ups: RwLock<HashMap<Uuid, FollowUp>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn inbound_status(&self, dedupe_key: &str) -> Option<InboundStatus> {
        let inbound = self.inbound.read().await;
        inbound.get(dedupe_key).map(|(_, status, _)| *status)
    }

    pub async fn follow_up(&self, id: Uuid) -> Option<FollowUp> {
        let follow_ups = self.follow_ups.read().await;
        follow_ups.get(&id).cloned()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_conversation(
        &self,
        phone: &str,
    ) -> Result<Option<ConversationState>, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(phone).cloned())
    }

    async fn save_conversation(&self, state: &ConversationState) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(state.phone_number.clone(), state.clone());
        Ok(())
    }

    async fn advance_conversation(
        &self,
        state: &ConversationState,
        expected_step: ConversationStep,
        expected_interaction_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(&state.phone_number) {
            Some(current)
                if current.current_step == expected_step
                    && current.last_interaction_at == expected_interaction_at =>
            {
                *current = state.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_inbound_message(
        &self,
        dedupe_key: &str,
        phone: &str,
        _received_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inbound = self.inbound.write().await;
        if inbound.contains_key(dedupe_key) {
            return Ok(false);
        }
        inbound.insert(
            dedupe_key.to_string(),
            (phone.to_string(), InboundStatus::Received, None),
        );
        Ok(true)
    }

    async fn complete_inbound_message(
        &self,
        dedupe_key: &str,
        status: InboundStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inbound = self.inbound.write().await;
        if let Some(entry) = inbound.get_mut(dedupe_key) {
            entry.1 = status;
            entry.2 = error.map(str::to_string);
        }
        Ok(())
    }

    async fn schedule_follow_up(&self, follow_up: &FollowUp) -> Result<(), StoreError> {
        let mut follow_ups = self.follow_ups.write().await;
        follow_ups.insert(follow_up.id, follow_up.clone());
        Ok(())
    }

    async fn due_follow_ups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUp>, StoreError> {
        let follow_ups = self.follow_ups.read().await;
        let mut due: Vec<FollowUp> = follow_ups
            .values()
            .filter(|f| f.status == FollowUpStatus::Scheduled && f.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by_key(|f| f.scheduled_for);
        due.truncate(limit);
        Ok(due)
    }

    async fn transition_follow_up(
        &self,
        id: Uuid,
        from: FollowUpStatus,
        to: FollowUpStatus,
    ) -> Result<bool, StoreError> {
        let mut follow_ups = self.follow_ups.write().await;
        match follow_ups.get_mut(&id) {
            Some(follow_up) if follow_up.status == from => {
                follow_up.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_follow_ups(&self, phone: &str) -> Result<u64, StoreError> {
        let mut follow_ups = self.follow_ups.write().await;
        let mut cancelled = 0;
        for follow_up in follow_ups.values_mut() {
            if follow_up.phone_number == phone && follow_up.status == FollowUpStatus::Scheduled {
                follow_up.status = FollowUpStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn list_follow_ups(&self, phone: &str) -> Result<Vec<FollowUp>, StoreError> {
        let follow_ups = self.follow_ups.read().await;
        let mut list: Vec<FollowUp> = follow_ups
            .values()
            .filter(|f| f.phone_number == phone)
            .cloned()
            .collect();
        list.sort_by_key(|f| f.scheduled_for);
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = InMemoryLeadStore::new();
        let lead = Lead::new(LeadCategory::Dakkapel, "A", "a@example.nl", json!({}), Utc::now());
        let id = lead.id;
        store.insert(lead).await;

        assert!(store.claim_for_dispatch(LeadCategory::Dakkapel, id, Utc::now()).await.unwrap());
        assert!(!store.claim_for_dispatch(LeadCategory::Dakkapel, id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_respects_category() {
        let store = InMemoryLeadStore::new();
        let lead = Lead::new(LeadCategory::Dakkapel, "A", "a@example.nl", json!({}), Utc::now());
        let id = lead.id;
        store.insert(lead).await;

        assert!(!store.claim_for_dispatch(LeadCategory::Kozijnen, id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_budget_is_consumed() {
        let store = InMemoryLeadStore::new();
        let lead = Lead::new(LeadCategory::Dakkapel, "A", "a@example.nl", json!({}), Utc::now());
        let id = lead.id;
        store.insert(lead).await;
        store.claim_for_dispatch(LeadCategory::Dakkapel, id, Utc::now()).await.unwrap();
        store.fail_next_terminal_updates(1);

        assert!(store.mark_quote_sent(LeadCategory::Dakkapel, id, None, Utc::now()).await.is_err());
        assert!(store.mark_quote_sent(LeadCategory::Dakkapel, id, None, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_inbound_claim_deduplicates() {
        let store = InMemoryConversationStore::new();
        assert!(store.claim_inbound_message("wamid.1", "+31612345678", Utc::now()).await.unwrap());
        assert!(!store.claim_inbound_message("wamid.1", "+31612345678", Utc::now()).await.unwrap());
    }
}
