//! One-click interest capture from quote emails.
//!
//! First response wins. Replaying the same answer is a no-op that reports
//! the same outcome; a contradicting answer is rejected and logged.

use crate::models::{InterestResponse, Lead, LeadCategory, LeadStatus};
use crate::response_token::verify_response_token;
use crate::store::{LeadStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestOutcome {
    /// This call recorded the response.
    Recorded(LeadStatus),
    /// Same response was already recorded earlier.
    AlreadyRecorded(LeadStatus),
}

impl InterestOutcome {
    pub fn status(&self) -> LeadStatus {
        match self {
            InterestOutcome::Recorded(status) | InterestOutcome::AlreadyRecorded(status) => *status,
        }
    }
}

#[derive(Debug, Error)]
pub enum InterestError {
    #[error("lead not found")]
    NotFound,
    #[error("invalid response token")]
    InvalidToken,
    #[error("response '{attempted}' conflicts with recorded response '{recorded}'")]
    ResponseConflict {
        recorded: &'static str,
        attempted: &'static str,
    },
    #[error("lead is not awaiting a response (status {0})")]
    NotAwaitingResponse(LeadStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct InterestService {
    leads: Arc<dyn LeadStore>,
    token_secret: String,
}

impl InterestService {
    pub fn new(leads: Arc<dyn LeadStore>, token_secret: String) -> Self {
        Self { leads, token_secret }
    }

    pub async fn respond(
        &self,
        category: LeadCategory,
        lead_id: Uuid,
        token: &str,
        response: InterestResponse,
        now: DateTime<Utc>,
    ) -> Result<InterestOutcome, InterestError> {
        if !verify_response_token(&self.token_secret, category, lead_id, token) {
            tracing::warn!("❌ Invalid response token for lead {} ({})", lead_id, category);
            return Err(InterestError::InvalidToken);
        }

        let lead = self
            .leads
            .find_lead(category, lead_id)
            .await?
            .ok_or(InterestError::NotFound)?;

        if let Some(outcome) = existing_response(&lead, response)? {
            return Ok(outcome);
        }

        // A lead still in `sending` has no durable quote_sent_at yet.
        if lead.status != LeadStatus::QuoteSent {
            return Err(InterestError::NotAwaitingResponse(lead.status));
        }

        if self
            .leads
            .record_interest_response(category, lead_id, response, now)
            .await?
        {
            let status = response.resulting_status();
            tracing::info!(
                "✓ Lead {} ({}) responded '{}' → {}",
                lead_id,
                category,
                response.as_str(),
                status
            );
            return Ok(InterestOutcome::Recorded(status));
        }

        // Lost a race with a concurrent click; judge against what won.
        let lead = self
            .leads
            .find_lead(category, lead_id)
            .await?
            .ok_or(InterestError::NotFound)?;
        match existing_response(&lead, response)? {
            Some(outcome) => Ok(outcome),
            None => Err(InterestError::NotAwaitingResponse(lead.status)),
        }
    }
}

fn existing_response(
    lead: &Lead,
    response: InterestResponse,
) -> Result<Option<InterestOutcome>, InterestError> {
    match lead.interest_response {
        Some(recorded) if recorded == response => {
            tracing::debug!("Duplicate '{}' response for lead {}", response.as_str(), lead.id);
            Ok(Some(InterestOutcome::AlreadyRecorded(lead.status)))
        }
        Some(recorded) => {
            tracing::warn!(
                "⚠️  Response conflict for lead {}: recorded '{}', attempted '{}'",
                lead.id,
                recorded.as_str(),
                response.as_str()
            );
            Err(InterestError::ResponseConflict {
                recorded: recorded.as_str(),
                attempted: response.as_str(),
            })
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_storage::InMemoryLeadStore;
    use crate::response_token::response_token;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    async fn quoted_lead(store: &InMemoryLeadStore) -> Lead {
        let mut lead = Lead::new(
            LeadCategory::Kozijnen,
            "Piet Jansen",
            "piet@example.nl",
            json!({"frames": 2, "material": "hout"}),
            Utc::now(),
        );
        lead.status = LeadStatus::QuoteSent;
        lead.quote_sent_at = Some(Utc::now());
        store.insert(lead.clone()).await;
        lead
    }

    #[tokio::test]
    async fn test_first_response_wins() {
        let store = Arc::new(InMemoryLeadStore::new());
        let lead = quoted_lead(&store).await;
        let service = InterestService::new(store.clone(), SECRET.to_string());
        let token = response_token(SECRET, lead.category, lead.id);

        let first = service
            .respond(lead.category, lead.id, &token, InterestResponse::Yes, Utc::now())
            .await
            .unwrap();
        assert_eq!(first, InterestOutcome::Recorded(LeadStatus::Interested));

        let again = service
            .respond(lead.category, lead.id, &token, InterestResponse::Yes, Utc::now())
            .await
            .unwrap();
        assert_eq!(again, InterestOutcome::AlreadyRecorded(LeadStatus::Interested));

        let conflict = service
            .respond(lead.category, lead.id, &token, InterestResponse::No, Utc::now())
            .await;
        assert!(matches!(conflict, Err(InterestError::ResponseConflict { .. })));

        let stored = store.find_lead(lead.category, lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Interested);
        assert_eq!(stored.interest_response, Some(InterestResponse::Yes));
    }

    #[tokio::test]
    async fn test_invalid_token_does_not_mutate() {
        let store = Arc::new(InMemoryLeadStore::new());
        let lead = quoted_lead(&store).await;
        let service = InterestService::new(store.clone(), SECRET.to_string());

        let result = service
            .respond(lead.category, lead.id, "deadbeef", InterestResponse::Yes, Utc::now())
            .await;
        assert!(matches!(result, Err(InterestError::InvalidToken)));

        let stored = store.find_lead(lead.category, lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::QuoteSent);
        assert!(stored.interest_response_at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_lead_is_not_found() {
        let store = Arc::new(InMemoryLeadStore::new());
        let service = InterestService::new(store, SECRET.to_string());
        let id = Uuid::new_v4();
        let token = response_token(SECRET, LeadCategory::Dakkapel, id);

        let result = service
            .respond(LeadCategory::Dakkapel, id, &token, InterestResponse::No, Utc::now())
            .await;
        assert!(matches!(result, Err(InterestError::NotFound)));
    }

    #[tokio::test]
    async fn test_new_lead_is_not_awaiting_response() {
        let store = Arc::new(InMemoryLeadStore::new());
        let lead = Lead::new(
            LeadCategory::Renovatie,
            "Kees",
            "kees@example.nl",
            json!({}),
            Utc::now(),
        );
        store.insert(lead.clone()).await;
        let service = InterestService::new(store, SECRET.to_string());
        let token = response_token(SECRET, lead.category, lead.id);

        let result = service
            .respond(lead.category, lead.id, &token, InterestResponse::Yes, Utc::now())
            .await;
        assert!(matches!(
            result,
            Err(InterestError::NotAwaitingResponse(LeadStatus::New))
        ));
    }
}
