//! Fires due reminders.
//!
//! Each due reminder is claimed with `scheduled → sending` before anything is
//! sent, so overlapping scheduler runs cannot deliver the same reminder twice.

use crate::conversation::reminder_message;
use crate::email_client::DeliveryError;
use crate::keyed_lock::KeyedLocks;
use crate::models::{FollowUp, FollowUpReport, FollowUpStatus, ItemError, RunOptions};
use crate::orchestrator::ConversationSettings;
use crate::retry::{retry_with_backoff, Retryable};
use crate::store::{ConversationStore, StoreError};
use crate::whatsapp_client::MessagingSender;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on reminders handled per run.
const BATCH_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FireOutcome {
    Sent,
    Cancelled,
    AlreadyClaimed,
    Previewed,
    /// Left for the next run unless the reason is permanent.
    Failed(String),
}

#[derive(Clone)]
pub struct FollowUpScheduler {
    conversations: Arc<dyn ConversationStore>,
    messaging: Arc<dyn MessagingSender>,
    locks: KeyedLocks,
    settings: Arc<ConversationSettings>,
}

impl FollowUpScheduler {
    /// `locks` must be shared with the orchestrator so a reminder never
    /// interleaves with an inbound reply for the same number.
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

    pub async fn run_due(&self, options: RunOptions, now: DateTime<Utc>) -> FollowUpReport {
        let mut report = FollowUpReport {
            dry_run: options.dry_run,
            ..FollowUpReport::default()
        };

        let due = match self.conversations.due_follow_ups(now, BATCH_LIMIT).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("❌ Failed to load due follow-ups: {}", e);
                report.errors.push(ItemError {
                    lead_id: None,
                    category: None,
                    reason: format!("follow-up query failed: {}", e),
                });
                return report;
            }
        };
        tracing::info!("⏰ {} follow-up(s) due (dry_run={})", due.len(), options.dry_run);

        for follow_up in due {
            let lead_id = follow_up.lead_id;
            let outcome = match self.fire(&follow_up, options.dry_run, now).await {
                Ok(outcome) => outcome,
                Err(e) => FireOutcome::Failed(format!("storage error: {}", e)),
            };
            match outcome {
                FireOutcome::Sent => report.sent += 1,
                FireOutcome::Cancelled => report.cancelled += 1,
                FireOutcome::AlreadyClaimed => report.skipped_already_claimed += 1,
                FireOutcome::Previewed => report.previewed += 1,
                FireOutcome::Failed(reason) => {
                    report.failed += 1;
                    report.errors.push(ItemError {
                        lead_id: Some(lead_id),
                        category: None,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            "✓ Follow-up run finished: sent={} cancelled={} failed={} skipped={}",
            report.sent,
            report.cancelled,
            report.failed,
            report.skipped_already_claimed
        );
        report
    }

    async fn fire(
        &self,
        follow_up: &FollowUp,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome, StoreError> {
        let phone = follow_up.phone_number.as_str();

        if dry_run {
            let current = self.conversations.get_conversation(phone).await?;
            let still_waiting = current.is_some_and(|c| c.current_step == follow_up.step);
            tracing::info!(
                "Dry run: {} {} for {} would be {}",
                follow_up.reminder_type.as_str(),
                follow_up.id,
                phone,
                if still_waiting { "sent" } else { "cancelled" }
            );
            return Ok(FireOutcome::Previewed);
        }

        if !self
            .conversations
            .transition_follow_up(follow_up.id, FollowUpStatus::Scheduled, FollowUpStatus::Sending)
            .await?
        {
            tracing::debug!("Follow-up {} already claimed", follow_up.id);
            return Ok(FireOutcome::AlreadyClaimed);
        }

        let _guard = self.locks.lock(phone).await;

        let conversation = self.conversations.get_conversation(phone).await?;
        let advanced = match &conversation {
            Some(state) => state.current_step != follow_up.step,
            None => true,
        };
        if advanced {
            self.finish(follow_up.id, FollowUpStatus::Cancelled).await?;
            tracing::info!(
                "🚫 Cancelled {} {} for {}: conversation moved on",
                follow_up.reminder_type.as_str(),
                follow_up.id,
                phone
            );
            return Ok(FireOutcome::Cancelled);
        }

        let message = reminder_message(&follow_up.customer_name, follow_up.reminder_type);
        let operation = format!("{} to {}", follow_up.reminder_type.as_str(), phone);
        let sent = retry_with_backoff(&self.settings.retry, &operation, |_| {
            self.messaging.send_text(phone, &message)
        })
        .await;

        if let Err(e) = sent {
            let permanent = is_permanent(&e);
            let status = if permanent {
                FollowUpStatus::Cancelled
            } else {
                FollowUpStatus::Scheduled
            };
            self.finish(follow_up.id, status).await?;
            tracing::error!(
                "❌ {} {} for {} failed ({}): {}",
                follow_up.reminder_type.as_str(),
                follow_up.id,
                phone,
                if permanent { "cancelled" } else { "will retry" },
                e
            );
            return Ok(FireOutcome::Failed(format!("reminder delivery failed: {}", e)));
        }

        self.finish(follow_up.id, FollowUpStatus::Sent).await?;
        tracing::info!(
            "✓ Sent {} {} to {}",
            follow_up.reminder_type.as_str(),
            follow_up.id,
            phone
        );

        if let Some(next) = follow_up.reminder_type.next() {
            let next_follow_up = FollowUp {
                id: Uuid::new_v4(),
                scheduled_for: now + self.settings.second_reminder_offset,
                reminder_type: next,
                status: FollowUpStatus::Scheduled,
                created_at: now,
                ..follow_up.clone()
            };
            self.conversations.schedule_follow_up(&next_follow_up).await?;
            tracing::info!(
                "Scheduled {} for {} at {}",
                next.as_str(),
                phone,
                next_follow_up.scheduled_for
            );
        }

        Ok(FireOutcome::Sent)
    }

    async fn finish(&self, id: Uuid, to: FollowUpStatus) -> Result<(), StoreError> {
        if !self
            .conversations
            .transition_follow_up(id, FollowUpStatus::Sending, to)
            .await?
        {
            tracing::warn!("Follow-up {} was no longer in sending when moving to {}", id, to.as_str());
        }
        Ok(())
    }
}

/// Client errors other than throttling will not succeed on a later run.
fn is_permanent(error: &DeliveryError) -> bool {
    matches!(error, DeliveryError::Provider { .. }) && !error.is_retryable()
}
