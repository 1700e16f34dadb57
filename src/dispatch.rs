//! Lead claim & quote dispatch.
//!
//! The conditional claim (`new → sending`) is the only concurrency guard:
//! overlapping runs may see the same candidates, but only one of them can
//! claim a lead, so every lead gets at most one quote email and one
//! `quote_sent_at` write.

use crate::email_client::{EmailSender, OutboundEmail};
use crate::models::{DispatchReport, ItemError, Lead, LeadCategory, LeadStatus, Money, RunOptions};
use crate::pricing::{self, PricingError};
use crate::quote_template::{render_quote, ActionLinks, RenderedQuote};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::{LeadStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Only leads created within this window are considered.
    pub lookback: Duration,
    /// Leads processed in parallel within one run.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub public_base_url: String,
    pub token_secret: String,
    pub categories: Vec<LeadCategory>,
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Email went out but the terminal update was not persisted. The lead is
    /// left in `sending` and flagged; it is never resent automatically.
    SentPendingReconciliation(String),
    /// Lost the claim race to a concurrent run.
    AlreadyClaimed,
    Failed(String),
    Previewed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Perform the missing terminal update for a quote that was delivered.
    ConfirmSent,
    /// Explicit manual reset to `new`; the lead becomes eligible again.
    Reset,
}

#[derive(Clone)]
pub struct DispatchService {
    leads: Arc<dyn LeadStore>,
    email: Arc<dyn EmailSender>,
    settings: Arc<DispatchSettings>,
}

impl DispatchService {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        email: Arc<dyn EmailSender>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            leads,
            email,
            settings: Arc::new(settings),
        }
    }

    /// One batch pass over every configured category. Per-lead failures end
    /// up in the report; nothing here aborts the batch.
    pub async fn run_once(&self, options: RunOptions, now: DateTime<Utc>) -> DispatchReport {
        let since = now - self.settings.lookback;
        let mut report = DispatchReport {
            dry_run: options.dry_run,
            ..DispatchReport::default()
        };

        tracing::info!(
            "🚀 Dispatch run started (dry_run={}, since={})",
            options.dry_run,
            since
        );

        let mut candidates = Vec::new();
        for category in &self.settings.categories {
            match self.leads.find_dispatch_candidates(*category, since).await {
                Ok(found) => {
                    tracing::debug!("{} candidate(s) in {}", found.len(), category);
                    candidates.extend(found);
                }
                Err(e) => {
                    tracing::error!("❌ Failed to load {} candidates: {}", category, e);
                    report.errors.push(ItemError {
                        lead_id: None,
                        category: Some(*category),
                        reason: format!("candidate query failed: {}", e),
                    });
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for lead in candidates {
            let service = self.clone();
            let semaphore = semaphore.clone();
            let (category, id) = (lead.category, lead.id);
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => service.dispatch_lead(lead, options.dry_run, now).await,
                    Err(_) => DispatchOutcome::Failed("dispatch worker pool closed".to_string()),
                };
                (category, id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((category, id, outcome)) => record(&mut report, category, id, outcome),
                Err(e) => {
                    tracing::error!("❌ Dispatch task panicked: {}", e);
                    report.failed += 1;
                    report.errors.push(ItemError {
                        lead_id: None,
                        category: None,
                        reason: format!("dispatch task failed: {}", e),
                    });
                }
            }
        }

        tracing::info!(
            "✓ Dispatch run finished: sent={} failed={} skipped={} previewed={} reconciliation={}",
            report.sent,
            report.failed,
            report.skipped_already_claimed,
            report.previewed,
            report.reconciliation_required
        );
        report
    }

    /// Prices, renders, claims and sends a single lead.
    ///
    /// Pricing and rendering happen before the claim so a lead with an
    /// incomplete configuration is never touched and stays `new` for manual
    /// pricing.
    pub async fn dispatch_lead(
        &self,
        lead: Lead,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let (category, id) = (lead.category, lead.id);

        let (rendered, price) = match self.prepare(&lead) {
            Ok(prepared) => prepared,
            Err(reason) => {
                tracing::warn!("⚠️  Lead {} ({}) not dispatchable: {}", id, category, reason);
                return DispatchOutcome::Failed(reason);
            }
        };

        if dry_run {
            tracing::info!(
                "Dry run: would send quote to {} for lead {} ({})",
                lead.email,
                id,
                category
            );
            return DispatchOutcome::Previewed;
        }

        match self.leads.claim_for_dispatch(category, id, now).await {
            Ok(true) => tracing::info!("🔒 Claimed lead {} ({})", id, category),
            Ok(false) => {
                tracing::debug!("Lead {} ({}) already claimed, skipping", id, category);
                return DispatchOutcome::AlreadyClaimed;
            }
            Err(e) => {
                tracing::error!("❌ Claim failed for lead {} ({}): {}", id, category, e);
                return DispatchOutcome::Failed(format!("claim failed: {}", e));
            }
        }

        let email = OutboundEmail {
            to: lead.email.clone(),
            to_name: lead.name.clone(),
            subject: rendered.subject,
            text: rendered.text,
        };
        let operation = format!("quote email for lead {}", id);
        let sent = retry_with_backoff(&self.settings.retry, &operation, |_| self.email.send(&email)).await;

        let message_id = match sent {
            Ok(message_id) => message_id,
            Err(e) => {
                let reason = format!("email delivery failed: {}", e);
                let note = format!("[{}] {}", now.to_rfc3339(), reason);
                match self.leads.release_claim(category, id, &note, now).await {
                    Ok(true) => tracing::warn!("↩️  Released claim on lead {} ({})", id, category),
                    Ok(false) => tracing::warn!(
                        "Claim on lead {} ({}) was no longer held when releasing",
                        id,
                        category
                    ),
                    Err(release_err) => tracing::error!(
                        "❌ Could not release claim on lead {} ({}): {}",
                        id,
                        category,
                        release_err
                    ),
                }
                return DispatchOutcome::Failed(reason);
            }
        };

        tracing::info!("📧 Quote for lead {} delivered (message id {})", id, message_id);
        self.complete(category, id, price, now).await
    }

    fn prepare(&self, lead: &Lead) -> Result<(RenderedQuote, Option<Money>), String> {
        if lead.email.trim().is_empty() {
            return Err("lead has no email address".to_string());
        }
        let breakdown = pricing::quote(lead.category, &lead.configuration)
            .map_err(|e: PricingError| e.to_string())?;
        let links = ActionLinks::for_lead(
            &self.settings.public_base_url,
            &self.settings.token_secret,
            lead,
        )
        .map_err(|e| format!("could not build response links: {}", e))?;

        Ok((render_quote(lead, &breakdown, &links), breakdown.price.amount()))
    }

    /// Terminal update after a successful send. Never triggers a resend.
    async fn complete(
        &self,
        category: LeadCategory,
        id: Uuid,
        price: Option<Money>,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let operation = format!("terminal update for lead {}", id);
        let updated = retry_with_backoff(&self.settings.retry, &operation, |_| {
            self.leads.mark_quote_sent(category, id, price, now)
        })
        .await;

        let reason = match updated {
            Ok(true) => {
                tracing::info!("✓ Lead {} ({}) marked quote_sent", id, category);
                return DispatchOutcome::Sent;
            }
            Ok(false) => match self.leads.find_lead(category, id).await {
                Ok(Some(lead)) if lead.quote_sent_at.is_some() => {
                    tracing::info!("Lead {} ({}) already marked quote_sent", id, category);
                    return DispatchOutcome::Sent;
                }
                Ok(Some(lead)) => format!(
                    "terminal update did not apply (status is {})",
                    lead.status
                ),
                Ok(None) => "lead disappeared before terminal update".to_string(),
                Err(e) => format!("terminal update did not apply; re-read failed: {}", e),
            },
            Err(e) => format!("terminal update failed: {}", e),
        };

        tracing::error!(
            "🚩 Quote for lead {} ({}) was sent but {}; flagging for reconciliation",
            id,
            category,
            reason
        );
        let note = format!("[{}] quote email sent; {}", now.to_rfc3339(), reason);
        let flagged = retry_with_backoff(&self.settings.retry, "reconciliation flag", |_| {
            self.leads.flag_for_reconciliation(category, id, &note, now)
        })
        .await;
        if let Err(e) = flagged {
            // Lead stays in `sending`, which no run will claim again.
            tracing::error!("❌ Could not flag lead {} ({}) for reconciliation: {}", id, category, e);
        }

        DispatchOutcome::SentPendingReconciliation(reason)
    }

    /// Operator resolution of a lead flagged for reconciliation.
    pub async fn reconcile(
        &self,
        category: LeadCategory,
        id: Uuid,
        action: ReconcileAction,
        now: DateTime<Utc>,
    ) -> Result<ReconcileResult, StoreError> {
        let Some(lead) = self.leads.find_lead(category, id).await? else {
            return Ok(ReconcileResult::NotFound);
        };

        let applied = match action {
            ReconcileAction::ConfirmSent => {
                if lead.status != LeadStatus::Sending {
                    false
                } else {
                    // Price is a pure function of the stored configuration.
                    let price = pricing::price(category, &lead.configuration)
                        .ok()
                        .and_then(|p| p.amount());
                    self.leads.mark_quote_sent(category, id, price, now).await?
                }
            }
            ReconcileAction::Reset => {
                let note = format!("[{}] manual reset by operator", now.to_rfc3339());
                self.leads.reset_dispatch(category, id, &note, now).await?
            }
        };

        tracing::info!(
            "Operator {:?} on lead {} ({}): applied={}",
            action,
            id,
            category,
            applied
        );

        if !applied {
            return Ok(ReconcileResult::NotApplicable(lead));
        }
        match self.leads.find_lead(category, id).await? {
            Some(updated) => Ok(ReconcileResult::Applied(updated)),
            None => Ok(ReconcileResult::NotFound),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileResult {
    Applied(Lead),
    /// The lead's status does not allow the action; returned unchanged.
    NotApplicable(Lead),
    NotFound,
}

fn record(report: &mut DispatchReport, category: LeadCategory, id: Uuid, outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Sent => report.sent += 1,
        DispatchOutcome::SentPendingReconciliation(reason) => {
            report.sent += 1;
            report.reconciliation_required += 1;
            report.errors.push(ItemError {
                lead_id: Some(id),
                category: Some(category),
                reason,
            });
        }
        DispatchOutcome::AlreadyClaimed => report.skipped_already_claimed += 1,
        DispatchOutcome::Failed(reason) => {
            report.failed += 1;
            report.errors.push(ItemError {
                lead_id: Some(id),
                category: Some(category),
                reason,
            });
        }
        DispatchOutcome::Previewed => report.previewed += 1,
    }
}
