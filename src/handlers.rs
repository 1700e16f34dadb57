use crate::conversation::TransitionOutcome;
use crate::dispatch::{DispatchService, ReconcileAction, ReconcileResult};
use crate::errors::{AppError, ResultExt};
use crate::follow_up::FollowUpScheduler;
use crate::interest::{InterestError, InterestOutcome, InterestService};
use crate::models::{
    DispatchReport, FollowUpReport, InterestResponse, Lead, LeadCategory, LeadStatus, RunOptions,
};
use crate::orchestrator::{ConversationOrchestrator, NurtureTrigger, TriggerOutcome};
use crate::response_token::constant_time_compare;
use crate::store::LeadStore;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Html,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub leads: Arc<dyn LeadStore>,
    pub dispatch: DispatchService,
    pub interest: InterestService,
    pub orchestrator: ConversationOrchestrator,
    pub follow_ups: FollowUpScheduler,
    /// Shared secret for operator endpoints; `None` leaves them open.
    pub operator_token: Option<String>,
    /// Token the messaging provider echoes during webhook verification.
    pub whatsapp_verify_token: Option<String>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-quote-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/dispatch/run
///
/// Runs one quote dispatch batch. Safe to call concurrently with other runs
/// and with the scheduled batch binary.
pub async fn run_dispatch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    options: Option<Json<RunOptions>>,
) -> Result<Json<DispatchReport>, AppError> {
    require_operator(&state, &headers)?;
    let options = options.map(|Json(o)| o).unwrap_or_default();
    tracing::info!("POST /dispatch/run (dry_run={})", options.dry_run);

    Ok(Json(state.dispatch.run_once(options, Utc::now()).await))
}

/// POST /api/v1/follow-ups/run
pub async fn run_follow_ups(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    options: Option<Json<RunOptions>>,
) -> Result<Json<FollowUpReport>, AppError> {
    require_operator(&state, &headers)?;
    let options = options.map(|Json(o)| o).unwrap_or_default();
    tracing::info!("POST /follow-ups/run (dry_run={})", options.dry_run);

    Ok(Json(state.follow_ups.run_due(options, Utc::now()).await))
}

#[derive(Debug, Deserialize)]
pub struct InterestQuery {
    pub id: Option<String>,
    pub response: Option<String>,
    pub category: Option<String>,
    pub token: Option<String>,
}

/// GET|POST /api/v1/interest
///
/// Target of the one-click links in quote emails. Mail clients may prefetch
/// links, so every outcome is idempotent and rendered as a small HTML page.
pub async fn interest(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InterestQuery>,
) -> (StatusCode, Html<String>) {
    let parsed = (|| {
        let id = params.id.as_deref()?.trim().parse::<Uuid>().ok()?;
        let response = params.response.as_deref()?.parse::<InterestResponse>().ok()?;
        let category = params.category.as_deref()?.parse::<LeadCategory>().ok()?;
        Some((id, response, category))
    })();
    let Some((id, response, category)) = parsed else {
        tracing::warn!("Malformed interest request: {:?}", params);
        return page(
            StatusCode::BAD_REQUEST,
            "Ongeldige link",
            "Deze link is onvolledig of beschadigd. Neem gerust contact met ons op.",
        );
    };
    let token = params.token.as_deref().unwrap_or_default();

    match state
        .interest
        .respond(category, id, token, response, Utc::now())
        .await
    {
        Ok(outcome) => {
            let body = match response {
                InterestResponse::Yes => {
                    "Bedankt voor uw reactie! Een van onze adviseurs neemt binnenkort contact met u op."
                }
                InterestResponse::No => {
                    "Jammer dat de offerte niet aansluit. Bedankt voor het laten weten."
                }
            };
            if matches!(outcome, InterestOutcome::AlreadyRecorded(_)) {
                tracing::debug!("Repeated interest click for lead {}", id);
            }
            page(StatusCode::OK, "Bedankt", body)
        }
        Err(InterestError::ResponseConflict { .. }) => page(
            StatusCode::CONFLICT,
            "Reactie al ontvangen",
            "We hadden uw reactie op deze offerte al ontvangen. Wilt u iets wijzigen? Neem dan contact met ons op.",
        ),
        Err(InterestError::NotAwaitingResponse(status)) => {
            tracing::info!("Interest click for lead {} in status {}", id, status);
            page(
                StatusCode::CONFLICT,
                "Offerte niet actief",
                "Deze offerte is niet meer actief. Neem gerust contact met ons op.",
            )
        }
        Err(InterestError::NotFound) => page(
            StatusCode::NOT_FOUND,
            "Niet gevonden",
            "We konden deze offerte niet vinden.",
        ),
        Err(InterestError::InvalidToken) => page(
            StatusCode::FORBIDDEN,
            "Ongeldige link",
            "Deze link is niet geldig.",
        ),
        Err(InterestError::Store(e)) => {
            tracing::error!("❌ Storage error recording interest for lead {}: {}", id, e);
            page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Er ging iets mis",
                "Probeer het later nog eens.",
            )
        }
    }
}

fn page(status: StatusCode, title: &str, body: &str) -> (StatusCode, Html<String>) {
    (
        status,
        Html(format!(
            "<!DOCTYPE html><html lang=\"nl\"><head><meta charset=\"utf-8\"><title>{title}</title></head>\
             <body><h1>{title}</h1><p>{body}</p></body></html>"
        )),
    )
}

/// POST /api/v1/nurture
///
/// Starts a conversation (`step = initial`) or feeds a reply into one.
pub async fn nurture(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<NurtureTrigger>,
) -> Result<Json<Value>, AppError> {
    require_operator(&state, &headers)?;
    tracing::info!(
        "POST /nurture - lead {} step {}",
        request.lead_id,
        request.step
    );

    let outcome = state.orchestrator.trigger(&request, Utc::now()).await?;
    let body = match outcome {
        TriggerOutcome::Started(conversation) => json!({
            "status": "started",
            "phoneNumber": conversation.phone_number,
            "step": conversation.current_step,
        }),
        TriggerOutcome::Replied(reply) => json!({
            "status": "advanced",
            "step": reply.step,
            "recognized": reply.outcome != TransitionOutcome::Unrecognized,
            "messageSent": reply.message_sent,
        }),
        TriggerOutcome::StepMismatch { current } => {
            return Err(AppError::Conflict(format!(
                "conversation is at step {}",
                current
            )))
        }
    };
    Ok(Json(body))
}

/// GET /api/v1/leads/reconciliation
pub async fn list_reconciliation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Lead>>, AppError> {
    require_operator(&state, &headers)?;
    let leads = state
        .leads
        .list_reconciliation()
        .await
        .context("Failed to list leads for reconciliation")?;
    Ok(Json(leads))
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub action: ReconcileAction,
}

/// POST /api/v1/leads/:category/:id/reconcile
pub async fn reconcile_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((category, id)): Path<(String, Uuid)>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<Lead>, AppError> {
    require_operator(&state, &headers)?;
    let category = parse_category(&category)?;

    match state
        .dispatch
        .reconcile(category, id, request.action, Utc::now())
        .await
        .context(format!("Failed to reconcile lead {}", id))?
    {
        ReconcileResult::Applied(lead) => Ok(Json(lead)),
        ReconcileResult::NotApplicable(lead) => Err(AppError::Conflict(format!(
            "lead {} is in status {}",
            id, lead.status
        ))),
        ReconcileResult::NotFound => Err(AppError::NotFound(format!("lead {} not found", id))),
    }
}

/// POST /api/v1/leads/:category/:id/close
pub async fn close_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((category, id)): Path<(String, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_operator(&state, &headers)?;
    let category = parse_category(&category)?;

    if state.leads.close_lead(category, id, Utc::now()).await? {
        tracing::info!("Lead {} ({}) closed", id, category);
        return Ok(Json(json!({ "id": id, "status": LeadStatus::Closed })));
    }

    match state.leads.find_lead(category, id).await? {
        Some(lead) => Err(AppError::Conflict(format!(
            "lead {} is in status {}",
            id, lead.status
        ))),
        None => Err(AppError::NotFound(format!("lead {} not found", id))),
    }
}

fn parse_category(raw: &str) -> Result<LeadCategory, AppError> {
    raw.parse::<LeadCategory>().map_err(AppError::BadRequest)
}

/// Validate operator token from X-Operator-Token header
pub fn require_operator(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(ref expected) = state.operator_token else {
        return Ok(());
    };

    let token = headers
        .get("X-Operator-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Operator-Token header".to_string()))?;

    // Constant-time comparison to prevent timing attacks
    if !constant_time_compare(token, expected) {
        tracing::warn!("Invalid operator token received");
        return Err(AppError::Unauthorized("Invalid operator token".to_string()));
    }

    Ok(())
}
