use crate::handlers::AppState;
use crate::orchestrator::{AcceptOutcome, AcceptedInbound, ConversationOrchestrator, InboundOutcome};
use crate::response_token::constant_time_compare;
use crate::webhook_models::{VerifyQuery, WebhookPayload, WebhookResponse};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

/// GET /api/v1/webhooks/whatsapp
///
/// Subscription handshake: echoes `hub.challenge` when the verify token
/// matches the configured one.
pub async fn verify_whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> (StatusCode, String) {
    let Some(ref expected) = state.whatsapp_verify_token else {
        tracing::warn!("Webhook verification attempted but WHATSAPP_VERIFY_TOKEN is not set");
        return (StatusCode::FORBIDDEN, "verification disabled".to_string());
    };

    let mode_ok = query.mode.as_deref() == Some("subscribe");
    let token_ok = query
        .verify_token
        .as_deref()
        .is_some_and(|token| constant_time_compare(token, expected));

    match (mode_ok && token_ok, query.challenge) {
        (true, Some(challenge)) => {
            tracing::info!("✓ WhatsApp webhook verified");
            (StatusCode::OK, challenge)
        }
        _ => {
            tracing::warn!("Invalid webhook verification request");
            (StatusCode::FORBIDDEN, "forbidden".to_string())
        }
    }
}

/// POST /api/v1/webhooks/whatsapp
///
/// Receives inbound messages. Always answers 200 so the provider does not
/// retry on our account: dedupe keys are claimed inline, the state machine
/// runs on a background task, and per-event failures are only logged.
///
/// Expected payload: WhatsApp Cloud envelope, a flat event, or an array of
/// flat events.
pub async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let now = Utc::now();

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Unparseable messaging webhook payload: {}", e);
            return (
                StatusCode::OK,
                Json(WebhookResponse {
                    status: "ignored".to_string(),
                    received: 0,
                    accepted: 0,
                    duplicates: 0,
                    ignored: 1,
                }),
            );
        }
    };

    let (events, mut ignored) = payload.into_events(now);
    let received = events.len();
    let mut accepted = 0;
    let mut duplicates = 0;

    for event in events {
        match state.orchestrator.accept_inbound(&event, now).await {
            Ok(AcceptOutcome::Accepted(inbound)) => {
                accepted += 1;
                spawn_processing(state.orchestrator.clone(), inbound);
            }
            Ok(AcceptOutcome::Duplicate) => duplicates += 1,
            Err(e) => {
                tracing::error!("Failed to accept inbound message from {}: {}", event.from, e);
                ignored += 1;
            }
        }
    }

    tracing::info!(
        "Webhook processing complete: {} received, {} accepted, {} duplicates, {} ignored",
        received,
        accepted,
        duplicates,
        ignored
    );

    (
        StatusCode::OK,
        Json(WebhookResponse {
            status: "received".to_string(),
            received,
            accepted,
            duplicates,
            ignored,
        }),
    )
}

/// Spawn background state-machine processing (non-blocking)
fn spawn_processing(orchestrator: ConversationOrchestrator, inbound: AcceptedInbound) {
    tokio::spawn(async move {
        match orchestrator.process_inbound(&inbound).await {
            Ok(InboundOutcome::Replied(reply)) => tracing::debug!(
                "Inbound {} processed: now at {}",
                inbound.dedupe_key,
                reply.step
            ),
            Ok(other) => tracing::debug!("Inbound {} not applied: {:?}", inbound.dedupe_key, other),
            Err(e) => tracing::error!(
                "❌ Failed to process inbound {} from {}: {}",
                inbound.dedupe_key,
                inbound.phone_number,
                e
            ),
        }
    });
}
