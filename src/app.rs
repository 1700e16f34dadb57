use crate::config::Config;
use crate::db_storage::{PgConversationStore, PgLeadStore};
use crate::dispatch::DispatchService;
use crate::email_client::EmailClient;
use crate::follow_up::FollowUpScheduler;
use crate::handlers::AppState;
use crate::interest::InterestService;
use crate::keyed_lock::KeyedLocks;
use crate::orchestrator::ConversationOrchestrator;
use crate::whatsapp_client::WhatsAppClient;
use sqlx::PgPool;
use std::sync::Arc;

/// Wires the Postgres stores and provider clients into the services.
pub fn build_state(config: &Config, pool: PgPool) -> anyhow::Result<AppState> {
    let leads = Arc::new(PgLeadStore::new(pool.clone()));
    let conversations = Arc::new(PgConversationStore::new(pool));

    let email = Arc::new(EmailClient::new(
        config.email_api_url.clone(),
        config.email_api_key.clone(),
        config.email_from.clone(),
        config.http_timeout(),
    )?);
    tracing::info!("✓ Email client initialized: {}", config.email_api_url);

    let whatsapp = Arc::new(WhatsAppClient::new(
        config.whatsapp_api_url.clone(),
        config.whatsapp_phone_number_id.clone(),
        config.whatsapp_token.clone(),
        config.http_timeout(),
    )?);
    tracing::info!("✓ WhatsApp client initialized: {}", config.whatsapp_api_url);

    let locks = KeyedLocks::default();

    Ok(AppState {
        leads: leads.clone(),
        dispatch: DispatchService::new(leads.clone(), email, config.dispatch_settings()),
        interest: InterestService::new(leads, config.response_token_secret.clone()),
        orchestrator: ConversationOrchestrator::new(
            conversations.clone(),
            whatsapp.clone(),
            locks.clone(),
            config.conversation_settings(),
        ),
        follow_ups: FollowUpScheduler::new(
            conversations,
            whatsapp,
            locks,
            config.conversation_settings(),
        ),
        operator_token: config.operator_token.clone(),
        whatsapp_verify_token: config.whatsapp_verify_token.clone(),
    })
}
