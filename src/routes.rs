use crate::handlers::{self, AppState};
use crate::webhook_handler;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Builds the HTTP surface.
///
/// Per-IP rate limiting needs the peer address, so it is only applied when the
/// router is served with `into_make_service_with_connect_info`; in-process
/// tests build it with `rate_limited = false`.
pub fn build_router(state: Arc<AppState>, rate_limited: bool) -> anyhow::Result<Router> {
    let mut protected_routes = Router::new()
        .route("/api/v1/dispatch/run", post(handlers::run_dispatch))
        .route("/api/v1/follow-ups/run", post(handlers::run_follow_ups))
        .route(
            "/api/v1/interest",
            get(handlers::interest).post(handlers::interest),
        )
        .route(
            "/api/v1/webhooks/whatsapp",
            get(webhook_handler::verify_whatsapp_webhook).post(webhook_handler::whatsapp_webhook),
        )
        .route("/api/v1/nurture", post(handlers::nurture))
        .route(
            "/api/v1/leads/reconciliation",
            get(handlers::list_reconciliation),
        )
        .route(
            "/api/v1/leads/:category/:id/reconcile",
            post(handlers::reconcile_lead),
        )
        .route(
            "/api/v1/leads/:category/:id/close",
            post(handlers::close_lead),
        )
        // Request size limit: 1MB max payload
        .layer(RequestBodyLimitLayer::new(1024 * 1024));

    if rate_limited {
        // 10 req/sec per IP, burst of 20
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(10)
                .burst_size(20)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
        );
        protected_routes = protected_routes.layer(ServiceBuilder::new().layer(GovernorLayer {
            config: governor_conf,
        }));
    }

    // Health check bypasses rate limiting
    Ok(Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()))
}
