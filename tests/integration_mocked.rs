/// Integration tests with mocked provider APIs
/// Exercises the email and WhatsApp clients and the HTTP surface without real services
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use lead_quote_api::dispatch::{DispatchService, DispatchSettings};
use lead_quote_api::email_client::{DeliveryError, EmailClient, EmailSender, OutboundEmail};
use lead_quote_api::follow_up::FollowUpScheduler;
use lead_quote_api::handlers::AppState;
use lead_quote_api::interest::InterestService;
use lead_quote_api::keyed_lock::KeyedLocks;
use lead_quote_api::memory_storage::{InMemoryConversationStore, InMemoryLeadStore};
use lead_quote_api::models::{Lead, LeadCategory, LeadStatus};
use lead_quote_api::orchestrator::{ConversationOrchestrator, ConversationSettings};
use lead_quote_api::response_token::response_token;
use lead_quote_api::retry::{RetryPolicy, Retryable};
use lead_quote_api::routes::build_router;
use lead_quote_api::store::{ConversationStore, LeadStore};
use lead_quote_api::whatsapp_client::{MessagingSender, WhatsAppClient};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OPERATOR_TOKEN: &str = "operator-token";
const SECRET: &str = "test-secret";

fn email_client(base_url: String) -> EmailClient {
    EmailClient::new(
        base_url,
        "re_test_key".to_string(),
        "Offertes <offerte@example.nl>".to_string(),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn whatsapp_client(base_url: String) -> WhatsAppClient {
    WhatsAppClient::new(
        base_url,
        "1234567890".to_string(),
        "wa_test_token".to_string(),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn outbound() -> OutboundEmail {
    OutboundEmail {
        to: "jan@example.nl".to_string(),
        to_name: "Jan de Vries".to_string(),
        subject: "Uw offerte".to_string(),
        text: "Beste Jan".to_string(),
    }
}

#[tokio::test]
async fn test_email_successful_send() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("Authorization", "Bearer re_test_key"))
        .and(body_partial_json(json!({
            "from": "Offertes <offerte@example.nl>",
            "to": ["Jan de Vries <jan@example.nl>"],
            "subject": "Uw offerte"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "email_123"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = email_client(mock_server.uri());
    let id = client.send(&outbound()).await.unwrap();
    assert_eq!(id, "email_123");
}

#[tokio::test]
async fn test_email_accepted_without_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(202).set_body_string("queued"))
        .mount(&mock_server)
        .await;

    let client = email_client(mock_server.uri());
    assert_eq!(client.send(&outbound()).await.unwrap(), "unknown");
}

#[tokio::test]
async fn test_email_server_error_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let client = email_client(mock_server.uri());
    let err = client.send(&outbound()).await.unwrap_err();
    assert_eq!(
        err,
        DeliveryError::Provider {
            status: 500,
            body: "Internal Server Error".to_string()
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_email_validation_error_is_permanent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"message": "Invalid `to` field"})),
        )
        .mount(&mock_server)
        .await;

    let client = email_client(mock_server.uri());
    let err = client.send(&outbound()).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Provider { status: 422, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_email_rejections_keep_circuit_closed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"message": "Invalid `to` field"})),
        )
        .expect(7)
        .mount(&mock_server)
        .await;

    // A batch full of bad addresses must keep reaching the provider
    let client = email_client(mock_server.uri());
    for _ in 0..7 {
        assert!(matches!(
            client.send(&outbound()).await,
            Err(DeliveryError::Provider { status: 422, .. })
        ));
    }
}

#[tokio::test]
async fn test_email_circuit_opens_after_repeated_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(503))
        .expect(5)
        .mount(&mock_server)
        .await;

    let client = email_client(mock_server.uri());
    for _ in 0..5 {
        assert!(matches!(
            client.send(&outbound()).await,
            Err(DeliveryError::Provider { status: 503, .. })
        ));
    }

    // Rejected locally, the provider sees no sixth request
    let err = client.send(&outbound()).await.unwrap_err();
    assert_eq!(err, DeliveryError::CircuitOpen("email".to_string()));
}

#[tokio::test]
async fn test_whatsapp_successful_send() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1234567890/messages"))
        .and(header("Authorization", "Bearer wa_test_token"))
        .and(body_partial_json(json!({
            "messaging_product": "whatsapp",
            "to": "31612345678",
            "type": "text",
            "text": {"body": "Hallo Jan"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messaging_product": "whatsapp",
            "contacts": [{"input": "31612345678", "wa_id": "31612345678"}],
            "messages": [{"id": "wamid.HBgLMzE2MTIzNDU2Nzg"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = whatsapp_client(mock_server.uri());
    let id = client.send_text("+31612345678", "Hallo Jan").await.unwrap();
    assert_eq!(id, "wamid.HBgLMzE2MTIzNDU2Nzg");
}

#[tokio::test]
async fn test_whatsapp_rate_limit_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1234567890/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit hit", "code": 130429}
        })))
        .mount(&mock_server)
        .await;

    let client = whatsapp_client(mock_server.uri());
    let err = client.send_text("+31612345678", "Hallo").await.unwrap_err();
    assert!(matches!(err, DeliveryError::Provider { status: 429, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_whatsapp_unreachable_host_is_transport_error() {
    // Nothing listens on this port
    let client = whatsapp_client("http://127.0.0.1:1".to_string());
    let err = client.send_text("+31612345678", "Hallo").await.unwrap_err();
    assert!(matches!(err, DeliveryError::Transport(_)));
}

// ============ HTTP surface ============

struct TestApp {
    leads: Arc<InMemoryLeadStore>,
    conversations: Arc<InMemoryConversationStore>,
    router: axum::Router,
}

async fn test_app(provider: &MockServer) -> TestApp {
    let leads = Arc::new(InMemoryLeadStore::new());
    let conversations = Arc::new(InMemoryConversationStore::new());
    let email = Arc::new(email_client(provider.uri()));
    let whatsapp = Arc::new(whatsapp_client(provider.uri()));
    let locks = KeyedLocks::default();
    let conversation_settings = ConversationSettings {
        retry: RetryPolicy::immediate(1),
        ..ConversationSettings::default()
    };

    let state = AppState {
        leads: leads.clone(),
        dispatch: DispatchService::new(
            leads.clone(),
            email,
            DispatchSettings {
                lookback: chrono::Duration::hours(24),
                concurrency: 2,
                retry: RetryPolicy::immediate(1),
                public_base_url: "https://offerte.example.nl".to_string(),
                token_secret: SECRET.to_string(),
                categories: LeadCategory::ALL.to_vec(),
            },
        ),
        interest: InterestService::new(leads.clone(), SECRET.to_string()),
        orchestrator: ConversationOrchestrator::new(
            conversations.clone(),
            whatsapp.clone(),
            locks.clone(),
            conversation_settings.clone(),
        ),
        follow_ups: FollowUpScheduler::new(
            conversations.clone(),
            whatsapp,
            locks,
            conversation_settings,
        ),
        operator_token: Some(OPERATOR_TOKEN.to_string()),
        whatsapp_verify_token: Some("verify-me".to_string()),
    };

    TestApp {
        leads,
        conversations,
        router: build_router(Arc::new(state), false).unwrap(),
    }
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

fn operator_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("X-Operator-Token", OPERATOR_TOKEN)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let provider = MockServer::start().await;
    let app = test_app(&provider).await;

    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("healthy"));
}

#[tokio::test]
async fn test_operator_endpoints_require_token() {
    let provider = MockServer::start().await;
    let app = test_app(&provider).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/dispatch/run")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_dispatch_and_interest_over_http() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "email_1"})))
        .expect(1)
        .mount(&provider)
        .await;
    let app = test_app(&provider).await;

    let lead = Lead::new(
        LeadCategory::Kozijnen,
        "Jan de Vries",
        "jan@example.nl",
        json!({"frames": 4, "material": "hout", "triple_glas": true, "montage": true}),
        Utc::now(),
    );
    app.leads.insert(lead.clone()).await;

    let (status, body) = send(&app.router, operator_post("/api/v1/dispatch/run", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["sent"], 1);
    assert_eq!(report["dryRun"], false);

    let requests = provider.received_requests().await.unwrap();
    let email: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(email["text"].as_str().unwrap().contains("€ 4.530,00"));

    let token = response_token(SECRET, lead.category, lead.id);
    let link = format!(
        "/api/v1/interest?id={}&response=yes&category=kozijnen&token={}",
        lead.id, token
    );
    let (status, body) = send(&app.router, get(&link)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Bedankt"));

    // Prefetch or double click
    let (status, _) = send(&app.router, get(&link)).await;
    assert_eq!(status, StatusCode::OK);

    let conflicting = link.replace("response=yes", "response=no");
    let (status, _) = send(&app.router, get(&conflicting)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let stored = app
        .leads
        .find_lead(lead.category, lead.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LeadStatus::Interested);

    let close = format!("/api/v1/leads/kozijnen/{}/close", lead.id);
    let (status, body) = send(&app.router, operator_post(&close, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("closed"));
}

#[tokio::test]
async fn test_interest_link_with_bad_token_is_forbidden() {
    let provider = MockServer::start().await;
    let app = test_app(&provider).await;
    let lead_id = uuid::Uuid::new_v4();

    let (status, _) = send(
        &app.router,
        get(&format!(
            "/api/v1/interest?id={}&response=yes&category=dakkapel&token=deadbeef",
            lead_id
        )),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app.router, get("/api/v1/interest?id=not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_verification_handshake() {
    let provider = MockServer::start().await;
    let app = test_app(&provider).await;

    let (status, body) = send(
        &app.router,
        get("/api/v1/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "12345");

    let (status, _) = send(
        &app.router,
        get("/api/v1/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_acknowledges_and_dedupes() {
    let provider = MockServer::start().await;
    let app = test_app(&provider).await;

    let payload = json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA_ID",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "messages": [{
                        "from": "31612345678",
                        "id": "wamid.inbound.1",
                        "timestamp": "1767225600",
                        "type": "text",
                        "text": {"body": "Hallo"}
                    }],
                    "statuses": [{"id": "wamid.out.1", "status": "delivered"}]
                }
            }]
        }]
    });
    let webhook = || {
        Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/whatsapp")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    };

    let (status, body) = send(&app.router, webhook()).await;
    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["received"], 1);
    assert_eq!(response["accepted"], 1);
    assert_eq!(response["ignored"], 1);

    let (_, body) = send(&app.router, webhook()).await;
    let response: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["accepted"], 0);
    assert_eq!(response["duplicates"], 1);

    // Unsolicited message: no conversation is created
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app
        .conversations
        .get_conversation("+31612345678")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_webhook_garbage_body_is_acknowledged() {
    let provider = MockServer::start().await;
    let app = test_app(&provider).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/whatsapp")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("ignored"));
}
