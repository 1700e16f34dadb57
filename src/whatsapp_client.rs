use crate::circuit_breaker::{create_provider_circuit_breaker, ProviderCircuitBreaker};
use crate::email_client::{trips_breaker, DeliveryError};
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait MessagingSender: Send + Sync {
    /// Sends a plain text message to an E.164 phone number, returning the
    /// provider message id.
    async fn send_text(&self, phone_number: &str, body: &str) -> Result<String, DeliveryError>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

/// Client for the WhatsApp Business Cloud API.
#[derive(Clone)]
pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: String,
    phone_number_id: String,
    access_token: String,
    breaker: ProviderCircuitBreaker,
}

impl WhatsAppClient {
    pub fn new(
        base_url: String,
        phone_number_id: String,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                DeliveryError::Transport(format!("Failed to create WhatsApp client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            phone_number_id,
            access_token,
            breaker: create_provider_circuit_breaker(),
        })
    }

    async fn post_message(&self, phone_number: &str, body: &str) -> Result<String, DeliveryError> {
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        // Cloud API wants the number without the leading plus
        let to = phone_number.trim_start_matches('+');

        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("WhatsApp request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::Provider {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let message_id = match response.json::<SendResponse>().await {
            Ok(parsed) => parsed.messages.into_iter().next().map(|m| m.id),
            Err(e) => {
                tracing::warn!("WhatsApp response could not be parsed: {}", e);
                None
            }
        }
        .unwrap_or_else(|| "unknown".to_string());

        tracing::info!("✓ WhatsApp message sent to {}: {}", phone_number, message_id);
        Ok(message_id)
    }
}

#[async_trait]
impl MessagingSender for WhatsAppClient {
    async fn send_text(&self, phone_number: &str, body: &str) -> Result<String, DeliveryError> {
        match self
            .breaker
            .call_with(trips_breaker, self.post_message(phone_number, body))
            .await
        {
            Ok(id) => Ok(id),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                Err(DeliveryError::CircuitOpen("whatsapp".to_string()))
            }
        }
    }
}
