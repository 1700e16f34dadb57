use crate::circuit_breaker::{create_provider_circuit_breaker, ProviderCircuitBreaker};
use crate::retry::Retryable;
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to an outbound provider (email or messaging).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("{0} circuit breaker open")]
    CircuitOpen(String),
}

impl Retryable for DeliveryError {
    /// Transport failures, 5xx and 429 are transient; other 4xx responses and
    /// an open breaker are not worth another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::Provider { status, .. } => *status >= 500 || *status == 429,
            DeliveryError::CircuitOpen(_) => false,
        }
    }
}

/// Only transient failures count toward opening a provider's breaker.
pub fn trips_breaker(error: &DeliveryError) -> bool {
    error.is_retryable()
}

/// A rendered message ready for the transactional email provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Sends one email, returning the provider message id.
    async fn send(&self, email: &OutboundEmail) -> Result<String, DeliveryError>;
}

/// Client for a Resend-compatible transactional email API.
#[derive(Clone)]
pub struct EmailClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
    breaker: ProviderCircuitBreaker,
}

impl EmailClient {
    /// Creates a new `EmailClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the email API.
    /// * `api_key` - Bearer token for the API.
    /// * `from` - Sender address used for every message.
    /// * `timeout` - Per-request timeout.
    pub fn new(
        base_url: String,
        api_key: String,
        from: String,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(format!("Failed to create email client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            from,
            breaker: create_provider_circuit_breaker(),
        })
    }

    async fn post_email(&self, email: &OutboundEmail) -> Result<String, DeliveryError> {
        let url = format!("{}/emails", self.base_url);
        tracing::info!("Sending email to {} via {}", email.to, url);

        let body = json!({
            "from": self.from,
            "to": [format!("{} <{}>", email.to_name, email.to)],
            "subject": email.subject,
            "text": email.text,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("Email request failed: {}", e)))?;

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

        // The provider accepted the message; a malformed body must not turn
        // into a resend.
        let data: serde_json::Value = response.json().await.unwrap_or_default();
        let message_id = match data.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!("Email accepted but response had no id: {:?}", data);
                "unknown".to_string()
            }
        };

        tracing::info!("✓ Email accepted for {}: {}", email.to, message_id);
        Ok(message_id)
    }
}

#[async_trait]
impl EmailSender for EmailClient {
    async fn send(&self, email: &OutboundEmail) -> Result<String, DeliveryError> {
        match self
            .breaker
            .call_with(trips_breaker, self.post_email(email))
            .await
        {
            Ok(id) => Ok(id),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(DeliveryError::CircuitOpen("email".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = EmailClient::new(
            "https://example.com/".to_string(),
            "key".to_string(),
            "Offertes <offerte@example.nl>".to_string(),
            Duration::from_secs(5),
        );
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url, "https://example.com");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DeliveryError::Transport("timeout".into()).is_retryable());
        assert!(DeliveryError::Provider { status: 503, body: String::new() }.is_retryable());
        assert!(DeliveryError::Provider { status: 429, body: String::new() }.is_retryable());
        assert!(!DeliveryError::Provider { status: 422, body: String::new() }.is_retryable());
        assert!(!DeliveryError::CircuitOpen("email".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_rejections_do_not_open_breaker() {
        let breaker = create_provider_circuit_breaker();
        let rejected = || async {
            Err::<String, _>(DeliveryError::Provider {
                status: 422,
                body: "invalid recipient".to_string(),
            })
        };

        for _ in 0..10 {
            let result = breaker.call_with(trips_breaker, rejected()).await;
            assert!(matches!(result, Err(failsafe::Error::Inner(_))));
        }

        let result = breaker
            .call_with(trips_breaker, async { Ok::<_, DeliveryError>("id".to_string()) })
            .await;
        assert_eq!(result.unwrap(), "id");
    }
}
