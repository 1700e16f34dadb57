use crate::dispatch::DispatchSettings;
use crate::models::LeadCategory;
use crate::orchestrator::ConversationSettings;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Base URL customers reach the interest endpoint on.
    pub public_base_url: String,
    pub response_token_secret: String,
    /// When unset, operator endpoints are open.
    pub operator_token: Option<String>,
    pub email_api_url: String,
    pub email_api_key: String,
    pub email_from: String,
    pub whatsapp_api_url: String,
    pub whatsapp_token: String,
    pub whatsapp_phone_number_id: String,
    /// When unset, the webhook verification handshake is refused.
    pub whatsapp_verify_token: Option<String>,
    pub dispatch_lookback_hours: i64,
    pub dispatch_concurrency: usize,
    pub first_reminder_offset_hours: i64,
    pub second_reminder_offset_hours: i64,
    pub default_area_m2: u32,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            public_base_url: required_url("PUBLIC_BASE_URL")?,
            response_token_secret: required("RESPONSE_TOKEN_SECRET")?,
            operator_token: optional("OPERATOR_TOKEN"),
            email_api_url: optional("EMAIL_API_URL")
                .unwrap_or_else(|| "https://api.resend.com".to_string()),
            email_api_key: required("EMAIL_API_KEY")?,
            email_from: required("EMAIL_FROM")?,
            whatsapp_api_url: optional("WHATSAPP_API_URL")
                .unwrap_or_else(|| "https://graph.facebook.com/v19.0".to_string()),
            whatsapp_token: required("WHATSAPP_TOKEN")?,
            whatsapp_phone_number_id: required("WHATSAPP_PHONE_NUMBER_ID")?,
            whatsapp_verify_token: optional("WHATSAPP_VERIFY_TOKEN"),
            dispatch_lookback_hours: parse_or("DISPATCH_LOOKBACK_HOURS", 24)?,
            dispatch_concurrency: parse_or("DISPATCH_CONCURRENCY", 4)?,
            first_reminder_offset_hours: parse_or("FIRST_REMINDER_OFFSET_HOURS", 48)?,
            second_reminder_offset_hours: parse_or("SECOND_REMINDER_OFFSET_HOURS", 72)?,
            default_area_m2: parse_or("DEFAULT_AREA_M2", 50)?,
            retry_attempts: parse_or("RETRY_ATTEMPTS", 3)?,
            retry_backoff_ms: parse_or("RETRY_BACKOFF_MS", 1000)?,
            http_timeout_secs: parse_or("HTTP_TIMEOUT_SECS", 30)?,
        };
        config.validate()?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Public base URL: {}", config.public_base_url);
        tracing::debug!("Email API URL: {}", config.email_api_url);
        tracing::debug!("WhatsApp API URL: {}", config.whatsapp_api_url);
        tracing::debug!("Server Port: {}", config.port);
        if config.operator_token.is_none() {
            tracing::warn!("⚠️  OPERATOR_TOKEN not set: operator endpoints are unauthenticated");
        }
        if config.whatsapp_verify_token.is_none() {
            tracing::warn!("WHATSAPP_VERIFY_TOKEN not set: webhook verification is disabled");
        }

        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.dispatch_lookback_hours <= 0 {
            anyhow::bail!("DISPATCH_LOOKBACK_HOURS must be positive");
        }
        if self.dispatch_concurrency == 0 {
            anyhow::bail!("DISPATCH_CONCURRENCY must be at least 1");
        }
        if self.first_reminder_offset_hours <= 0 || self.second_reminder_offset_hours <= 0 {
            anyhow::bail!("Reminder offsets must be positive");
        }
        if self.default_area_m2 == 0 {
            anyhow::bail!("DEFAULT_AREA_M2 must be greater than zero");
        }
        if self.retry_attempts == 0 {
            anyhow::bail!("RETRY_ATTEMPTS must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            std::time::Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            lookback: chrono::Duration::hours(self.dispatch_lookback_hours),
            concurrency: self.dispatch_concurrency,
            retry: self.retry_policy(),
            public_base_url: self.public_base_url.clone(),
            token_secret: self.response_token_secret.clone(),
            categories: LeadCategory::ALL.to_vec(),
        }
    }

    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            first_reminder_offset: chrono::Duration::hours(self.first_reminder_offset_hours),
            second_reminder_offset: chrono::Duration::hours(self.second_reminder_offset_hours),
            default_area_m2: self.default_area_m2,
            retry: self.retry_policy(),
        }
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))
        .and_then(|value| {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            Ok(value)
        })
}

fn required_url(name: &str) -> anyhow::Result<String> {
    required(name).and_then(|url| {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("{} must start with http:// or https://", name);
        }
        Ok(url.trim_end_matches('/').to_string())
    })
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        None => Ok(default),
    }
}
