//! Lead-to-Quote API Library
//!
//! This library turns inbound renovation leads into priced quotes and keeps
//! the follow-up conversation going: quote dispatch by email, one-click
//! interest responses, and a WhatsApp conversation state machine with
//! scheduled reminders.
//!
//! # Modules
//!
//! - `app`: Wires stores and provider clients into the services.
//! - `circuit_breaker`: Circuit breakers for outbound providers.
//! - `config`: Configuration management.
//! - `conversation`: Conversation state machine and chat estimates.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres-backed stores.
//! - `dispatch`: Claim and dispatch of quote emails.
//! - `email_client`: Transactional email provider client.
//! - `errors`: Error handling types.
//! - `follow_up`: Reminder scheduler.
//! - `handlers`: HTTP request handlers.
//! - `interest`: Interest-response handling.
//! - `keyed_lock`: Per-key async locks.
//! - `memory_storage`: In-memory stores for tests and local runs.
//! - `models`: Core data models.
//! - `orchestrator`: Conversation orchestration around the state machine.
//! - `phone`: Phone number normalization.
//! - `pricing`: Quote pricing engine.
//! - `quote_template`: Quote email rendering.
//! - `response_token`: Signed interest-response tokens.
//! - `retry`: Retry with exponential backoff.
//! - `routes`: Router construction.
//! - `store`: Storage traits.
//! - `webhook_handler`: WhatsApp webhook handler.
//! - `webhook_models`: Webhook payload models.
//! - `whatsapp_client`: WhatsApp Cloud API client.

pub mod app;
pub mod circuit_breaker;
pub mod config;
pub mod conversation;
pub mod db;
pub mod db_storage;
pub mod dispatch;
pub mod email_client;
pub mod errors;
pub mod follow_up;
pub mod handlers;
pub mod interest;
pub mod keyed_lock;
pub mod memory_storage;
pub mod models;
pub mod orchestrator;
pub mod phone;
pub mod pricing;
pub mod quote_template;
pub mod response_token;
pub mod retry;
pub mod routes;
pub mod store;
pub mod webhook_handler;
pub mod webhook_models;
pub mod whatsapp_client;
