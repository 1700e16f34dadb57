use crate::orchestrator::InboundEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound messaging webhook: WhatsApp Cloud envelope, a single flat event or
/// an array of flat events.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    Cloud(CloudEnvelope),
    Single(FlatMessage),
    Batch(Vec<FlatMessage>),
}

impl WebhookPayload {
    /// Flattens the payload into text messages. Entries without a sender or a
    /// text body (status callbacks, media) are counted as ignored.
    pub fn into_events(self, received_at: DateTime<Utc>) -> (Vec<InboundEvent>, usize) {
        let mut events = Vec::new();
        let mut ignored = 0;

        let flat: Vec<FlatMessage> = match self {
            WebhookPayload::Cloud(envelope) => {
                for change in envelope.entry.into_iter().flat_map(|e| e.changes) {
                    ignored += change.value.statuses.len();
                    for message in change.value.messages {
                        match message.text.map(|t| t.body) {
                            Some(body) => events.push(InboundEvent {
                                message_id: Some(message.id),
                                from: message.from,
                                body,
                                timestamp: message
                                    .timestamp
                                    .as_ref()
                                    .and_then(parse_timestamp)
                                    .unwrap_or(received_at),
                            }),
                            None => {
                                tracing::debug!(
                                    "Ignoring non-text message {} ({:?})",
                                    message.id,
                                    message.kind
                                );
                                ignored += 1;
                            }
                        }
                    }
                }
                Vec::new()
            }
            WebhookPayload::Single(message) => vec![message],
            WebhookPayload::Batch(messages) => messages,
        };

        for message in flat {
            match (message.from, message.body) {
                (Some(from), Some(body)) => events.push(InboundEvent {
                    message_id: message.message_id,
                    from,
                    body,
                    timestamp: message
                        .timestamp
                        .as_ref()
                        .and_then(parse_timestamp)
                        .unwrap_or(received_at),
                }),
                _ => ignored += 1,
            }
        }

        (events, ignored)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudEnvelope {
    #[serde(default)]
    pub object: Option<String>,
    pub entry: Vec<CloudEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudEntry {
    #[serde(default)]
    pub changes: Vec<CloudChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudChange {
    #[serde(default)]
    pub field: Option<String>,
    pub value: CloudValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudValue {
    #[serde(default)]
    pub messages: Vec<CloudMessage>,
    /// Delivery/read receipts; never processed.
    #[serde(default)]
    pub statuses: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudMessage {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<CloudText>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudText {
    pub body: String,
}

/// Provider-neutral `{from, body, messageId, timestamp}` event.
#[derive(Debug, Clone, Deserialize)]
pub struct FlatMessage {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default, alias = "text", alias = "message")]
    pub body: Option<String>,
    #[serde(default, rename = "messageId", alias = "message_id", alias = "id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// Response sent back to the messaging provider
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: String,
    pub received: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub ignored: usize,
}

/// Query parameters of the provider's subscription handshake.
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Unix seconds (number or numeric string) or an RFC3339 / naive datetime.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<i64>() {
                return DateTime::from_timestamp(secs, 0);
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
                })
                .ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_cloud_envelope() {
        let json = r#"
        {
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "1234",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "messages": [
                            {"from": "31612345678", "id": "wamid.A", "timestamp": "1700000000", "type": "text", "text": {"body": "1"}},
                            {"from": "31612345678", "id": "wamid.B", "timestamp": "1700000001", "type": "image", "image": {"id": "x"}}
                        ],
                        "statuses": [{"id": "wamid.OUT", "status": "delivered"}]
                    }
                }]
            }]
        }
        "#;

        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        assert!(matches!(payload, WebhookPayload::Cloud(_)));
        let (events, ignored) = payload.into_events(Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(ignored, 2);
        assert_eq!(events[0].message_id.as_deref(), Some("wamid.A"));
        assert_eq!(events[0].body, "1");
        assert_eq!(events[0].timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn test_parse_flat_single_and_batch() {
        let single = r#"{"from": "+31612345678", "body": "ja", "messageId": "m1", "timestamp": "2025-01-01T10:00:00Z"}"#;
        let payload: WebhookPayload = serde_json::from_str(single).unwrap();
        let (events, ignored) = payload.into_events(Utc::now());
        assert_eq!(ignored, 0);
        assert_eq!(events[0].message_id.as_deref(), Some("m1"));
        assert_eq!(
            events[0].timestamp,
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
        );

        let batch = r#"[{"from": "+31612345678", "body": "1"}, {"body": "no sender"}]"#;
        let received_at = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let payload: WebhookPayload = serde_json::from_str(batch).unwrap();
        let (events, ignored) = payload.into_events(received_at);
        assert_eq!(events.len(), 1);
        assert_eq!(ignored, 1);
        assert_eq!(events[0].message_id, None);
        assert_eq!(events[0].timestamp, received_at);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(parse_timestamp(&Value::from(1_700_000_000i64)), Some(expected));
        assert_eq!(parse_timestamp(&Value::from("1700000000")), Some(expected));
        assert_eq!(
            parse_timestamp(&Value::from("2023-11-14T22:13:20+00:00")),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&Value::from("yesterday")), None);
    }
}
