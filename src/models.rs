use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::{Add, Mul};
use std::str::FromStr;
use uuid::Uuid;

/// Product category of a lead. Each category lives in its own table with an
/// identical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadCategory {
    Dakkapel,
    Kozijnen,
    Renovatie,
}

impl LeadCategory {
    pub const ALL: [LeadCategory; 3] = [
        LeadCategory::Dakkapel,
        LeadCategory::Kozijnen,
        LeadCategory::Renovatie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadCategory::Dakkapel => "dakkapel",
            LeadCategory::Kozijnen => "kozijnen",
            LeadCategory::Renovatie => "renovatie",
        }
    }

    /// Backing table. Only ever interpolated from this closed set.
    pub fn table_name(&self) -> &'static str {
        match self {
            LeadCategory::Dakkapel => "dakkapel_leads",
            LeadCategory::Kozijnen => "kozijnen_leads",
            LeadCategory::Renovatie => "renovatie_leads",
        }
    }

    /// Human-readable product name used in customer-facing copy.
    pub fn display_name(&self) -> &'static str {
        match self {
            LeadCategory::Dakkapel => "dakkapel",
            LeadCategory::Kozijnen => "kozijnen",
            LeadCategory::Renovatie => "renovatie",
        }
    }
}

impl fmt::Display for LeadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dakkapel" => Ok(LeadCategory::Dakkapel),
            "kozijnen" => Ok(LeadCategory::Kozijnen),
            "renovatie" => Ok(LeadCategory::Renovatie),
            other => Err(format!("unknown lead category '{}'", other)),
        }
    }
}

/// Lead lifecycle: `new → sending → quote_sent → (interested | not_interested) → closed`.
///
/// `sending` is the claim marker held while a quote is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Sending,
    QuoteSent,
    Interested,
    NotInterested,
    Closed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Sending => "sending",
            LeadStatus::QuoteSent => "quote_sent",
            LeadStatus::Interested => "interested",
            LeadStatus::NotInterested => "not_interested",
            LeadStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LeadStatus::New),
            "sending" => Ok(LeadStatus::Sending),
            "quote_sent" => Ok(LeadStatus::QuoteSent),
            "interested" => Ok(LeadStatus::Interested),
            "not_interested" => Ok(LeadStatus::NotInterested),
            "closed" => Ok(LeadStatus::Closed),
            other => Err(format!("unknown lead status '{}'", other)),
        }
    }
}

/// The customer's answer to a quote, captured from a one-click link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestResponse {
    Yes,
    No,
}

impl InterestResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterestResponse::Yes => "yes",
            InterestResponse::No => "no",
        }
    }

    /// Status the lead moves to when this is the first recorded response.
    pub fn resulting_status(&self) -> LeadStatus {
        match self {
            InterestResponse::Yes => LeadStatus::Interested,
            InterestResponse::No => LeadStatus::NotInterested,
        }
    }
}

impl FromStr for InterestResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "ja" => Ok(InterestResponse::Yes),
            "no" | "nee" => Ok(InterestResponse::No),
            other => Err(format!("unknown response '{}'", other)),
        }
    }
}

/// Money in euro cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn euros(euros: i64) -> Self {
        Money(euros * 100)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    /// NUMERIC(12,2) representation for storage.
    pub fn to_bigdecimal(&self) -> BigDecimal {
        BigDecimal::new(self.0.into(), 2)
    }

    pub fn from_bigdecimal(value: &BigDecimal) -> Option<Self> {
        (value * BigDecimal::from(100)).round(0).to_i64().map(Money)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl Mul<u32> for Money {
    type Output = Money;

    fn mul(self, rhs: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(rhs)))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    /// Dutch notation: `€ 10.675,00`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let euros = (abs / 100).to_string();
        let cents = abs % 100;

        let mut grouped = String::with_capacity(euros.len() + euros.len() / 3);
        for (i, ch) in euros.chars().enumerate() {
            if i > 0 && (euros.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }

        write!(f, "{}€ {},{:02}", sign, grouped, cents)
    }
}

/// One submitted configuration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub category: LeadCategory,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    /// Category-specific attributes, immutable once created.
    pub configuration: Value,
    pub status: LeadStatus,
    pub quote_sent_at: Option<DateTime<Utc>>,
    pub interest_response: Option<InterestResponse>,
    pub interest_response_at: Option<DateTime<Utc>>,
    pub computed_price: Option<Money>,
    pub notes: Option<String>,
    pub needs_reconciliation: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// A fresh lead in status `new`, as the lead-creation path would insert it.
    pub fn new(
        category: LeadCategory,
        name: impl Into<String>,
        email: impl Into<String>,
        configuration: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            name: name.into(),
            email: email.into(),
            phone: None,
            street: None,
            house_number: None,
            postal_code: None,
            city: None,
            configuration,
            status: LeadStatus::New,
            quote_sent_at: None,
            interest_response: None,
            interest_response_at: None,
            computed_price: None,
            notes: None,
            needs_reconciliation: false,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

/// Position of a phone-number-scoped nurture dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    Initial,
    ServiceChoice,
    StucwerkDetails,
    SchilderwerkDetails,
    AppointmentBooking,
    Completed,
}

impl ConversationStep {
    pub const ALL: [ConversationStep; 6] = [
        ConversationStep::Initial,
        ConversationStep::ServiceChoice,
        ConversationStep::StucwerkDetails,
        ConversationStep::SchilderwerkDetails,
        ConversationStep::AppointmentBooking,
        ConversationStep::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStep::Initial => "initial",
            ConversationStep::ServiceChoice => "service_choice",
            ConversationStep::StucwerkDetails => "stucwerk_details",
            ConversationStep::SchilderwerkDetails => "schilderwerk_details",
            ConversationStep::AppointmentBooking => "appointment_booking",
            ConversationStep::Completed => "completed",
        }
    }
}

impl fmt::Display for ConversationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConversationStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown conversation step '{}'", s))
    }
}

/// One row per phone number; never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub lead_id: Uuid,
    pub phone_number: String,
    pub customer_name: String,
    pub current_step: ConversationStep,
    pub last_message: Option<String>,
    pub last_interaction_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    FirstReminder,
    SecondReminder,
}

impl ReminderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderType::FirstReminder => "first_reminder",
            ReminderType::SecondReminder => "second_reminder",
        }
    }

    /// The reminder scheduled after this one has been delivered, if any.
    pub fn next(&self) -> Option<ReminderType> {
        match self {
            ReminderType::FirstReminder => Some(ReminderType::SecondReminder),
            ReminderType::SecondReminder => None,
        }
    }
}

impl FromStr for ReminderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_reminder" => Ok(ReminderType::FirstReminder),
            "second_reminder" => Ok(ReminderType::SecondReminder),
            other => Err(format!("unknown reminder type '{}'", other)),
        }
    }
}

/// `sending` is the claim marker held by the scheduler run delivering a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStatus {
    Scheduled,
    Sending,
    Sent,
    Cancelled,
}

impl FollowUpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUpStatus::Scheduled => "scheduled",
            FollowUpStatus::Sending => "sending",
            FollowUpStatus::Sent => "sent",
            FollowUpStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for FollowUpStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(FollowUpStatus::Scheduled),
            "sending" => Ok(FollowUpStatus::Sending),
            "sent" => Ok(FollowUpStatus::Sent),
            "cancelled" => Ok(FollowUpStatus::Cancelled),
            other => Err(format!("unknown follow-up status '{}'", other)),
        }
    }
}

/// A durably scheduled reminder, guarding the step the conversation was in
/// when it was scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub phone_number: String,
    pub customer_name: String,
    pub step: ConversationStep,
    pub scheduled_for: DateTime<Utc>,
    pub reminder_type: ReminderType,
    pub status: FollowUpStatus,
    pub created_at: DateTime<Utc>,
}

/// Processing state of an inbound message in the dedupe ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundStatus {
    Received,
    Processed,
    Failed,
    Dropped,
}

impl InboundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundStatus::Received => "received",
            InboundStatus::Processed => "processed",
            InboundStatus::Failed => "failed",
            InboundStatus::Dropped => "dropped",
        }
    }
}

/// Flags accepted by the batch entry points.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RunOptions {
    /// Report what would happen without claiming, sending or mutating.
    #[serde(default)]
    pub dry_run: bool,
}

/// Per-item failure surfaced in batch reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub lead_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<LeadCategory>,
    pub reason: String,
}

/// Result of one dispatch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub dry_run: bool,
    pub sent: usize,
    pub failed: usize,
    pub skipped_already_claimed: usize,
    /// Dry-run only: candidates that would have been sent.
    pub previewed: usize,
    /// Quotes that went out but whose terminal update could not be persisted.
    pub reconciliation_required: usize,
    pub errors: Vec<ItemError>,
}

/// Result of one follow-up scheduler run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpReport {
    pub dry_run: bool,
    pub sent: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub skipped_already_claimed: usize,
    pub previewed: usize,
    pub errors: Vec<ItemError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display_uses_dutch_grouping() {
        assert_eq!(Money::euros(10_675).to_string(), "€ 10.675,00");
        assert_eq!(Money::from_cents(99).to_string(), "€ 0,99");
        assert_eq!(Money::euros(1_250_000).to_string(), "€ 1.250.000,00");
        assert_eq!(Money::euros(325).to_string(), "€ 325,00");
    }

    #[test]
    fn test_money_bigdecimal_conversion() {
        let money = Money::from_cents(1_067_550);
        let decimal = money.to_bigdecimal();
        assert_eq!(decimal.to_string(), "10675.50");
        assert_eq!(Money::from_bigdecimal(&decimal), Some(money));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            LeadStatus::New,
            LeadStatus::Sending,
            LeadStatus::QuoteSent,
            LeadStatus::Interested,
            LeadStatus::NotInterested,
            LeadStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<LeadStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("Dakkapel".parse::<LeadCategory>(), Ok(LeadCategory::Dakkapel));
        assert!("veranda".parse::<LeadCategory>().is_err());
    }

    #[test]
    fn test_interest_response_accepts_dutch() {
        assert_eq!("ja".parse::<InterestResponse>(), Ok(InterestResponse::Yes));
        assert_eq!("NO".parse::<InterestResponse>(), Ok(InterestResponse::No));
        assert!("maybe".parse::<InterestResponse>().is_err());
    }
}
