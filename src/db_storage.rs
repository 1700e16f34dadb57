//! Postgres implementations of the storage seams.
//!
//! Table names come from `LeadCategory::table_name`, a closed set, so the
//! `format!` interpolation below never carries user input.

use crate::models::{
    ConversationState, ConversationStep, FollowUp, FollowUpStatus, InboundStatus,
    InterestResponse, Lead, LeadCategory, LeadStatus, Money,
};
use crate::store::{ConversationStore, LeadStore, StoreError};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

const LEAD_COLUMNS: &str = "id, name, email, phone, street, house_number, postal_code, city, \
     configuration, status, quote_sent_at, interest_response, interest_response_at, \
     computed_price, notes, needs_reconciliation, created_at, updated_at";

fn parse_column<T: FromStr<Err = String>>(column: &str, raw: &str) -> Result<T, StoreError> {
    raw.parse::<T>()
        .map_err(|e| StoreError::Decode(format!("{}: {}", column, e)))
}

fn lead_from_row(category: LeadCategory, row: &PgRow) -> Result<Lead, StoreError> {
    let status: String = row.try_get("status")?;
    let interest_response: Option<String> = row.try_get("interest_response")?;
    let computed_price: Option<BigDecimal> = row.try_get("computed_price")?;

    let computed_price = match computed_price {
        Some(value) => Some(Money::from_bigdecimal(&value).ok_or_else(|| {
            StoreError::Decode(format!("computed_price out of range: {}", value))
        })?),
        None => None,
    };

    Ok(Lead {
        id: row.try_get("id")?,
        category,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        street: row.try_get("street")?,
        house_number: row.try_get("house_number")?,
        postal_code: row.try_get("postal_code")?,
        city: row.try_get("city")?,
        configuration: row.try_get("configuration")?,
        status: parse_column::<LeadStatus>("status", &status)?,
        quote_sent_at: row.try_get("quote_sent_at")?,
        interest_response: interest_response
            .as_deref()
            .map(|raw| parse_column::<InterestResponse>("interest_response", raw))
            .transpose()?,
        interest_response_at: row.try_get("interest_response_at")?,
        computed_price,
        notes: row.try_get("notes")?,
        needs_reconciliation: row.try_get("needs_reconciliation")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Lead tables backed by Postgres.
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a lead as the lead-creation path does. Used by tooling and tests.
    pub async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, name, email, phone, street, house_number, postal_code, city,
                            configuration, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
            lead.category.table_name()
        );

        sqlx::query(&sql)
            .bind(lead.id)
            .bind(&lead.name)
            .bind(&lead.email)
            .bind(&lead.phone)
            .bind(&lead.street)
            .bind(&lead.house_number)
            .bind(&lead.postal_code)
            .bind(&lead.city)
            .bind(&lead.configuration)
            .bind(lead.status.as_str())
            .bind(lead.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl LeadStore for PgLeadStore {
    async fn find_lead(
        &self,
        category: LeadCategory,
        id: Uuid,
    ) -> Result<Option<Lead>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            LEAD_COLUMNS,
            category.table_name()
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| lead_from_row(category, &row)).transpose()
    }

    async fn find_dispatch_candidates(
        &self,
        category: LeadCategory,
        since: DateTime<Utc>,
    ) -> Result<Vec<Lead>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM {}
            WHERE status = 'new' AND quote_sent_at IS NULL AND created_at >= $1
            ORDER BY created_at ASC
            "#,
            LEAD_COLUMNS,
            category.table_name()
        );

        let rows = sqlx::query(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| lead_from_row(category, row)).collect()
    }

    async fn claim_for_dispatch(
        &self,
        category: LeadCategory,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = 'sending', updated_at = $2
            WHERE id = $1 AND status = 'new' AND quote_sent_at IS NULL
            "#,
            category.table_name()
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = 'new',
                notes = CASE WHEN notes IS NULL OR notes = '' THEN $2 ELSE notes || E'\n' || $2 END,
                updated_at = $3
            WHERE id = $1 AND status = 'sending' AND quote_sent_at IS NULL
            "#,
            category.table_name()
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(note)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_quote_sent(
        &self,
        category: LeadCategory,
        id: Uuid,
        price: Option<Money>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = 'quote_sent',
                quote_sent_at = $2,
                computed_price = COALESCE($3, computed_price),
                needs_reconciliation = false,
                updated_at = $2
            WHERE id = $1 AND status = 'sending' AND quote_sent_at IS NULL
            "#,
            category.table_name()
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(sent_at)
            .bind(price.map(|p| p.to_bigdecimal()))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn flag_for_reconciliation(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET needs_reconciliation = true,
                notes = CASE WHEN notes IS NULL OR notes = '' THEN $2 ELSE notes || E'\n' || $2 END,
                updated_at = $3
            WHERE id = $1
            "#,
            category.table_name()
        );

        sqlx::query(&sql)
            .bind(id)
            .bind(note)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_interest_response(
        &self,
        category: LeadCategory,
        id: Uuid,
        response: InterestResponse,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = $2,
                interest_response = $3,
                interest_response_at = $4,
                updated_at = $4
            WHERE id = $1
              AND interest_response_at IS NULL
              AND status = 'quote_sent'
            "#,
            category.table_name()
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(response.resulting_status().as_str())
            .bind(response.as_str())
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_reconciliation(&self) -> Result<Vec<Lead>, StoreError> {
        let mut flagged = Vec::new();
        for category in LeadCategory::ALL {
            let sql = format!(
                "SELECT {} FROM {} WHERE needs_reconciliation ORDER BY updated_at ASC",
                LEAD_COLUMNS,
                category.table_name()
            );
            let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
            for row in &rows {
                flagged.push(lead_from_row(category, row)?);
            }
        }
        Ok(flagged)
    }

    async fn reset_dispatch(
        &self,
        category: LeadCategory,
        id: Uuid,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = 'new',
                quote_sent_at = NULL,
                needs_reconciliation = false,
                notes = CASE WHEN notes IS NULL OR notes = '' THEN $2 ELSE notes || E'\n' || $2 END,
                updated_at = $3
            WHERE id = $1 AND status IN ('sending', 'quote_sent')
            "#,
            category.table_name()
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(note)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn close_lead(
        &self,
        category: LeadCategory,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = 'closed', updated_at = $2
            WHERE id = $1 AND status IN ('interested', 'not_interested')
            "#,
            category.table_name()
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn conversation_from_row(row: &PgRow) -> Result<ConversationState, StoreError> {
    let step: String = row.try_get("current_step")?;
    Ok(ConversationState {
        lead_id: row.try_get("lead_id")?,
        phone_number: row.try_get("phone_number")?,
        customer_name: row.try_get("customer_name")?,
        current_step: parse_column::<ConversationStep>("current_step", &step)?,
        last_message: row.try_get("last_message")?,
        last_interaction_at: row.try_get("last_interaction_at")?,
    })
}

fn follow_up_from_row(row: &PgRow) -> Result<FollowUp, StoreError> {
    let step: String = row.try_get("step")?;
    let reminder_type: String = row.try_get("reminder_type")?;
    let status: String = row.try_get("status")?;
    Ok(FollowUp {
        id: row.try_get("id")?,
        lead_id: row.try_get("lead_id")?,
        phone_number: row.try_get("phone_number")?,
        customer_name: row.try_get("customer_name")?,
        step: parse_column("step", &step)?,
        scheduled_for: row.try_get("scheduled_for")?,
        reminder_type: parse_column("reminder_type", &reminder_type)?,
        status: parse_column("status", &status)?,
        created_at: row.try_get("created_at")?,
    })
}

const FOLLOW_UP_COLUMNS: &str =
    "id, lead_id, phone_number, customer_name, step, scheduled_for, reminder_type, status, created_at";

/// Conversation state, follow-ups and the inbound dedupe ledger.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationStore for PgConversationStore {
    async fn get_conversation(
        &self,
        phone: &str,
    ) -> Result<Option<ConversationState>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT lead_id, phone_number, customer_name, current_step, last_message, last_interaction_at
            FROM conversation_states
            WHERE phone_number = $1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| conversation_from_row(&row)).transpose()
    }

    async fn save_conversation(&self, state: &ConversationState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_states
                (phone_number, lead_id, customer_name, current_step, last_message, last_interaction_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (phone_number) DO UPDATE
            SET lead_id = EXCLUDED.lead_id,
                customer_name = EXCLUDED.customer_name,
                current_step = EXCLUDED.current_step,
                last_message = EXCLUDED.last_message,
                last_interaction_at = EXCLUDED.last_interaction_at
            "#,
        )
        .bind(&state.phone_number)
        .bind(state.lead_id)
        .bind(&state.customer_name)
        .bind(state.current_step.as_str())
        .bind(&state.last_message)
        .bind(state.last_interaction_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn advance_conversation(
        &self,
        state: &ConversationState,
        expected_step: ConversationStep,
        expected_interaction_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_states
            SET current_step = $2,
                last_message = $3,
                last_interaction_at = $4
            WHERE phone_number = $1
              AND current_step = $5
              AND last_interaction_at = $6
            "#,
        )
        .bind(&state.phone_number)
        .bind(state.current_step.as_str())
        .bind(&state.last_message)
        .bind(state.last_interaction_at)
        .bind(expected_step.as_str())
        .bind(expected_interaction_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_inbound_message(
        &self,
        dedupe_key: &str,
        phone: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbound_messages (dedupe_key, phone_number, status, received_at)
            VALUES ($1, $2, 'received', $3)
            ON CONFLICT (dedupe_key) DO NOTHING
            "#,
        )
        .bind(dedupe_key)
        .bind(phone)
        .bind(received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_inbound_message(
        &self,
        dedupe_key: &str,
        status: InboundStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inbound_messages
            SET status = $2, error_message = $3, processed_at = now()
            WHERE dedupe_key = $1 AND status = 'received'
            "#,
        )
        .bind(dedupe_key)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                "No received inbound message to complete: dedupe_key={}",
                dedupe_key
            );
        }

        Ok(())
    }

    async fn schedule_follow_up(&self, follow_up: &FollowUp) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO follow_ups
                (id, lead_id, phone_number, customer_name, step, scheduled_for, reminder_type, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(follow_up.id)
        .bind(follow_up.lead_id)
        .bind(&follow_up.phone_number)
        .bind(&follow_up.customer_name)
        .bind(follow_up.step.as_str())
        .bind(follow_up.scheduled_for)
        .bind(follow_up.reminder_type.as_str())
        .bind(follow_up.status.as_str())
        .bind(follow_up.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_follow_ups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUp>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM follow_ups
            WHERE status = 'scheduled' AND scheduled_for <= $1
            ORDER BY scheduled_for ASC
            LIMIT $2
            "#,
            FOLLOW_UP_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(follow_up_from_row).collect()
    }

    async fn transition_follow_up(
        &self,
        id: Uuid,
        from: FollowUpStatus,
        to: FollowUpStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE follow_ups
            SET status = $3, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_follow_ups(&self, phone: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE follow_ups
            SET status = 'cancelled', updated_at = now()
            WHERE phone_number = $1 AND status = 'scheduled'
            "#,
        )
        .bind(phone)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_follow_ups(&self, phone: &str) -> Result<Vec<FollowUp>, StoreError> {
        let sql = format!(
            "SELECT {} FROM follow_ups WHERE phone_number = $1 ORDER BY scheduled_for ASC",
            FOLLOW_UP_COLUMNS
        );

        let rows = sqlx::query(&sql).bind(phone).fetch_all(&self.pool).await?;

        rows.iter().map(follow_up_from_row).collect()
    }
}
