//! PostgreSQL implementation of PaymentEventLedger.
//!
//! The provider event id is the primary key, so `INSERT ... ON CONFLICT DO
//! NOTHING` is the atomic dedupe gate for concurrent deliveries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ProviderEventId, Timestamp};
use crate::domain::webhook::InboundEvent;
use crate::ports::{PaymentEvent, PaymentEventLedger, PaymentEventStatus, SaveResult};

/// PostgreSQL implementation of the PaymentEventLedger port.
pub struct PostgresPaymentEventLedger {
    pool: PgPool,
}

impl PostgresPaymentEventLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentEventRow {
    provider_event_id: String,
    event_type: String,
    received_at: DateTime<Utc>,
    status: String,
    event: Json<InboundEvent>,
    error_message: Option<String>,
    dispatch_attempts: i32,
}

impl TryFrom<PaymentEventRow> for PaymentEvent {
    type Error = DomainError;

    fn try_from(row: PaymentEventRow) -> Result<Self, Self::Error> {
        let status = PaymentEventStatus::parse(&row.status).ok_or_else(|| {
            DomainError::database(format!("Invalid payment event status: {}", row.status))
        })?;
        Ok(PaymentEvent {
            provider_event_id: ProviderEventId::new(row.provider_event_id)
                .map_err(|e| DomainError::database(format!("Invalid event id: {}", e)))?,
            event_type: row.event_type,
            received_at: Timestamp::from_datetime(row.received_at),
            status,
            event: row.event.0,
            error_message: row.error_message,
            dispatch_attempts: row.dispatch_attempts.max(0) as u32,
        })
    }
}

impl PostgresPaymentEventLedger {
    async fn settle(
        &self,
        event_id: &ProviderEventId,
        status: PaymentEventStatus,
        message: Option<&str>,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE payment_events SET
                status = $2,
                error_message = COALESCE($3, error_message),
                dispatch_attempts = dispatch_attempts + 1
            WHERE provider_event_id = $1
            "#,
        )
        .bind(event_id.as_str())
        .bind(status.as_str())
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to update payment event: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl PaymentEventLedger for PostgresPaymentEventLedger {
    async fn find_by_event_id(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<PaymentEvent>, DomainError> {
        let row: Option<PaymentEventRow> = sqlx::query_as(
            r#"
            SELECT provider_event_id, event_type, received_at, status, event,
                   error_message, dispatch_attempts
            FROM payment_events WHERE provider_event_id = $1
            "#,
        )
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find payment event: {}", e)))?;

        row.map(PaymentEvent::try_from).transpose()
    }

    async fn record(&self, event: &PaymentEvent) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_events (
                provider_event_id, event_type, received_at, status, event,
                error_message, dispatch_attempts
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (provider_event_id) DO NOTHING
            "#,
        )
        .bind(event.provider_event_id.as_str())
        .bind(&event.event_type)
        .bind(event.received_at.as_datetime())
        .bind(event.status.as_str())
        .bind(Json(&event.event))
        .bind(&event.error_message)
        .bind(event.dispatch_attempts as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to record payment event: {}", e)))?;

        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn mark_processed(&self, event_id: &ProviderEventId) -> Result<(), DomainError> {
        self.settle(event_id, PaymentEventStatus::Processed, None)
            .await
    }

    async fn mark_failed(
        &self,
        event_id: &ProviderEventId,
        error: &str,
    ) -> Result<(), DomainError> {
        self.settle(event_id, PaymentEventStatus::Failed, Some(error))
            .await
    }

    async fn mark_ignored(
        &self,
        event_id: &ProviderEventId,
        reason: &str,
    ) -> Result<(), DomainError> {
        self.settle(event_id, PaymentEventStatus::Ignored, Some(reason))
            .await
    }

    async fn find_unprocessed(
        &self,
        received_before: Timestamp,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<PaymentEvent>, DomainError> {
        let rows: Vec<PaymentEventRow> = sqlx::query_as(
            r#"
            SELECT provider_event_id, event_type, received_at, status, event,
                   error_message, dispatch_attempts
            FROM payment_events
            WHERE status IN ('pending', 'failed')
              AND received_at < $1
              AND dispatch_attempts < $2
            ORDER BY received_at ASC
            LIMIT $3
            "#,
        )
        .bind(received_before.as_datetime())
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            DomainError::database(format!("Failed to find unprocessed payment events: {}", e))
        })?;

        rows.into_iter().map(PaymentEvent::try_from).collect()
    }
}
