//! PostgreSQL implementation of NotificationLedger.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::dunning::NotificationKind;
use crate::domain::foundation::{DomainError, DunningRecordId};
use crate::ports::{NotificationLedger, NotificationRecord};

/// PostgreSQL implementation of the NotificationLedger port.
pub struct PostgresNotificationLedger {
    pool: PgPool,
}

impl PostgresNotificationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLedger for PostgresNotificationLedger {
    async fn contains(
        &self,
        record_id: &DunningRecordId,
        kind: NotificationKind,
    ) -> Result<bool, DomainError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM notification_records \
             WHERE dunning_record_id = $1 AND kind = $2)",
        )
        .bind(record_id.as_uuid())
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to check notification: {}", e)))?;
        Ok(exists)
    }

    async fn record_sent(&self, entry: &NotificationRecord) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_records (dunning_record_id, kind, sent_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (dunning_record_id, kind) DO NOTHING
            "#,
        )
        .bind(entry.dunning_record_id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(entry.sent_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to record notification: {}", e)))?;
        Ok(result.rows_affected() == 1)
    }
}
