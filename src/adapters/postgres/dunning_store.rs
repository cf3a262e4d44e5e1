//! PostgreSQL implementation of DunningStore.
//!
//! Version checks are `UPDATE ... WHERE id = $1 AND version = $2`; zero rows
//! affected means a conflict (or a missing record, told apart by a second
//! read). Record writes that carry a subscription change run in one
//! transaction with the subscription row locked `FOR UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::billing::{Subscription, SubscriptionChange, SubscriptionStatus};
use crate::domain::dunning::{DunningRecord, DunningStatus};
use crate::domain::foundation::{
    CustomerId, DomainError, DunningRecordId, ErrorCode, InvoiceId, SubscriptionId, Timestamp,
    UserId,
};
use crate::ports::{CreateResult, DunningStore};

const RECORD_COLUMNS: &str = "id, user_id, subscription_id, invoice_id, status, attempt_count, \
     next_retry_at, last_error, cancellation_pending, version, created_at, updated_at";

const ACTIVE_STATUSES: &str = "('started', 'retry_scheduled', 'retrying')";

/// PostgreSQL implementation of the DunningStore port.
pub struct PostgresDunningStore {
    pool: PgPool,
}

impl PostgresDunningStore {
    /// Creates a new PostgresDunningStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a dunning record.
#[derive(Debug, sqlx::FromRow)]
struct DunningRecordRow {
    id: Uuid,
    user_id: String,
    subscription_id: String,
    invoice_id: String,
    status: String,
    attempt_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    cancellation_pending: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DunningRecordRow> for DunningRecord {
    type Error = DomainError;

    fn try_from(row: DunningRecordRow) -> Result<Self, Self::Error> {
        let status = DunningStatus::parse(&row.status).ok_or_else(|| {
            DomainError::database(format!("Invalid dunning status value: {}", row.status))
        })?;

        Ok(DunningRecord {
            id: DunningRecordId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(invalid_column)?,
            subscription_id: SubscriptionId::new(row.subscription_id).map_err(invalid_column)?,
            invoice_id: InvoiceId::new(row.invoice_id).map_err(invalid_column)?,
            status,
            attempt_count: u32::try_from(row.attempt_count).map_err(|_| {
                DomainError::database(format!("Negative attempt_count: {}", row.attempt_count))
            })?,
            next_retry_at: row.next_retry_at.map(Timestamp::from_datetime),
            last_error: row.last_error,
            cancellation_pending: row.cancellation_pending,
            version: u64::try_from(row.version)
                .map_err(|_| DomainError::database(format!("Negative version: {}", row.version)))?,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    customer_id: String,
    customer_email: Option<String>,
    user_id: String,
    status: String,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = SubscriptionStatus::parse(&row.status).ok_or_else(|| {
            DomainError::database(format!("Invalid subscription status value: {}", row.status))
        })?;

        Ok(Subscription {
            id: SubscriptionId::new(row.id).map_err(invalid_column)?,
            customer_id: CustomerId::new(row.customer_id).map_err(invalid_column)?,
            customer_email: row.customer_email,
            user_id: UserId::new(row.user_id).map_err(invalid_column)?,
            status,
            current_period_end: row.current_period_end.map(Timestamp::from_datetime),
            cancel_at_period_end: row.cancel_at_period_end,
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

fn invalid_column(e: crate::domain::foundation::ValidationError) -> DomainError {
    DomainError::database(format!("Invalid stored value: {}", e))
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> DomainError + '_ {
    move |e| DomainError::database(format!("{}: {}", context, e))
}

fn version_param(version: u64) -> Result<i64, DomainError> {
    i64::try_from(version)
        .map_err(|_| DomainError::validation("version", "version exceeds storage range"))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

/// Applies a subscription change inside `tx`, resolving it against the
/// other active records as seen by the transaction.
async fn apply_change_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: &SubscriptionId,
    change: SubscriptionChange,
    except: Option<&DunningRecordId>,
) -> Result<Option<SubscriptionStatus>, DomainError> {
    let current: Option<(String,)> =
        sqlx::query_as("SELECT status FROM subscriptions WHERE id = $1 FOR UPDATE")
            .bind(subscription_id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error("Failed to lock subscription"))?;

    let Some((current,)) = current else {
        return Ok(None);
    };
    let current = SubscriptionStatus::parse(&current).ok_or_else(|| {
        DomainError::database(format!("Invalid subscription status value: {}", current))
    })?;

    let except_id = except.map(|id| *id.as_uuid());
    let (others,): (bool,) = sqlx::query_as(&format!(
        "SELECT EXISTS (SELECT 1 FROM dunning_records \
         WHERE subscription_id = $1 AND status IN {} \
         AND ($2::uuid IS NULL OR id <> $2))",
        ACTIVE_STATUSES
    ))
    .bind(subscription_id.as_str())
    .bind(except_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_error("Failed to count active dunning records"))?;

    let target = change.resolve(current, others);
    if target != current {
        sqlx::query("UPDATE subscriptions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(subscription_id.as_str())
            .bind(target.as_str())
            .execute(&mut **tx)
            .await
            .map_err(db_error("Failed to update subscription status"))?;
    }
    Ok(Some(target))
}

/// Version-checked record update inside `tx`.
async fn update_record_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    record: &DunningRecord,
    expected_version: u64,
) -> Result<(), DomainError> {
    let result = sqlx::query(
        r#"
        UPDATE dunning_records SET
            status = $3,
            attempt_count = $4,
            next_retry_at = $5,
            last_error = $6,
            cancellation_pending = $7,
            version = $8,
            updated_at = $9
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(version_param(expected_version)?)
    .bind(record.status.as_str())
    .bind(record.attempt_count as i32)
    .bind(record.next_retry_at.map(|t| *t.as_datetime()))
    .bind(&record.last_error)
    .bind(record.cancellation_pending)
    .bind(version_param(record.version)?)
    .bind(record.updated_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(db_error("Failed to update dunning record"))?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM dunning_records WHERE id = $1")
        .bind(record.id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error("Failed to read dunning record version"))?;

    match exists {
        Some((found,)) => Err(DomainError::conflict(format!(
            "expected version {}, found {}",
            expected_version, found
        ))
        .with_detail("record_id", record.id.to_string())),
        None => Err(
            DomainError::new(ErrorCode::DunningRecordNotFound, "Dunning record not found")
                .with_detail("record_id", record.id.to_string()),
        ),
    }
}

#[async_trait]
impl DunningStore for PostgresDunningStore {
    async fn create_dunning_record(
        &self,
        record: &DunningRecord,
        change: Option<SubscriptionChange>,
    ) -> Result<CreateResult, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO dunning_records (
                id, user_id, subscription_id, invoice_id, status, attempt_count,
                next_retry_at, last_error, cancellation_pending, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (subscription_id, invoice_id) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.user_id.as_str())
        .bind(record.subscription_id.as_str())
        .bind(record.invoice_id.as_str())
        .bind(record.status.as_str())
        .bind(record.attempt_count as i32)
        .bind(record.next_retry_at.map(|t| *t.as_datetime()))
        .bind(&record.last_error)
        .bind(record.cancellation_pending)
        .bind(version_param(record.version)?)
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to insert dunning record"))?;

        if inserted.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(db_error("Failed to roll back transaction"))?;
            let existing = self
                .find_dunning_record(&record.subscription_id, &record.invoice_id)
                .await?
                .ok_or_else(|| {
                    DomainError::database("Dunning record vanished after unique conflict")
                })?;
            return Ok(CreateResult::AlreadyExists(existing));
        }

        if let Some(change) = change {
            let applied =
                apply_change_in_tx(&mut tx, &record.subscription_id, change, Some(&record.id))
                    .await?;
            if applied.is_none() {
                tx.rollback()
                    .await
                    .map_err(db_error("Failed to roll back transaction"))?;
                return Err(DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("subscription {} is not stored", record.subscription_id),
                ));
            }
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit dunning record"))?;
        Ok(CreateResult::Created)
    }

    async fn update_dunning_record_if_version(
        &self,
        record: &DunningRecord,
        expected_version: u64,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        update_record_in_tx(&mut tx, record, expected_version).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit dunning record"))?;
        Ok(())
    }

    async fn transactional_update_subscription_and_dunning(
        &self,
        record: &DunningRecord,
        expected_version: u64,
        change: Option<SubscriptionChange>,
    ) -> Result<Option<SubscriptionStatus>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        update_record_in_tx(&mut tx, record, expected_version).await?;
        let status = match change {
            Some(change) => {
                apply_change_in_tx(&mut tx, &record.subscription_id, change, Some(&record.id))
                    .await?
            }
            None => None,
        };

        tx.commit()
            .await
            .map_err(db_error("Failed to commit dunning transition"))?;
        Ok(status)
    }

    async fn find_dunning_record(
        &self,
        subscription_id: &SubscriptionId,
        invoice_id: &InvoiceId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let row: Option<DunningRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM dunning_records WHERE subscription_id = $1 AND invoice_id = $2",
            RECORD_COLUMNS
        ))
        .bind(subscription_id.as_str())
        .bind(invoice_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find dunning record"))?;

        row.map(DunningRecord::try_from).transpose()
    }

    async fn find_dunning_record_by_id(
        &self,
        id: &DunningRecordId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let row: Option<DunningRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM dunning_records WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find dunning record"))?;

        row.map(DunningRecord::try_from).transpose()
    }

    async fn find_active_for_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<DunningRecord>, DomainError> {
        let rows: Vec<DunningRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM dunning_records WHERE subscription_id = $1 AND status IN {} \
             ORDER BY created_at ASC",
            RECORD_COLUMNS, ACTIVE_STATUSES
        ))
        .bind(subscription_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list active dunning records"))?;

        rows.into_iter().map(DunningRecord::try_from).collect()
    }

    async fn find_latest_for_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let row: Option<DunningRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM dunning_records WHERE subscription_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(subscription_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find latest dunning record"))?;

        row.map(DunningRecord::try_from).transpose()
    }

    async fn find_due_retries(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError> {
        let rows: Vec<DunningRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM dunning_records \
             WHERE status = 'retry_scheduled' AND next_retry_at <= $1 \
             ORDER BY next_retry_at ASC LIMIT $2",
            RECORD_COLUMNS
        ))
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to find due retries"))?;

        rows.into_iter().map(DunningRecord::try_from).collect()
    }

    async fn find_stale_claims(
        &self,
        claimed_before: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError> {
        let rows: Vec<DunningRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM dunning_records \
             WHERE status = 'retrying' AND updated_at < $1 \
             ORDER BY updated_at ASC LIMIT $2",
            RECORD_COLUMNS
        ))
        .bind(claimed_before.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to find stale claims"))?;

        rows.into_iter().map(DunningRecord::try_from).collect()
    }

    async fn find_pending_cancellations(
        &self,
        limit: u32,
    ) -> Result<Vec<DunningRecord>, DomainError> {
        let rows: Vec<DunningRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM dunning_records \
             WHERE status = 'exhausted' AND cancellation_pending \
             ORDER BY updated_at ASC LIMIT $1",
            RECORD_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to find pending cancellations"))?;

        rows.into_iter().map(DunningRecord::try_from).collect()
    }

    async fn get_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, customer_id, customer_email, user_id, status,
                   current_period_end, cancel_at_period_end, updated_at
            FROM subscriptions WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load subscription"))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, customer_id, customer_email, user_id, status,
                current_period_end, cancel_at_period_end, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                customer_email = EXCLUDED.customer_email,
                user_id = EXCLUDED.user_id,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(subscription.id.as_str())
        .bind(subscription.customer_id.as_str())
        .bind(&subscription.customer_email)
        .bind(subscription.user_id.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_end.map(|t| *t.as_datetime()))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return DomainError::new(ErrorCode::AlreadyExists, "Subscription already exists");
            }
            DomainError::database(format!("Failed to save subscription: {}", e))
        })?;

        Ok(())
    }

    async fn apply_subscription_change(
        &self,
        id: &SubscriptionId,
        change: SubscriptionChange,
    ) -> Result<Option<SubscriptionStatus>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        let status = apply_change_in_tx(&mut tx, id, change, None).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit subscription change"))?;
        Ok(status)
    }
}
