//! HTTP handlers for the dunning endpoints.
//!
//! The webhook handler acknowledges as soon as the event is verified and
//! recorded; the engine runs on a spawned task. Anything that fails there is
//! left in the ledger for the retry scheduler.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::{DunningEngine, WebhookIngestionGateway};
use crate::domain::dunning::DunningError;
use crate::domain::foundation::{DunningRecordId, InvoiceId, SubscriptionId, ValidationError};
use crate::domain::webhook::{SignatureHeader, WebhookError};

use super::dto::{DunningRecordResponse, ErrorResponse, FailedPaymentRequest, WebhookAck};

/// Combined `t=...,v1=...` header sent by Stripe.
pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";
/// Bare hex signature, paired with [`TIMESTAMP_HEADER`].
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for the dunning routes.
#[derive(Clone)]
pub struct DunningAppState {
    pub engine: Arc<DunningEngine>,
    pub gateway: Arc<WebhookIngestionGateway>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/webhooks/payments
///
/// - 200: accepted, duplicate, or unrecognized
/// - 400: bad signature, stale timestamp, or unparseable body
/// - 500: the ledger could not record the event; the provider redelivers
pub async fn receive_payment_webhook(
    State(state): State<DunningAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = match signature_from_headers(&headers) {
        Ok(signature) => signature,
        Err(e) => return webhook_rejection(e),
    };

    match state.gateway.accept(&body, &signature).await {
        Ok(accepted) => {
            let ack = WebhookAck::for_event(&accepted);
            let gateway = state.gateway.clone();
            tokio::spawn(async move {
                // Failures are already settled in the ledger.
                let _ = gateway.dispatch(&accepted).await;
            });
            (StatusCode::OK, Json(ack)).into_response()
        }
        Err(WebhookError::DuplicateEvent(event_id)) => {
            (StatusCode::OK, Json(WebhookAck::duplicate(event_id))).into_response()
        }
        Err(e) => webhook_rejection(e),
    }
}

fn signature_from_headers(headers: &HeaderMap) -> Result<SignatureHeader, WebhookError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(combined) = header(STRIPE_SIGNATURE_HEADER) {
        return SignatureHeader::parse(combined);
    }
    match (header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER)) {
        (Some(signature), Some(timestamp)) => SignatureHeader::from_parts(signature, timestamp),
        _ => Err(WebhookError::InvalidSignature),
    }
}

fn webhook_rejection(error: WebhookError) -> Response {
    if error.is_retryable() {
        tracing::error!(error = %error, "Webhook could not be recorded");
    } else {
        tracing::warn!(error = %error, "Webhook rejected");
    }
    let body = ErrorResponse::new(error.code(), error.to_string());
    (error.status_code(), Json(body)).into_response()
}

// ════════════════════════════════════════════════════════════════════════════════
// Operator Endpoints
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/dunning/failed-payments
pub async fn create_failed_payment(
    State(state): State<DunningAppState>,
    Json(request): Json<FailedPaymentRequest>,
) -> Result<impl IntoResponse, DunningApiError> {
    let subscription_id = SubscriptionId::new(request.subscription_id)?;
    let invoice_id = InvoiceId::new(request.invoice_id)?;

    let record = state
        .engine
        .handle_failed_payment(&subscription_id, &invoice_id, request.reason)
        .await?;

    Ok((StatusCode::OK, Json(DunningRecordResponse::from(&record))))
}

/// GET /api/dunning/subscriptions/:subscription_id
pub async fn get_dunning_status(
    State(state): State<DunningAppState>,
    Path(subscription_id): Path<String>,
) -> Result<impl IntoResponse, DunningApiError> {
    let subscription_id = SubscriptionId::new(subscription_id)?;

    let record = state
        .engine
        .get_dunning_status(&subscription_id)
        .await?
        .ok_or_else(|| {
            DunningApiError::not_found(format!(
                "No dunning record for subscription {}",
                subscription_id
            ))
        })?;

    Ok(Json(DunningRecordResponse::from(&record)))
}

/// POST /api/dunning/records/:id/retry
pub async fn retry_now(
    State(state): State<DunningAppState>,
    Path(record_id): Path<String>,
) -> Result<impl IntoResponse, DunningApiError> {
    let record_id = DunningRecordId::from_str(&record_id).map_err(|_| {
        DunningApiError::validation(format!("Invalid dunning record id: {}", record_id))
    })?;

    let record = state.engine.retry_now(&record_id).await?;
    Ok(Json(DunningRecordResponse::from(&record)))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts dunning errors to HTTP responses.
#[derive(Debug)]
pub enum DunningApiError {
    Dunning(DunningError),
    Validation(String),
    NotFound(String),
}

impl DunningApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<DunningError> for DunningApiError {
    fn from(err: DunningError) -> Self {
        Self::Dunning(err)
    }
}

impl From<ValidationError> for DunningApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for DunningApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            DunningApiError::Validation(message) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message.clone())
            }
            DunningApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", message.clone())
            }
            DunningApiError::Dunning(err) => {
                let status = match err {
                    DunningError::RecordNotFound(_) | DunningError::SubscriptionNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    DunningError::InvalidState(_) | DunningError::PersistenceConflict(_) => {
                        StatusCode::CONFLICT
                    }
                    DunningError::PermanentPaymentFailure(_) => StatusCode::PAYMENT_REQUIRED,
                    DunningError::TransientProviderError(_) => StatusCode::SERVICE_UNAVAILABLE,
                    DunningError::NotificationDeliveryError(_)
                    | DunningError::Infrastructure(_) => {
                        tracing::error!(error = %err, "Dunning request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.code().as_str(), err.to_string())
            }
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}
