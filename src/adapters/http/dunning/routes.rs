//! Axum router configuration for the dunning service.

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_failed_payment, get_dunning_status, health, receive_payment_webhook, retry_now,
    DunningAppState,
};

/// Operator endpoints, mounted at `/api/dunning`.
///
/// # Routes
/// - `POST /failed-payments` - Open a dunning cycle directly
/// - `GET /subscriptions/:subscription_id` - Current dunning state
/// - `POST /records/:id/retry` - Charge now, ignoring the schedule
pub fn dunning_routes() -> Router<DunningAppState> {
    Router::new()
        .route("/failed-payments", post(create_failed_payment))
        .route("/subscriptions/:subscription_id", get(get_dunning_status))
        .route("/records/:id/retry", post(retry_now))
}

/// Webhook endpoints, mounted at `/api/webhooks`.
///
/// No user authentication; requests are verified by signature.
pub fn webhook_routes() -> Router<DunningAppState> {
    Router::new().route("/payments", post(receive_payment_webhook))
}

/// The complete application router with tracing and a request deadline.
pub fn dunning_router(state: DunningAppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/dunning", dunning_routes())
        .nest("/api/webhooks", webhook_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::adapters::http::dunning::dto::{DunningRecordResponse, ErrorResponse, WebhookAck};
    use crate::adapters::memory::{
        InMemoryDunningStore, InMemoryNotificationLedger, InMemoryPaymentEventLedger,
        RecordingNotificationSender,
    };
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::application::{
        DunningEngine, EngineSettings, NotificationDispatcher, WebhookIngestionGateway,
    };
    use crate::domain::billing::Subscription;
    use crate::domain::dunning::DunningPolicy;
    use crate::domain::foundation::{CustomerId, InvoiceId, SubscriptionId, Timestamp, UserId};
    use crate::domain::webhook::{compute_signature_hex, WebhookVerifier};
    use crate::ports::{DunningStore, PaymentEventLedger};

    const SECRET: &str = "whsec_test_secret";

    struct TestApp {
        router: Router,
        store: Arc<InMemoryDunningStore>,
        ledger: Arc<InMemoryPaymentEventLedger>,
    }

    async fn test_app() -> TestApp {
        let store = Arc::new(InMemoryDunningStore::new());
        let ledger = Arc::new(InMemoryPaymentEventLedger::new());
        let notifications = NotificationDispatcher::new(
            Arc::new(InMemoryNotificationLedger::new()),
            Arc::new(RecordingNotificationSender::new()),
            Duration::from_secs(1),
        );
        let engine = Arc::new(DunningEngine::new(
            store.clone(),
            Arc::new(MockPaymentProvider::new()),
            notifications,
            DunningPolicy::default(),
            EngineSettings::default(),
        ));
        let gateway = Arc::new(WebhookIngestionGateway::new(
            WebhookVerifier::new(SECRET),
            ledger.clone(),
            engine.clone(),
        ));

        let subscription = Subscription::new(
            SubscriptionId::new("sub_123").unwrap(),
            CustomerId::new("cus_123").unwrap(),
            UserId::new("user-1").unwrap(),
        );
        store.upsert_subscription(&subscription).await.unwrap();

        let router = dunning_router(DunningAppState { engine, gateway }, Duration::from_secs(5));
        TestApp {
            router,
            store,
            ledger,
        }
    }

    fn failed_payment_body(event_id: &str) -> String {
        serde_json::json!({
            "id": event_id,
            "type": "invoice.payment_failed",
            "data": { "object": {
                "id": "inv_123",
                "subscription": "sub_123",
            }}
        })
        .to_string()
    }

    fn signed_webhook(body: &str) -> Request<Body> {
        let timestamp = Timestamp::now().as_unix_secs();
        let signature = compute_signature_hex(SECRET, timestamp, body.as_bytes());
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/payments")
            .header("Stripe-Signature", format!("t={},v1={}", timestamp, signature))
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_for_record(store: &InMemoryDunningStore) -> bool {
        for _ in 0..50 {
            let found = store
                .find_dunning_record(
                    &SubscriptionId::new("sub_123").unwrap(),
                    &InvoiceId::new("inv_123").unwrap(),
                )
                .await
                .unwrap();
            if found.is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn signed_webhook_is_accepted_and_dispatched() {
        let app = test_app().await;

        let response = app
            .router
            .oneshot(signed_webhook(&failed_payment_body("evt_1")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let ack: WebhookAck = json_body(response).await;
        assert_eq!(ack.status, "accepted");
        assert!(wait_for_record(&app.store).await);
    }

    #[tokio::test]
    async fn tampered_webhook_is_rejected_without_side_effects() {
        let app = test_app().await;
        let mut request = signed_webhook(&failed_payment_body("evt_1"));
        *request.body_mut() = Body::from(failed_payment_body("evt_tampered"));

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = json_body(response).await;
        assert_eq!(error.code, "INVALID_SIGNATURE");
        assert!(app.ledger.is_empty().await);
        assert_eq!(app.store.record_count().await, 0);
    }

    #[tokio::test]
    async fn webhook_without_signature_is_rejected() {
        let app = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/webhooks/payments")
            .body(Body::from(failed_payment_body("evt_1")))
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn split_signature_headers_are_accepted() {
        let app = test_app().await;
        let body = failed_payment_body("evt_split");
        let timestamp = Timestamp::now().as_unix_secs();
        let signature = compute_signature_hex(SECRET, timestamp, body.as_bytes());
        let request = Request::builder()
            .method("POST")
            .uri("/api/webhooks/payments")
            .header("X-Webhook-Signature", signature)
            .header("X-Webhook-Timestamp", timestamp.to_string())
            .body(Body::from(body))
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_webhook_is_acknowledged() {
        let app = test_app().await;
        let body = failed_payment_body("evt_dup");

        let first = app.router.clone().oneshot(signed_webhook(&body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.router.oneshot(signed_webhook(&body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let ack: WebhookAck = json_body(second).await;
        assert_eq!(ack.status, "duplicate");
        assert_eq!(app.ledger.len().await, 1);
    }

    #[tokio::test]
    async fn unrecognized_event_is_acknowledged_as_ignored() {
        let app = test_app().await;
        let body = serde_json::json!({
            "id": "evt_other",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        })
        .to_string();

        let response = app.router.oneshot(signed_webhook(&body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let ack: WebhookAck = json_body(response).await;
        assert_eq!(ack.status, "ignored");
    }

    #[tokio::test]
    async fn failed_payment_endpoint_opens_a_cycle() {
        let app = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/dunning/failed-payments")
            .header("Content-Type", "application/json")
            .body(Body::from(
                r#"{"subscription_id":"sub_123","invoice_id":"inv_123"}"#,
            ))
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record: DunningRecordResponse = json_body(response).await;
        assert_eq!(record.status, "retry_scheduled");
        assert_eq!(record.attempt_count, 0);

        let status = app
            .router
            .oneshot(
                Request::get("/api/dunning/subscriptions/sub_123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
        let current: DunningRecordResponse = json_body(status).await;
        assert_eq!(current.id, record.id);
    }

    #[tokio::test]
    async fn status_of_subscription_without_dunning_is_not_found() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(
                Request::get("/api/dunning/subscriptions/sub_none")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retry_with_malformed_id_is_bad_request() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(
                Request::post("/api/dunning/records/not-a-uuid/retry")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn retry_of_unknown_record_is_not_found() {
        let app = test_app().await;
        let uri = format!("/api/dunning/records/{}/retry", uuid::Uuid::new_v4());
        let response = app
            .router
            .oneshot(Request::post(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
