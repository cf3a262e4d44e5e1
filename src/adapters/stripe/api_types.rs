//! Stripe API objects as returned by the REST endpoints we call.
//!
//! Only the fields the dunning engine reads are modelled; serde ignores the
//! rest.

use serde::Deserialize;

use crate::domain::billing::SubscriptionStatus;

/// A customer reference that is either a bare id or an expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StripeCustomerRef {
    Id(String),
    Expanded(StripeCustomer),
}

impl StripeCustomerRef {
    pub fn id(&self) -> &str {
        match self {
            StripeCustomerRef::Id(id) => id,
            StripeCustomerRef::Expanded(c) => &c.id,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            StripeCustomerRef::Id(_) => None,
            StripeCustomerRef::Expanded(c) => c.email.as_deref(),
        }
    }
}

/// Stripe customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: StripeCustomerRef,
    pub status: String,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

impl StripeSubscription {
    /// Maps Stripe's status vocabulary onto ours.
    ///
    /// `unpaid` is past due for dunning purposes; `incomplete_expired` is
    /// terminal. Trials count as active.
    pub fn local_status(&self) -> SubscriptionStatus {
        match self.status.as_str() {
            "past_due" | "unpaid" | "incomplete" => SubscriptionStatus::PastDue,
            "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            "paused" => SubscriptionStatus::Paused,
            _ => SubscriptionStatus::Active,
        }
    }
}

/// Stripe invoice object (response of `POST /v1/invoices/{id}/pay`).
#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub paid: bool,
}

/// Stripe error envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorBody {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub decline_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_parses_with_expanded_customer() {
        let json = r#"{
            "id": "sub_1",
            "customer": { "id": "cus_1", "email": "ada@example.com" },
            "status": "past_due",
            "current_period_end": 1700000000,
            "cancel_at_period_end": false,
            "metadata": { "user_id": "user-1" }
        }"#;
        let sub: StripeSubscription = serde_json::from_str(json).unwrap();
        assert_eq!(sub.customer.id(), "cus_1");
        assert_eq!(sub.customer.email(), Some("ada@example.com"));
        assert_eq!(sub.local_status(), SubscriptionStatus::PastDue);
        assert_eq!(sub.metadata.get("user_id").map(String::as_str), Some("user-1"));
    }

    #[test]
    fn subscription_parses_with_bare_customer_id() {
        let json = r#"{ "id": "sub_1", "customer": "cus_1", "status": "trialing" }"#;
        let sub: StripeSubscription = serde_json::from_str(json).unwrap();
        assert_eq!(sub.customer.id(), "cus_1");
        assert_eq!(sub.customer.email(), None);
        assert_eq!(sub.local_status(), SubscriptionStatus::Active);
    }

    #[test]
    fn error_body_parses_decline_code() {
        let json = r#"{ "error": { "type": "card_error", "code": "card_declined",
            "decline_code": "insufficient_funds", "message": "Your card has insufficient funds." } }"#;
        let err: StripeErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(err.error.error_type.as_deref(), Some("card_error"));
        assert_eq!(err.error.decline_code.as_deref(), Some("insufficient_funds"));
    }
}
