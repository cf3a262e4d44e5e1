//! Provider event envelope and the internal event variants.
//!
//! Only the fields the dunning engine needs are captured; everything else in
//! the provider's schema is ignored.

use serde::{Deserialize, Serialize};

use super::WebhookError;
use crate::domain::foundation::{InvoiceId, ProviderEventId, SubscriptionId};

/// Provider webhook event envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEventEnvelope {
    /// Unique identifier for the event (evt_xxx format).
    pub id: String,

    /// Type of event (e.g., "invoice.payment_failed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Time at which the event was created (Unix timestamp).
    #[serde(default)]
    pub created: i64,

    /// Whether this is a live mode event.
    #[serde(default)]
    pub livemode: bool,

    /// Object containing event-specific data.
    pub data: EnvelopeData,
}

/// Container for the object that triggered the event.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvelopeData {
    pub object: serde_json::Value,
}

/// Closed set of events the dunning engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    PaymentFailed {
        subscription_id: SubscriptionId,
        invoice_id: InvoiceId,
        reason: Option<String>,
    },
    PaymentSucceeded {
        subscription_id: SubscriptionId,
        invoice_id: InvoiceId,
    },
    SubscriptionDeleted {
        subscription_id: SubscriptionId,
    },
    /// Any other event type. Logged, acknowledged and ignored.
    Unrecognized { event_type: String },
}

impl InboundEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::PaymentFailed { .. } => "payment_failed",
            InboundEvent::PaymentSucceeded { .. } => "payment_succeeded",
            InboundEvent::SubscriptionDeleted { .. } => "subscription_deleted",
            InboundEvent::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Reference that the provider may send as a bare id or as an expanded object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    fn into_id(self) -> String {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: String,
    subscription: Option<Expandable>,
    #[serde(default)]
    last_payment_error: Option<ErrorDetail>,
    #[serde(default)]
    failure_message: Option<String>,
}

impl InvoiceObject {
    fn failure_reason(&self) -> Option<String> {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
            .or_else(|| self.failure_message.clone())
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
}

impl ProviderEventEnvelope {
    /// Parses and validates a raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` for malformed JSON or a blank event id.
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        let envelope: Self = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;
        envelope.event_id()?;
        Ok(envelope)
    }

    /// Returns the validated provider event id.
    pub fn event_id(&self) -> Result<ProviderEventId, WebhookError> {
        ProviderEventId::new(self.id.clone())
            .map_err(|e| WebhookError::ParseError(e.to_string()))
    }

    /// Converts the envelope into the internal event variant.
    ///
    /// Invoices without a subscription are one-off charges outside dunning
    /// and become `Unrecognized`.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` when a recognised event type carries an object
    /// that does not match its schema.
    pub fn to_inbound_event(&self) -> Result<InboundEvent, WebhookError> {
        match self.event_type.as_str() {
            "invoice.payment_failed" => {
                let invoice = self.invoice()?;
                let reason = invoice.failure_reason();
                match self.invoice_keys(invoice)? {
                    Some((subscription_id, invoice_id)) => Ok(InboundEvent::PaymentFailed {
                        subscription_id,
                        invoice_id,
                        reason,
                    }),
                    None => Ok(self.unrecognized()),
                }
            }
            "invoice.payment_succeeded" | "invoice.paid" => {
                let invoice = self.invoice()?;
                match self.invoice_keys(invoice)? {
                    Some((subscription_id, invoice_id)) => Ok(InboundEvent::PaymentSucceeded {
                        subscription_id,
                        invoice_id,
                    }),
                    None => Ok(self.unrecognized()),
                }
            }
            "customer.subscription.deleted" => {
                let subscription: SubscriptionObject =
                    serde_json::from_value(self.data.object.clone()).map_err(|e| {
                        WebhookError::ParseError(format!("invalid subscription: {}", e))
                    })?;
                Ok(InboundEvent::SubscriptionDeleted {
                    subscription_id: parse_id(SubscriptionId::new(subscription.id))?,
                })
            }
            _ => Ok(self.unrecognized()),
        }
    }

    fn invoice(&self) -> Result<InvoiceObject, WebhookError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| WebhookError::ParseError(format!("invalid invoice: {}", e)))
    }

    fn invoice_keys(
        &self,
        invoice: InvoiceObject,
    ) -> Result<Option<(SubscriptionId, InvoiceId)>, WebhookError> {
        let Some(subscription) = invoice.subscription else {
            tracing::info!(event_id = %self.id, "Invoice event without subscription ignored");
            return Ok(None);
        };
        Ok(Some((
            parse_id(SubscriptionId::new(subscription.into_id()))?,
            parse_id(InvoiceId::new(invoice.id))?,
        )))
    }

    fn unrecognized(&self) -> InboundEvent {
        InboundEvent::Unrecognized {
            event_type: self.event_type.clone(),
        }
    }
}

fn parse_id<T>(result: Result<T, crate::domain::foundation::ValidationError>) -> Result<T, WebhookError> {
    result.map_err(|e| WebhookError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, object: serde_json::Value) -> ProviderEventEnvelope {
        let body = json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1_700_000_000,
            "livemode": false,
            "data": { "object": object }
        });
        ProviderEventEnvelope::parse(body.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn payment_failed_extracts_keys_and_reason() {
        let event = envelope(
            "invoice.payment_failed",
            json!({
                "id": "inv_123",
                "subscription": "sub_123",
                "last_payment_error": { "code": "card_declined", "message": "Your card was declined." }
            }),
        )
        .to_inbound_event()
        .unwrap();

        assert_eq!(
            event,
            InboundEvent::PaymentFailed {
                subscription_id: SubscriptionId::new("sub_123").unwrap(),
                invoice_id: InvoiceId::new("inv_123").unwrap(),
                reason: Some("Your card was declined.".to_string()),
            }
        );
    }

    #[test]
    fn payment_failed_accepts_expanded_subscription() {
        let event = envelope(
            "invoice.payment_failed",
            json!({ "id": "inv_1", "subscription": { "id": "sub_9", "object": "subscription" } }),
        )
        .to_inbound_event()
        .unwrap();

        assert!(matches!(
            event,
            InboundEvent::PaymentFailed { subscription_id, reason: None, .. }
                if subscription_id.as_str() == "sub_9"
        ));
    }

    #[test]
    fn paid_and_payment_succeeded_both_map_to_success() {
        for event_type in ["invoice.paid", "invoice.payment_succeeded"] {
            let event = envelope(event_type, json!({ "id": "inv_1", "subscription": "sub_1" }))
                .to_inbound_event()
                .unwrap();
            assert_eq!(event.name(), "payment_succeeded");
        }
    }

    #[test]
    fn subscription_deleted_uses_object_id() {
        let event = envelope("customer.subscription.deleted", json!({ "id": "sub_7" }))
            .to_inbound_event()
            .unwrap();
        assert_eq!(
            event,
            InboundEvent::SubscriptionDeleted {
                subscription_id: SubscriptionId::new("sub_7").unwrap()
            }
        );
    }

    #[test]
    fn invoice_without_subscription_is_unrecognized() {
        let event = envelope("invoice.payment_failed", json!({ "id": "inv_1", "subscription": null }))
            .to_inbound_event()
            .unwrap();
        assert!(matches!(event, InboundEvent::Unrecognized { .. }));
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        let event = envelope("customer.created", json!({ "id": "cus_1" }))
            .to_inbound_event()
            .unwrap();
        assert_eq!(
            event,
            InboundEvent::Unrecognized {
                event_type: "customer.created".to_string()
            }
        );
    }

    #[test]
    fn invoice_missing_id_is_parse_error() {
        let result = envelope("invoice.payment_failed", json!({ "subscription": "sub_1" }))
            .to_inbound_event();
        assert!(matches!(result, Err(WebhookError::ParseError(_))));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            ProviderEventEnvelope::parse(b"{not json"),
            Err(WebhookError::ParseError(_))
        ));
    }

    #[test]
    fn blank_event_id_is_parse_error() {
        let body = json!({ "id": "", "type": "invoice.paid", "data": { "object": {} } });
        assert!(matches!(
            ProviderEventEnvelope::parse(body.to_string().as_bytes()),
            Err(WebhookError::ParseError(_))
        ));
    }

    #[test]
    fn inbound_event_round_trips_through_ledger_json() {
        let event = InboundEvent::SubscriptionDeleted {
            subscription_id: SubscriptionId::new("sub_1").unwrap(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "subscription_deleted");
        let back: InboundEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
