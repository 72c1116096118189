use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::gateway::WebhookVerifier;
use crate::model::{ModelId, PaymentRecordOutcome, from_minor_units};
use crate::storage::StoreStorage;

pub const SESSION_COMPLETED: &str = "checkout.session.completed";

/// Envelope of a provider notification. Only the event type is read up
/// front; `data` stays untyped until the event is known to be a completion.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl WebhookEvent {
    /// `type` wins when both names are present.
    pub fn event_type(&self) -> Option<&str> {
        self.kind.as_deref().or(self.event.as_deref())
    }

    /// Strictly decode `data.object` as a completed checkout session.
    pub fn session_object(&self) -> Result<SessionObject, StoreError> {
        let object = self
            .data
            .as_ref()
            .and_then(|data| data.get("object"))
            .ok_or_else(|| StoreError::InvalidPayload("missing data.object".to_string()))?;
        SessionObject::deserialize(object)
            .map_err(|e| StoreError::InvalidPayload(format!("invalid data.object: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionObject {
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
}

/// What happened to a verified delivery. Every variant is acknowledged with
/// 200 so the provider stops retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Ignored { event_type: String },
    Recorded { order_id: ModelId },
    Duplicate { order_id: ModelId },
    NotPayable { order_id: ModelId },
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Ignored { .. } => "ignored",
            WebhookOutcome::Recorded { .. } => "recorded",
            WebhookOutcome::Duplicate { .. } => "duplicate",
            WebhookOutcome::NotPayable { .. } => "not_payable",
        }
    }
}

/// Applies signed provider notifications to orders.
#[derive(Clone)]
pub struct Reconciler {
    storage: Arc<dyn StoreStorage>,
    verifier: WebhookVerifier,
}

impl Reconciler {
    pub fn new(storage: Arc<dyn StoreStorage>, verifier: WebhookVerifier) -> Self {
        Self { storage, verifier }
    }

    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, StoreError> {
        let result = self.apply(body, signature).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(StoreError::InvalidSignature) => "invalid_signature",
            Err(StoreError::InvalidPayload(_)) => "invalid_payload",
            Err(StoreError::UnknownOrder(_)) => "unknown_order",
            Err(_) => "error",
        };
        counter!("storefront_webhooks_total", "outcome" => label).increment(1);
        result
    }

    async fn apply(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, StoreError> {
        if let Err(e) = self.verifier.verify(body, signature) {
            warn!("Rejected webhook with bad signature");
            return Err(e);
        }

        let event: WebhookEvent = serde_json::from_slice(body).map_err(|e| {
            warn!(error = %e, "Webhook body is not a valid event");
            StoreError::InvalidPayload(e.to_string())
        })?;

        let event_type = event
            .event_type()
            .ok_or_else(|| StoreError::InvalidPayload("missing event type".to_string()))?;
        if event_type != SESSION_COMPLETED {
            debug!(event_type, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored {
                event_type: event_type.to_string(),
            });
        }

        let session = event.session_object()?;

        let reference = session
            .client_reference_id
            .ok_or_else(|| StoreError::InvalidPayload("missing client_reference_id".to_string()))?;
        let order_id: ModelId = reference.trim().parse().map_err(|_| {
            StoreError::InvalidPayload(format!("client_reference_id {:?} is not an order id", reference))
        })?;

        let charge_id = session
            .payment_intent
            .ok_or_else(|| StoreError::InvalidPayload("missing payment_intent".to_string()))?;

        let amount = match session.amount_total {
            Some(minor) if minor >= 0 => from_minor_units(minor),
            Some(minor) => {
                return Err(StoreError::InvalidPayload(format!(
                    "negative amount_total {}",
                    minor
                )));
            }
            None => {
                // Fall back to what the order was charged for
                let order = self
                    .storage
                    .get_order(order_id)
                    .await?
                    .ok_or_else(|| StoreError::UnknownOrder(reference.clone()))?;
                order.payable_amount()
            }
        };

        match self.storage.record_payment(order_id, &charge_id, amount).await {
            Ok(PaymentRecordOutcome::Recorded) => {
                info!(order_id, charge_id = %charge_id, %amount, "Order paid");
                Ok(WebhookOutcome::Recorded { order_id })
            }
            Ok(PaymentRecordOutcome::AlreadyRecorded) => {
                info!(order_id, "Duplicate completion event, payment already recorded");
                Ok(WebhookOutcome::Duplicate { order_id })
            }
            Ok(PaymentRecordOutcome::NotPayable(status)) => {
                warn!(order_id, %status, "Completion event for an order that cannot be paid");
                Ok(WebhookOutcome::NotPayable { order_id })
            }
            Err(StoreError::OrderNotFound { .. }) => {
                error!(order_id, charge_id = %charge_id, "Completion event for unknown order, needs manual reconciliation");
                Err(StoreError::UnknownOrder(reference))
            }
            Err(e) => Err(e),
        }
    }
}
