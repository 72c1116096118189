use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::PaymentsConfig;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use tracing::{debug, error, info};
use url::Url;

use crate::error::StoreError;
use crate::model::{ModelId, OrderStatus, UserId, to_minor_units};
use crate::storage::StoreStorage;

type HmacSha512 = Hmac<Sha512>;

/// Header the provider puts the hex HMAC-SHA512 of the raw body in.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSessionRequest {
    pub order_id: ModelId,
    pub amount_minor: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Remote side of "create a checkout session".
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, StoreError>;
}

#[derive(Serialize)]
struct LineItem<'a> {
    name: &'a str,
    amount: i64,
    quantity: u32,
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    amount: i64,
    currency: &'a str,
    client_reference_id: String,
    success_url: &'a str,
    cancel_url: &'a str,
    line_items: Vec<LineItem<'a>>,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<CheckoutSession>,
}

/// HTTP client for the payment provider. All settings come in through the
/// constructor.
#[derive(Clone)]
pub struct PaystackGateway {
    client: reqwest::Client,
    sessions_url: Url,
    config: PaymentsConfig,
}

impl PaystackGateway {
    pub fn new(config: PaymentsConfig) -> Result<Self, StoreError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let sessions_url = Url::parse(&base)
            .and_then(|url| url.join("checkout/sessions"))
            .map_err(|e| StoreError::Config(format!("payments.base_url: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StoreError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            sessions_url,
            config,
        })
    }

    pub fn sessions_url(&self) -> &Url {
        &self.sessions_url
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn create_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, StoreError> {
        let body = CreateSessionBody {
            amount: request.amount_minor,
            currency: &self.config.currency,
            client_reference_id: request.order_id.to_string(),
            success_url: &self.config.success_url,
            cancel_url: &self.config.cancel_url,
            line_items: vec![LineItem {
                name: &request.description,
                amount: request.amount_minor,
                quantity: 1,
            }],
        };

        debug!(order_id = request.order_id, url = %self.sessions_url, "Creating checkout session");
        let response = self
            .client
            .post(self.sessions_url.clone())
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::GatewayUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::GatewayUnavailable(format!(
                "gateway returned {}: {}",
                status, text
            )));
        }

        let parsed: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| StoreError::GatewayUnavailable(format!("unreadable response: {}", e)))?;

        match parsed {
            CreateSessionResponse {
                status: true,
                data: Some(session),
                ..
            } => Ok(session),
            CreateSessionResponse { message, .. } => Err(StoreError::GatewayUnavailable(
                message.unwrap_or_else(|| "session was not created".to_string()),
            )),
        }
    }
}

/// Checks webhook signatures against the shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    pub fn sign(&self, payload: &[u8]) -> Result<String, StoreError> {
        let mut mac = HmacSha512::new_from_slice(&self.secret)
            .map_err(|e| StoreError::Config(format!("webhook secret: {}", e)))?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time comparison of the presented hex signature against the
    /// HMAC of the raw body.
    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), StoreError> {
        let signature = signature.ok_or(StoreError::InvalidSignature)?;
        let presented = hex::decode(signature.trim()).map_err(|_| StoreError::InvalidSignature)?;

        let mut mac = HmacSha512::new_from_slice(&self.secret)
            .map_err(|e| StoreError::Config(format!("webhook secret: {}", e)))?;
        mac.update(payload);
        mac.verify_slice(&presented)
            .map_err(|_| StoreError::InvalidSignature)
    }
}

/// Creates gateway sessions for orders and stores the returned reference.
#[derive(Clone)]
pub struct PaymentService {
    storage: Arc<dyn StoreStorage>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(storage: Arc<dyn StoreStorage>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { storage, gateway }
    }

    pub async fn create_session(
        &self,
        user_id: UserId,
        order_id: ModelId,
    ) -> Result<CheckoutSession, StoreError> {
        let order = self
            .storage
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or(StoreError::OrderNotFound { order_id })?;
        if order.status != OrderStatus::Pending {
            return Err(StoreError::OrderNotPayable {
                order_id,
                status: order.status,
            });
        }

        let amount = order.payable_amount();
        let amount_minor = to_minor_units(amount)
            .ok_or_else(|| StoreError::InvalidAmount(amount.to_string()))?;

        let request = CheckoutSessionRequest {
            order_id: order.id,
            amount_minor,
            description: format!("Order {}", order.id),
        };

        let session = match self.gateway.create_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                error!(order_id, error = %e, "Checkout session creation failed");
                return Err(match e {
                    StoreError::GatewayUnavailable(_) => e,
                    other => StoreError::GatewayUnavailable(other.to_string()),
                });
            }
        };

        self.storage.set_payment_session(order.id, &session.id).await?;
        info!(order_id, session_id = %session.id, amount_minor, "Checkout session created");
        Ok(session)
    }
}
