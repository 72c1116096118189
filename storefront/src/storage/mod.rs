// Re-export all storage-related modules
pub mod prod_store;
pub mod schema;

pub use prod_store::*;
pub use schema::*;

use crate::error::StoreError;
use crate::model::*;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Durable store behind the checkout workflow, the gateway adapter and the
/// webhook reconciler.
#[async_trait]
pub trait StoreStorage: Send + Sync {
    async fn get_product(&self, product_id: ModelId) -> Result<Option<Product>, StoreError>;

    async fn get_products(&self, product_ids: &[ModelId]) -> Result<Vec<Product>, StoreError>;

    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Exact-match lookup of a region's tax rate.
    async fn find_tax_rate(&self, region: &str) -> Result<Option<Decimal>, StoreError>;

    /// Persist the order, its items and the inventory decrements as one
    /// transaction. Nothing is written when any decrement would go negative.
    async fn place_order(&self, new_order: &NewOrder) -> Result<Order, StoreError>;

    async fn get_order(&self, order_id: ModelId) -> Result<Option<Order>, StoreError>;

    async fn get_order_detail(&self, order_id: ModelId) -> Result<Option<OrderDetail>, StoreError>;

    /// Attach the gateway session reference to a PENDING order.
    async fn set_payment_session(
        &self,
        order_id: ModelId,
        session_id: &str,
    ) -> Result<(), StoreError>;

    /// Move a PENDING order to PROCESSING and write its payment, at most once.
    async fn record_payment(
        &self,
        order_id: ModelId,
        charge_id: &str,
        amount: Decimal,
    ) -> Result<PaymentRecordOutcome, StoreError>;

    /// Move an order along the status state machine. Cancelling returns the
    /// order's quantities to inventory.
    async fn transition_order(
        &self,
        order_id: ModelId,
        next: OrderStatus,
    ) -> Result<Order, StoreError>;
}
