use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::cart::Cart;
use crate::error::StoreError;
use crate::model::{ModelId, NewOrder, Order, OrderDetail, OrderLine, OrderStatus, Product, UserId};
use crate::storage::StoreStorage;
use crate::tax::{TaxPolicy, ensure_tax_amount};

/// Turns a session cart into a persisted PENDING order.
#[derive(Clone)]
pub struct OrderWorkflow {
    storage: Arc<dyn StoreStorage>,
    tax: TaxPolicy,
}

impl OrderWorkflow {
    pub fn new(storage: Arc<dyn StoreStorage>, tax: TaxPolicy) -> Self {
        Self { storage, tax }
    }

    pub fn storage(&self) -> &Arc<dyn StoreStorage> {
        &self.storage
    }

    pub fn tax_policy(&self) -> &TaxPolicy {
        &self.tax
    }

    pub async fn lookup_product(&self, product_id: ModelId) -> Result<Product, StoreError> {
        self.storage
            .get_product(product_id)
            .await?
            .ok_or(StoreError::ProductNotFound { product_id })
    }

    /// Add one unit of a catalog product to `cart`.
    pub async fn add_to_cart(&self, cart: &mut Cart, product_id: ModelId) -> Result<String, StoreError> {
        let product = self.lookup_product(product_id).await?;
        cart.add(&product)?;
        Ok(product.name)
    }

    /// Resolve the cart against the catalog, price and tax it, and persist
    /// order, items and inventory decrements atomically. The cart is
    /// cleared only when everything has been committed.
    pub async fn checkout(
        &self,
        user_id: UserId,
        cart: &mut Cart,
        region: Option<&str>,
    ) -> Result<Order, StoreError> {
        let started = Instant::now();

        if cart.is_empty() {
            warn!(user_id, "Checkout attempted with empty cart");
            return Err(StoreError::EmptyCart);
        }

        let products = self.storage.get_products(&cart.product_ids()).await?;
        let lines: Vec<OrderLine> = products
            .iter()
            .map(|product| OrderLine {
                product_id: product.id,
                quantity: cart.quantity(product.id),
                unit_price: product.price,
            })
            .collect();
        if lines.is_empty() {
            warn!(user_id, "No valid products found in cart");
            return Err(StoreError::InvalidProduct);
        }
        if lines.len() < cart.len() {
            warn!(
                user_id,
                dropped = cart.len() - lines.len(),
                "Dropping cart entries for unknown products"
            );
        }

        let total_price: Decimal = lines.iter().map(OrderLine::line_total).sum();
        let rate = self.tax.resolve_rate(self.storage.as_ref(), region).await?;
        let tax_amount = ensure_tax_amount(None, total_price, rate);

        let new_order = NewOrder {
            user_id,
            region: region.unwrap_or(&self.tax.default_region).to_string(),
            total_price,
            tax_amount,
            lines,
        };

        let order = match self.storage.place_order(&new_order).await {
            Ok(order) => order,
            Err(e) => {
                counter!("storefront_checkouts_total", "outcome" => "failed").increment(1);
                return Err(e);
            }
        };
        cart.clear();

        counter!("storefront_checkouts_total", "outcome" => "created").increment(1);
        histogram!("storefront_checkout_seconds").record(started.elapsed().as_secs_f64());
        info!(
            order_id = order.id,
            user_id,
            total = %order.total_price,
            tax = %order.tax_amount,
            "Checkout complete"
        );
        Ok(order)
    }

    /// Order with items and payment, visible to its owner only.
    pub async fn order_detail(
        &self,
        user_id: UserId,
        order_id: ModelId,
    ) -> Result<OrderDetail, StoreError> {
        self.storage
            .get_order_detail(order_id)
            .await?
            .filter(|detail| detail.order.user_id == user_id)
            .ok_or(StoreError::OrderNotFound { order_id })
    }

    /// Owner cancellation. Inventory held by the order is released.
    pub async fn cancel(&self, user_id: UserId, order_id: ModelId) -> Result<Order, StoreError> {
        self.owned_order(user_id, order_id).await?;
        self.storage
            .transition_order(order_id, OrderStatus::Cancelled)
            .await
    }

    pub async fn ship(&self, order_id: ModelId) -> Result<Order, StoreError> {
        self.storage
            .transition_order(order_id, OrderStatus::Shipped)
            .await
    }

    pub async fn deliver(&self, order_id: ModelId) -> Result<Order, StoreError> {
        self.storage
            .transition_order(order_id, OrderStatus::Delivered)
            .await
    }

    async fn owned_order(&self, user_id: UserId, order_id: ModelId) -> Result<Order, StoreError> {
        self.storage
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or(StoreError::OrderNotFound { order_id })
    }
}
