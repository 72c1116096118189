use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage_model::{order, order_item, payment, product};

pub type ModelId = i32;
pub type UserId = i64;

/// Number of decimal places every stored amount carries.
pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl OrderStatus {
    /// Statuses an order may move to from `self`.
    pub fn successors(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Processing, OrderStatus::Cancelled],
            OrderStatus::Processing => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.successors().contains(&next)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
}

// Money helpers. Amounts are `Decimal` in the domain and integer minor
// units (cents) in storage and on the gateway wire.

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}

pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (round_money(amount) * Decimal::ONE_HUNDRED).to_i64()
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MONEY_SCALE)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: ModelId,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub inventory: i32,
}

impl From<product::Model> for Product {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            price: from_minor_units(model.price_minor),
            inventory: model.inventory,
        }
    }
}

/// A resolved cart line ready to be written as an order item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub product_id: ModelId,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Everything the store needs to persist a checkout atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub region: String,
    pub total_price: Decimal,
    pub tax_amount: Decimal,
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: ModelId,
    pub user_id: UserId,
    pub region: String,
    pub total_price: Decimal,
    pub tax_amount: Decimal,
    pub status: OrderStatus,
    pub payment_session_id: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

impl Order {
    /// Amount charged through the gateway.
    pub fn payable_amount(&self) -> Decimal {
        self.total_price + self.tax_amount
    }
}

impl From<order::Model> for Order {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            region: model.region,
            total_price: from_minor_units(model.total_price_minor),
            tax_amount: from_minor_units(model.tax_amount_minor),
            status: model.status,
            payment_session_id: model.payment_session_id,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItem {
    pub id: ModelId,
    pub product_id: ModelId,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
}

impl From<order_item::Model> for OrderItem {
    fn from(model: order_item::Model) -> Self {
        let price = from_minor_units(model.price_minor);
        Self {
            id: model.id,
            product_id: model.product_id,
            quantity: model.quantity,
            price,
            total: price * Decimal::from(model.quantity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: ModelId,
    pub order_id: ModelId,
    pub charge_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub created_at: chrono::NaiveDateTime,
}

impl From<payment::Model> for Payment {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            charge_id: model.charge_id,
            amount: from_minor_units(model.amount_minor),
            status: model.status,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payment: Option<Payment>,
}

/// Result of applying a completed-checkout notification to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRecordOutcome {
    /// Order moved to PROCESSING and a payment was written
    Recorded,
    /// A payment was already on file for the order
    AlreadyRecorded,
    /// Order is in a status that does not accept payments
    NotPayable(OrderStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn minor_units_conversion() {
        let amount = Decimal::from_str("27.00").unwrap();
        assert_eq!(to_minor_units(amount), Some(2700));
        assert_eq!(from_minor_units(2700), amount);
        assert_eq!(to_minor_units(Decimal::from_str("0.125").unwrap()), Some(12));
        assert_eq!(to_minor_units(Decimal::from_str("0.135").unwrap()), Some(14));
    }

    #[test]
    fn order_status_state_machine() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn status_serializes_in_upper_case() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Processing).unwrap(),
            "\"PROCESSING\""
        );
    }
}
