use crate::error::StoreError;
use crate::model::*;
use crate::storage::{StoreStorage, create_schema};
use crate::storage_model::{order, order_item, payment, product, tax_rate};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection,
    DatabaseTransaction, EntityTrait, NotSet, QueryFilter, QueryOrder, Set, SqlErr,
    TransactionTrait,
};
use tracing::{debug, error, info, warn};

fn minor(amount: Decimal) -> Result<i64, StoreError> {
    to_minor_units(amount).ok_or_else(|| StoreError::InvalidAmount(amount.to_string()))
}

/// SeaORM-backed store. Postgres in production, SQLite in tests.
#[derive(Clone)]
pub struct ProdStoreStorage {
    pub db: DatabaseConnection,
}

impl ProdStoreStorage {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let mut options = ConnectOptions::new(database_url.to_string());
        if database_url.starts_with("sqlite") {
            // An in-memory SQLite database lives and dies with its connection
            options.max_connections(1).min_connections(1);
        }
        options.sqlx_logging(false);

        let db = Database::connect(options).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create_schema(&self) -> Result<(), StoreError> {
        create_schema(&self.db).await?;
        Ok(())
    }

    pub async fn insert_product(
        &self,
        name: &str,
        description: &str,
        price: Decimal,
        inventory: i32,
    ) -> Result<Product, StoreError> {
        let product = product::ActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            description: Set(description.to_string()),
            price_minor: Set(minor(price)?),
            inventory: Set(inventory),
            created_at: Set(chrono::Utc::now().naive_utc()),
        }
        .insert(&self.db)
        .await?;

        debug!(product_id = product.id, "Inserted product {}", name);
        Ok(product.into())
    }

    /// Fails while order items still reference the product.
    pub async fn delete_product(&self, product_id: ModelId) -> Result<(), StoreError> {
        product::Entity::delete_by_id(product_id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Rates are stored in basis points, so at most four decimal places.
    pub async fn set_tax_rate(&self, region: &str, rate: Decimal) -> Result<(), StoreError> {
        if rate.is_sign_negative() || rate.normalize().scale() > 4 {
            return Err(StoreError::InvalidAmount(rate.to_string()));
        }
        let rate_bps = (rate * Decimal::from(10_000))
            .to_i32()
            .ok_or_else(|| StoreError::InvalidAmount(rate.to_string()))?;

        let existing = tax_rate::Entity::find()
            .filter(tax_rate::Column::Region.eq(region))
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let mut active: tax_rate::ActiveModel = model.into();
                active.rate_bps = Set(rate_bps);
                active.update(&self.db).await?;
            }
            None => {
                tax_rate::ActiveModel {
                    id: NotSet,
                    region: Set(region.to_string()),
                    rate_bps: Set(rate_bps),
                }
                .insert(&self.db)
                .await?;
            }
        }
        info!(region, %rate, "Tax rate set");
        Ok(())
    }

    async fn payment_exists(txn: &DatabaseTransaction, order_id: ModelId) -> Result<bool, StoreError> {
        let existing = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(txn)
            .await?;
        Ok(existing.is_some())
    }

    /// Conditional decrement, so the counter can never go below zero even
    /// when two checkouts race on the same product.
    async fn reserve_inventory(
        txn: &DatabaseTransaction,
        line: &OrderLine,
    ) -> Result<(), StoreError> {
        if line.quantity <= 0 {
            return Err(StoreError::InvalidAmount(format!(
                "quantity {} for product {}",
                line.quantity, line.product_id
            )));
        }

        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Inventory,
                Expr::col(product::Column::Inventory).sub(line.quantity),
            )
            .filter(product::Column::Id.eq(line.product_id))
            .filter(product::Column::Inventory.gte(line.quantity))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            let exists = product::Entity::find_by_id(line.product_id)
                .one(txn)
                .await?
                .is_some();
            return Err(if exists {
                StoreError::InsufficientInventory {
                    product_id: line.product_id,
                }
            } else {
                StoreError::ProductNotFound {
                    product_id: line.product_id,
                }
            });
        }
        Ok(())
    }

    async fn write_order(
        txn: &DatabaseTransaction,
        new_order: &NewOrder,
    ) -> Result<order::Model, StoreError> {
        let order = order::ActiveModel {
            id: NotSet,
            user_id: Set(new_order.user_id),
            region: Set(new_order.region.clone()),
            total_price_minor: Set(minor(new_order.total_price)?),
            tax_amount_minor: Set(minor(new_order.tax_amount)?),
            status: Set(OrderStatus::Pending),
            payment_session_id: Set(None),
            created_at: Set(chrono::Utc::now().naive_utc()),
        }
        .insert(txn)
        .await?;

        for line in &new_order.lines {
            Self::reserve_inventory(txn, line).await?;

            order_item::ActiveModel {
                id: NotSet,
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                price_minor: Set(minor(line.unit_price)?),
            }
            .insert(txn)
            .await?;
        }

        Ok(order)
    }
}

#[async_trait]
impl StoreStorage for ProdStoreStorage {
    async fn get_product(&self, product_id: ModelId) -> Result<Option<Product>, StoreError> {
        let product = product::Entity::find_by_id(product_id)
            .one(&self.db)
            .await?;
        Ok(product.map(Product::from))
    }

    async fn get_products(&self, product_ids: &[ModelId]) -> Result<Vec<Product>, StoreError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let products = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.to_vec()))
            .order_by_asc(product::Column::Id)
            .all(&self.db)
            .await?;
        Ok(products.into_iter().map(Product::from).collect())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let products = product::Entity::find()
            .order_by_asc(product::Column::Id)
            .all(&self.db)
            .await?;
        Ok(products.into_iter().map(Product::from).collect())
    }

    async fn find_tax_rate(&self, region: &str) -> Result<Option<Decimal>, StoreError> {
        let rate = tax_rate::Entity::find()
            .filter(tax_rate::Column::Region.eq(region))
            .one(&self.db)
            .await?;
        Ok(rate.map(|r| Decimal::new(i64::from(r.rate_bps), 4)))
    }

    async fn place_order(&self, new_order: &NewOrder) -> Result<Order, StoreError> {
        let txn = self.db.begin().await?;

        match Self::write_order(&txn, new_order).await {
            Ok(order) => {
                txn.commit().await?;
                info!(
                    order_id = order.id,
                    user_id = new_order.user_id,
                    items = new_order.lines.len(),
                    "Created order"
                );
                Ok(order.into())
            }
            Err(e) => {
                warn!(user_id = new_order.user_id, error = %e, "Rolling back checkout");
                txn.rollback().await?;
                Err(e)
            }
        }
    }

    async fn get_order(&self, order_id: ModelId) -> Result<Option<Order>, StoreError> {
        let order = order::Entity::find_by_id(order_id).one(&self.db).await?;
        Ok(order.map(Order::from))
    }

    async fn get_order_detail(&self, order_id: ModelId) -> Result<Option<OrderDetail>, StoreError> {
        let Some(order) = order::Entity::find_by_id(order_id).one(&self.db).await? else {
            return Ok(None);
        };

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::Id)
            .all(&self.db)
            .await?;

        let payment = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&self.db)
            .await?;

        Ok(Some(OrderDetail {
            order: order.into(),
            items: items.into_iter().map(OrderItem::from).collect(),
            payment: payment.map(Payment::from),
        }))
    }

    async fn set_payment_session(
        &self,
        order_id: ModelId,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::PaymentSessionId,
                Expr::value(session_id.to_string()),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return match self.get_order(order_id).await? {
                None => Err(StoreError::OrderNotFound { order_id }),
                Some(order) => Err(StoreError::OrderNotPayable {
                    order_id,
                    status: order.status,
                }),
            };
        }

        debug!(order_id, session_id, "Stored payment session reference");
        Ok(())
    }

    async fn record_payment(
        &self,
        order_id: ModelId,
        charge_id: &str,
        amount: Decimal,
    ) -> Result<PaymentRecordOutcome, StoreError> {
        let amount_minor = minor(amount)?;
        let txn = self.db.begin().await?;

        if Self::payment_exists(&txn, order_id).await? {
            txn.rollback().await?;
            return Ok(PaymentRecordOutcome::AlreadyRecorded);
        }

        // Compare-and-swap on the status column
        let swapped = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Processing))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&txn)
            .await?;

        if swapped.rows_affected == 0 {
            let current = order::Entity::find_by_id(order_id).one(&txn).await?;
            let already_paid = Self::payment_exists(&txn, order_id).await?;
            txn.rollback().await?;

            return match current {
                None => Err(StoreError::OrderNotFound { order_id }),
                Some(_) if already_paid => Ok(PaymentRecordOutcome::AlreadyRecorded),
                Some(order) => Ok(PaymentRecordOutcome::NotPayable(order.status)),
            };
        }

        let inserted = payment::ActiveModel {
            id: NotSet,
            order_id: Set(order_id),
            charge_id: Set(charge_id.to_string()),
            amount_minor: Set(amount_minor),
            status: Set(PaymentStatus::Succeeded),
            created_at: Set(chrono::Utc::now().naive_utc()),
        }
        .insert(&txn)
        .await;

        match inserted {
            Ok(payment) => {
                txn.commit().await?;
                info!(order_id, payment_id = payment.id, charge_id, "Recorded payment");
                Ok(PaymentRecordOutcome::Recorded)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await?;
                debug!(order_id, "Payment written concurrently by another delivery");
                Ok(PaymentRecordOutcome::AlreadyRecorded)
            }
            Err(e) => {
                error!(order_id, error = %e, "Failed to write payment");
                txn.rollback().await?;
                Err(e.into())
            }
        }
    }

    async fn transition_order(
        &self,
        order_id: ModelId,
        next: OrderStatus,
    ) -> Result<Order, StoreError> {
        let txn = self.db.begin().await?;

        let Some(current) = order::Entity::find_by_id(order_id).one(&txn).await? else {
            txn.rollback().await?;
            return Err(StoreError::OrderNotFound { order_id });
        };

        let invalid = StoreError::InvalidTransition {
            order_id,
            from: current.status,
            to: next,
        };
        if !current.status.can_transition_to(next) {
            txn.rollback().await?;
            return Err(invalid);
        }

        let swapped = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(next))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.status))
            .exec(&txn)
            .await?;
        if swapped.rows_affected == 0 {
            txn.rollback().await?;
            return Err(invalid);
        }

        if next == OrderStatus::Cancelled {
            let items = order_item::Entity::find()
                .filter(order_item::Column::OrderId.eq(order_id))
                .all(&txn)
                .await?;
            for item in items {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::Inventory,
                        Expr::col(product::Column::Inventory).add(item.quantity),
                    )
                    .filter(product::Column::Id.eq(item.product_id))
                    .exec(&txn)
                    .await?;
            }
        }

        let updated = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or(StoreError::OrderNotFound { order_id })?;
        txn.commit().await?;

        info!(order_id, from = %current.status, to = %next, "Order status changed");
        Ok(updated.into())
    }
}
