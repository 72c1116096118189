use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::model::{ModelId, Product};
use crate::storage::StoreStorage;

/// Session-scoped product id -> quantity map. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    items: BTreeMap<ModelId, i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub product_id: ModelId,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub total_price: Decimal,
    pub warnings: Vec<String>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit of `product`. The stock check is advisory, checkout
    /// re-checks inside its transaction.
    pub fn add(&mut self, product: &Product) -> Result<i32, StoreError> {
        if product.inventory <= 0 {
            return Err(StoreError::OutOfStock {
                product_id: product.id,
                name: product.name.clone(),
            });
        }
        let quantity = self.items.entry(product.id).or_insert(0);
        *quantity += 1;
        Ok(*quantity)
    }

    /// Returns whether the product was in the cart.
    pub fn remove(&mut self, product_id: ModelId) -> bool {
        self.items.remove(&product_id).is_some()
    }

    pub fn quantity(&self, product_id: ModelId) -> i32 {
        self.items.get(&product_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn product_ids(&self) -> Vec<ModelId> {
        self.items.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelId, i32)> + '_ {
        self.items.iter().map(|(id, qty)| (*id, *qty))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Take out the quantities of a cart that was checked out. Units added
    /// while that checkout was running stay in the cart.
    pub fn settle(&mut self, purchased: &Cart) {
        for (product_id, bought) in purchased.iter() {
            if let Some(quantity) = self.items.get_mut(&product_id) {
                *quantity -= bought;
                if *quantity <= 0 {
                    self.items.remove(&product_id);
                }
            }
        }
    }

    /// Join the cart against live product prices. Products that no longer
    /// resolve are skipped with a warning.
    pub async fn contents(&self, storage: &dyn StoreStorage) -> Result<CartView, StoreError> {
        let products: HashMap<ModelId, Product> = storage
            .get_products(&self.product_ids())
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(self.items.len());
        let mut warnings = Vec::new();
        for (product_id, quantity) in self.iter() {
            match products.get(&product_id) {
                Some(product) => lines.push(CartLine {
                    product_id,
                    name: product.name.clone(),
                    quantity,
                    unit_price: product.price,
                    total: product.price * Decimal::from(quantity),
                }),
                None => {
                    warn!(product_id, "Cart references a product that no longer exists");
                    warnings.push(format!("Product {} is no longer available", product_id));
                }
            }
        }

        let total_price = lines.iter().map(|line| line.total).sum();
        Ok(CartView {
            lines,
            total_price,
            warnings,
        })
    }
}
