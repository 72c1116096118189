use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;

use crate::model::{ModelId, OrderStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Your cart is empty")]
    EmptyCart,

    #[error("No valid products in cart")]
    InvalidProduct,

    #[error("Product {product_id} not found")]
    ProductNotFound { product_id: ModelId },

    #[error("{name} is out of stock")]
    OutOfStock { product_id: ModelId, name: String },

    #[error("Not enough inventory for product {product_id}")]
    InsufficientInventory { product_id: ModelId },

    #[error("Order {order_id} not found")]
    OrderNotFound { order_id: ModelId },

    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: ModelId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order {order_id} is {status} and cannot be paid")]
    OrderNotPayable {
        order_id: ModelId,
        status: OrderStatus,
    },

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown order {0}")]
    UnknownOrder(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl StoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::EmptyCart
            | StoreError::InvalidProduct
            | StoreError::OutOfStock { .. }
            | StoreError::InsufficientInventory { .. } => StatusCode::CONFLICT,
            StoreError::ProductNotFound { .. }
            | StoreError::OrderNotFound { .. }
            | StoreError::UnknownOrder(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidTransition { .. } | StoreError::OrderNotPayable { .. } => {
                StatusCode::CONFLICT
            }
            StoreError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            StoreError::InvalidSignature
            | StoreError::InvalidPayload(_)
            | StoreError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            StoreError::Unauthenticated => StatusCode::UNAUTHORIZED,
            StoreError::Config(_) | StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Do not leak storage details to clients
            StoreError::Database(_) | StoreError::Config(_) => "Internal error".to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}
