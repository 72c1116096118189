#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{Router, body::Body, response::Response};
use common::test_helpers::get_test_in_memory_database_url;
use http_body_util::BodyExt;
use mockall::mock;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;

use storefront::{
    cart::Cart,
    error::StoreError,
    gateway::{CheckoutSession, CheckoutSessionRequest, PaymentGateway, PaymentService, WebhookVerifier},
    model::{ModelId, Order, Product, UserId},
    reconciler::Reconciler,
    routes::{AppState, build_router},
    session::SessionStore,
    storage::{ProdStoreStorage, StoreStorage},
    storage_model::{order, payment},
    tax::TaxPolicy,
    workflow::OrderWorkflow,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const USER: UserId = 42;
pub const OTHER_USER: UserId = 7;

mock! {
    pub Gateway {}

    #[async_trait]
    impl PaymentGateway for Gateway {
        async fn create_session(
            &self,
            request: &CheckoutSessionRequest,
        ) -> Result<CheckoutSession, StoreError>;
    }
}

/// Gateway mock that hands out a session for every request.
pub fn accepting_gateway() -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_create_session().returning(|request| {
        Ok(CheckoutSession {
            id: format!("cs_test_{}", request.order_id),
            url: format!("https://checkout.test/pay/cs_test_{}", request.order_id),
        })
    });
    gateway
}

pub fn failing_gateway() -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway
        .expect_create_session()
        .returning(|_| Err(StoreError::GatewayUnavailable("connection refused".to_string())));
    gateway
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal literal")
}

/// Fresh private in-memory database with the schema applied.
pub async fn setup_storage() -> Arc<ProdStoreStorage> {
    let storage = ProdStoreStorage::new(&get_test_in_memory_database_url())
        .await
        .expect("Failed to open in-memory database");
    storage
        .create_schema()
        .await
        .expect("Failed to create schema");
    Arc::new(storage)
}

pub fn workflow(storage: &Arc<ProdStoreStorage>) -> OrderWorkflow {
    OrderWorkflow::new(storage.clone(), TaxPolicy::default())
}

pub fn reconciler(storage: &Arc<ProdStoreStorage>) -> Reconciler {
    Reconciler::new(storage.clone(), WebhookVerifier::new(WEBHOOK_SECRET))
}

/// Product A (10.00, stock 5) and product B (5.00, stock 3).
pub async fn seed_catalog(storage: &ProdStoreStorage) -> (Product, Product) {
    let a = storage
        .insert_product("Product A", "first", dec("10.00"), 5)
        .await
        .expect("insert product A");
    let b = storage
        .insert_product("Product B", "second", dec("5.00"), 3)
        .await
        .expect("insert product B");
    (a, b)
}

/// Checks out 2 x A + 1 x B for [`USER`] at the default rate.
pub async fn place_scenario_order(storage: &Arc<ProdStoreStorage>) -> (Order, Product, Product) {
    let (a, b) = seed_catalog(storage).await;
    let workflow = workflow(storage);
    let mut cart = Cart::new();
    cart.add(&a).expect("add A");
    cart.add(&a).expect("add A");
    cart.add(&b).expect("add B");
    let order = workflow
        .checkout(USER, &mut cart, None)
        .await
        .expect("checkout");
    (order, a, b)
}

pub async fn inventory_of(storage: &ProdStoreStorage, product_id: ModelId) -> i32 {
    storage
        .get_product(product_id)
        .await
        .expect("load product")
        .map(|p| p.inventory)
        .unwrap_or(-1)
}

pub async fn order_count(storage: &ProdStoreStorage) -> u64 {
    order::Entity::find()
        .count(&storage.db)
        .await
        .expect("count orders")
}

pub async fn payment_count(storage: &ProdStoreStorage, order_id: ModelId) -> u64 {
    payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .count(&storage.db)
        .await
        .expect("count payments")
}

pub fn sign(payload: &[u8]) -> String {
    WebhookVerifier::new(WEBHOOK_SECRET)
        .sign(payload)
        .expect("sign payload")
}

pub fn completion_event(reference: &str, charge_id: &str, amount_minor: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "client_reference_id": reference,
                "payment_intent": charge_id,
                "amount_total": amount_minor,
            }
        }
    }))
    .expect("serialize event")
}

pub fn event_of_type(event_type: &str, reference: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": event_type,
        "data": { "object": { "client_reference_id": reference } }
    }))
    .expect("serialize event")
}

pub fn create_test_app(storage: &Arc<ProdStoreStorage>, gateway: MockGateway) -> Router {
    let state = AppState::new(
        workflow(storage),
        PaymentService::new(storage.clone(), Arc::new(gateway)),
        reconciler(storage),
        SessionStore::new(),
    );
    build_router(state)
}

pub async fn response_body_string(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn response_json(response: Response<Body>) -> serde_json::Value {
    let body = response_body_string(response).await;
    serde_json::from_str(&body).expect("json body")
}

/// `name=value` part of a `Set-Cookie` header, ready to send back.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(axum::http::header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|pair| pair.trim().to_string())
}
