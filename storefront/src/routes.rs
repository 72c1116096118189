use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::gateway::{PaymentService, SIGNATURE_HEADER};
use crate::model::{ModelId, UserId};
use crate::reconciler::Reconciler;
use crate::session::{MessageLevel, SESSION_COOKIE, SessionStore};
use crate::workflow::OrderWorkflow;

/// Set by the upstream accounts service on authenticated requests.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub workflow: OrderWorkflow,
    pub payments: PaymentService,
    pub reconciler: Reconciler,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(
        workflow: OrderWorkflow,
        payments: PaymentService,
        reconciler: Reconciler,
        sessions: SessionStore,
    ) -> Self {
        Self {
            workflow,
            payments,
            reconciler,
            sessions,
        }
    }
}

/// Id of the visitor's session, resolved by [`session_middleware`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .map(AuthUser)
            .ok_or(StoreError::Unauthenticated)
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Attach a session to the request, creating one (and its cookie) for new
/// visitors.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let (id, created) = match cookie_value(request.headers(), SESSION_COOKIE) {
        Some(id) if state.sessions.touch(&id).await => (id, false),
        _ => (state.sessions.create().await, true),
    };
    request
        .extensions_mut()
        .insert(SessionHandle { id: id.clone() });

    let mut response = next.run(request).await;
    if created {
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// Message shown to the visitor for a failed action.
fn user_message(e: &StoreError) -> String {
    match e {
        StoreError::Database(_) | StoreError::Config(_) => {
            "Something went wrong, please try again".to_string()
        }
        other => other.to_string(),
    }
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}

pub async fn list_products(State(state): State<AppState>) -> Result<Response, StoreError> {
    let products = state.workflow.storage().list_products().await?;
    Ok(Json(products).into_response())
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<ModelId>,
) -> Result<Response, StoreError> {
    let product = state.workflow.lookup_product(product_id).await?;
    Ok(Json(product).into_response())
}

pub async fn view_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, StoreError> {
    let (cart, messages) = state
        .sessions
        .update(&session.id, |s| (s.cart.clone(), s.take_messages()))
        .await;
    let view = cart.contents(state.workflow.storage().as_ref()).await?;

    Ok(Json(json!({
        "items": view.lines,
        "total_price": view.total_price,
        "warnings": view.warnings,
        "messages": messages,
    }))
    .into_response())
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Path(product_id): Path<ModelId>,
) -> Response {
    match state.workflow.lookup_product(product_id).await {
        Ok(product) => {
            state
                .sessions
                .update(&session.id, |s| match s.cart.add(&product) {
                    Ok(quantity) => {
                        info!(product_id, quantity, "Added product to cart");
                        s.flash(
                            MessageLevel::Success,
                            format!("Added {} to your cart", product.name),
                        );
                    }
                    Err(e) => s.flash(MessageLevel::Error, e.to_string()),
                })
                .await;
        }
        Err(e) => {
            warn!(product_id, error = %e, "Could not add product to cart");
            state
                .sessions
                .update(&session.id, |s| s.flash(MessageLevel::Error, user_message(&e)))
                .await;
        }
    }
    Redirect::to("/cart").into_response()
}

pub async fn remove_from_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Path(product_id): Path<ModelId>,
) -> Response {
    state
        .sessions
        .update(&session.id, |s| {
            if s.cart.remove(product_id) {
                s.flash(MessageLevel::Success, "Item removed from cart");
            } else {
                s.flash(MessageLevel::Warning, "Item was not in your cart");
            }
        })
        .await;
    Redirect::to("/cart").into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutParams {
    pub region: Option<String>,
}

pub async fn checkout(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<CheckoutParams>,
) -> Response {
    let snapshot = state.sessions.load(&session.id).await.cart;
    let mut working = snapshot.clone();

    match state
        .workflow
        .checkout(user_id, &mut working, params.region.as_deref())
        .await
    {
        Ok(order) => {
            state
                .sessions
                .update(&session.id, |s| {
                    s.cart.settle(&snapshot);
                    s.flash(MessageLevel::Success, format!("Order {} placed", order.id));
                })
                .await;
            (StatusCode::OK, Json(order)).into_response()
        }
        Err(e) => {
            warn!(user_id, error = %e, "Checkout failed");
            state
                .sessions
                .update(&session.id, |s| s.flash(MessageLevel::Error, user_message(&e)))
                .await;
            Redirect::to("/cart").into_response()
        }
    }
}

pub async fn order_detail(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(order_id): Path<ModelId>,
) -> Result<Response, StoreError> {
    let detail = state.workflow.order_detail(user_id, order_id).await?;
    Ok(Json(detail).into_response())
}

pub async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(order_id): Path<ModelId>,
) -> Result<Response, StoreError> {
    let order = state.workflow.cancel(user_id, order_id).await?;
    Ok(Json(order).into_response())
}

pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    AuthUser(user_id): AuthUser,
    Path(order_id): Path<ModelId>,
) -> Result<Response, StoreError> {
    match state.payments.create_session(user_id, order_id).await {
        Ok(checkout) => Ok(Json(checkout).into_response()),
        Err(e @ StoreError::OrderNotFound { .. }) => Err(e),
        Err(e) => {
            warn!(order_id, error = %e, "Sending user back to the order");
            state
                .sessions
                .update(&session.id, |s| s.flash(MessageLevel::Error, user_message(&e)))
                .await;
            Ok(Redirect::to(&format!("/orders/{}", order_id)).into_response())
        }
    }
}

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.reconciler.handle(&body, signature).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(StoreError::UnknownOrder(reference)) => {
            // Acknowledged so the provider stops retrying
            error!(reference = %reference, "Acknowledged completion event for unknown order");
            (
                StatusCode::OK,
                Json(json!({ "outcome": "unknown_order", "reference": reference })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn payment_success() -> impl IntoResponse {
    Json(json!({ "status": "ok", "message": "Payment received, your order is being processed" }))
}

pub async fn payment_cancelled() -> impl IntoResponse {
    Json(json!({ "status": "cancelled", "message": "Payment was cancelled, your order is still pending" }))
}

pub fn build_router(state: AppState) -> Router {
    let browser = Router::new()
        .route("/cart", get(view_cart))
        .route("/cart/add/{product_id}", post(add_to_cart))
        .route("/cart/remove/{product_id}", post(remove_from_cart))
        .route("/orders/checkout", post(checkout))
        .route("/checkout-session/{order_id}", post(create_checkout_session))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/products", get(list_products))
        .route("/products/{product_id}", get(get_product))
        .route("/orders/success", get(payment_success))
        .route("/orders/cancel", get(payment_cancelled))
        .route("/orders/{order_id}", get(order_detail))
        .route("/orders/{order_id}/cancel", post(cancel_order))
        .route("/webhooks/payments", post(payment_webhook))
        .merge(browser)
        .with_state(state)
}
