//! Checkout, order query and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::{Money, OrderId, UserId};
use domain::{DeliveryParameters, Order, OrderItem, OrderStore};
use saga::{Checkout, OrderSaga};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the client's checkout idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub saga: Arc<OrderSaga<dyn OrderStore>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub checkout_batch_id: Option<String>,
    #[serde(default)]
    pub delivery: Option<DeliveryParameters>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub user_id: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: i64,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub idempotency_key: Option<String>,
    pub checkout_batch_id: Option<String>,
    pub transaction_ref: Option<String>,
    pub shipment_id: Option<String>,
    pub tracking_number: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().as_i64(),
            status: order.status().to_string(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            total_cents: order.total_price().cents(),
            idempotency_key: order.idempotency_key().map(String::from),
            checkout_batch_id: order.checkout_batch_id().map(String::from),
            transaction_ref: order.transaction_ref().map(String::from),
            shipment_id: order.shipment_id().map(String::from),
            tracking_number: order.tracking_number().map(String::from),
            failure_reason: order.failure_reason().map(String::from),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: checks out a cart and starts its fulfillment saga.
#[tracing::instrument(skip(state, headers, req))]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id = user_id(&headers)?;

    let items = req
        .items
        .into_iter()
        .map(|item| {
            OrderItem::new(
                item.product_id,
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();

    let mut checkout = Checkout::new(user_id, items);
    if let Some(key) = header_value(&headers, IDEMPOTENCY_KEY_HEADER) {
        checkout = checkout.with_idempotency_key(key);
    }
    if let Some(batch_id) = req.checkout_batch_id {
        checkout = checkout.with_checkout_batch_id(batch_id);
    }
    if let Some(delivery) = req.delivery {
        checkout = checkout.with_delivery(delivery);
    }

    let order = state.saga.checkout(checkout).await?;
    metrics::counter!("api_checkouts_total").increment(1);
    tracing::info!(order_id = %order.id(), %user_id, "Checkout accepted");

    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id}: returns an order to its owner.
#[tracing::instrument(skip(state, headers))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let order_id = parse_order_id(&id)?;

    let order = state.saga.get_order(order_id).await?;
    if !order.is_owned_by(user_id) {
        return Err(ApiError::Forbidden(format!(
            "User {user_id} does not own order {order_id}"
        )));
    }

    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders?user_id=: lists a user's orders, newest first.
#[tracing::instrument(skip(state, query), fields(user_id = query.user_id))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.saga.orders_for_user(UserId::new(query.user_id)).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// POST /orders/{id}/cancel: cancels an order and starts its compensation.
///
/// The body is optional; when present it may carry a `reason`.
#[tracing::instrument(skip(state, headers, body))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<OrderResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let order_id = parse_order_id(&id)?;

    let req: CancelRequest = if body.is_empty() {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let order = state
        .saga
        .cancel(order_id, user_id, req.reason.as_deref())
        .await?;
    metrics::counter!("api_cancellations_total").increment(1);

    Ok(Json(OrderResponse::from(&order)))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn user_id(headers: &HeaderMap) -> Result<UserId, ApiError> {
    header_value(headers, USER_ID_HEADER)
        .and_then(|v| v.parse::<i64>().ok())
        .map(UserId::new)
        .ok_or_else(|| ApiError::BadRequest("Missing or invalid X-User-Id header".to_string()))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
