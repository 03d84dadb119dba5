//! Order Ledger routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiJson, ApiPath, ApiQuery};
use crate::auth::AuthUser;
use crate::domain::aggregates::{AdminPatch, Order};
use crate::ledger::{CreateOrderRequest, ListFilter, OrderLedger, OrderPage};
use crate::Result;

pub async fn create_order(
    user: AuthUser,
    State(ledger): State<Arc<OrderLedger>>,
    ApiJson(request): ApiJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = ledger.create(&user, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(user: AuthUser, State(ledger): State<Arc<OrderLedger>>, ApiQuery(filter): ApiQuery<ListFilter>) -> Result<Json<OrderPage>> {
    Ok(Json(ledger.list(&user, &filter).await?))
}

pub async fn get_order(user: AuthUser, State(ledger): State<Arc<OrderLedger>>, ApiPath(id): ApiPath<Uuid>) -> Result<Json<Order>> {
    Ok(Json(ledger.get(&user, id).await?))
}

pub async fn update_order(
    user: AuthUser,
    State(ledger): State<Arc<OrderLedger>>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(patch): ApiJson<AdminPatch>,
) -> Result<Json<Order>> {
    Ok(Json(ledger.update_admin_fields(&user, id, patch).await?))
}
