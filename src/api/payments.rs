//! Payment intent and processor webhook routes.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ApiJson;
use super::AppState;
use crate::auth::AuthUser;
use crate::payments::signature::SIGNATURE_HEADER;
use crate::payments::{payable_amount, CreateIntentRequest, IntentHandle};
use crate::reconciler::WebhookReconciler;
use crate::{Result, StoreError};

pub async fn create_intent(user: AuthUser, State(state): State<AppState>, ApiJson(request): ApiJson<CreateIntentRequest>) -> Result<Json<IntentHandle>> {
    let bridge = state.payments.as_ref().ok_or(StoreError::PaymentsDisabled)?;
    if request.amount <= Decimal::ZERO { return Err(StoreError::InvalidAmount); }
    let order = state.ledger.get(&user, request.order_id).await?;
    let amount = payable_amount(&order, &request)?;
    Ok(Json(bridge.create_intent(&order, &user.user_id, &amount).await?))
}

/// Answers 200 for every verified delivery, including ignored ones.
pub async fn webhook(State(reconciler): State<Option<Arc<WebhookReconciler>>>, headers: HeaderMap, body: Bytes) -> Result<Json<Value>> {
    let reconciler = reconciler.ok_or(StoreError::PaymentsDisabled)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| StoreError::InvalidSignature("missing signature header".into()))?;
    let outcome = reconciler.handle(&body, signature).await?;
    tracing::info!(outcome = outcome.label(), "webhook processed");
    Ok(Json(json!({ "received": true })))
}
