//! End-to-end checkout against the in-memory stores through the HTTP router.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower::ServiceExt;

use storefront::api::{router, AppState};
use storefront::auth::{Authenticator, Role, AUTH_COOKIE};
use storefront::domain::aggregates::Product;
use storefront::ledger::OrderLedger;
use storefront::domain::events::OrderEvent;
use storefront::notify::{EventPublisher, PublishError};
use storefront::payments::signature::{self, SIGNATURE_HEADER};
use storefront::payments::{IntentHandle, IntentRequest, PaymentBridge, PaymentProcessor};
use storefront::reconciler::WebhookReconciler;
use storefront::store::{MemoryCatalog, MemoryOrderStore};
use storefront::tracking::TrackingReader;

const JWT_SECRET: &str = "integration-secret";
const WEBHOOK_SECRET: &str = "whsec_integration";

/// Returns one intent per idempotency key, as the processor does.
#[derive(Default)]
struct FakeProcessor { requests: Mutex<Vec<IntentRequest>>, intents: Mutex<HashMap<String, IntentHandle>> }

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_payment_intent(&self, request: &IntentRequest) -> storefront::Result<IntentHandle> {
        self.requests.lock().await.push(request.clone());
        let mut intents = self.intents.lock().await;
        let id = format!("pi_test_{}", intents.len() + 1);
        let handle = intents
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| IntentHandle { client_secret: format!("{}_secret", id), payment_intent_id: id });
        Ok(handle.clone())
    }
}

#[derive(Default)]
struct RecordingPublisher { published: Mutex<Vec<OrderEvent>> }

impl RecordingPublisher {
    async fn take_published(&self) -> Vec<OrderEvent> { std::mem::take(&mut *self.published.lock().await) }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        self.published.lock().await.push(event.clone());
        Ok(())
    }
}

struct Harness { app: Router, auth: Arc<Authenticator>, processor: Arc<FakeProcessor>, publisher: Arc<RecordingPublisher> }

async fn harness() -> Harness {
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.upsert_product(Product::new("p1", "Jamdani Saree", Decimal::new(2500, 2))).await;
    let store = Arc::new(MemoryOrderStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let ledger = Arc::new(OrderLedger::new(catalog.clone(), store.clone(), publisher.clone(), "usd"));
    let processor = Arc::new(FakeProcessor::default());
    let auth = Arc::new(Authenticator::new(Some(JWT_SECRET.into())));
    let state = AppState {
        ledger: ledger.clone(),
        tracking: Arc::new(TrackingReader::new(store, catalog)),
        auth: auth.clone(),
        payments: Some(Arc::new(PaymentBridge::new(processor.clone(), Duration::from_secs(5)))),
        reconciler: Some(Arc::new(WebhookReconciler::new(ledger, WEBHOOK_SECRET, 300))),
    };
    Harness { app: router(state), auth, processor, publisher }
}

impl Harness {
    fn token(&self, user_id: &str, role: Role) -> String { self.auth.issue(user_id, &format!("{}@example.com", user_id), role).unwrap() }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap_or(Value::Null) };
        (status, json)
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("{}={}", AUTH_COOKIE, token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    async fn webhook(&self, payload: &Value, secret: &str) -> (StatusCode, Value) {
        let raw = payload.to_string();
        let signed = signature::sign(raw.as_bytes(), secret, Utc::now().timestamp());
        let request = Request::builder()
            .method("POST")
            .uri("/api/payments/webhook")
            .header(SIGNATURE_HEADER, signed)
            .body(Body::from(raw))
            .unwrap();
        self.send(request).await
    }
}

fn checkout_body(items: Value) -> Value {
    json!({
        "items": items,
        "shippingAddress": {
            "fullName": "Tahmina Akter", "phone": "01711223344", "address": "House 9, Road 2",
            "city": "Dhaka", "postalCode": "1205", "country": "Bangladesh"
        },
        "paymentMethod": "STRIPE"
    })
}

fn succeeded_event(intent: &str, order_id: &str) -> Value {
    json!({
        "id": format!("evt_{}", intent),
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": intent, "amount": 5000, "currency": "usd", "metadata": { "order_id": order_id } } }
    })
}

#[tokio::test]
async fn test_checkout_pay_and_track() {
    let h = harness().await;
    let customer = h.token("u1", Role::Customer);

    let (status, order) = h.call("POST", "/api/orders", Some(&customer), Some(checkout_body(json!([{ "productId": "p1", "quantity": 2 }])))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["totalAmount"], json!(50.0));
    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["paymentStatus"], "PENDING");
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, intent) = h
        .call("POST", "/api/payments/create-intent", Some(&customer), Some(json!({ "orderId": order_id, "amount": 50.0 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(intent["paymentIntentId"], "pi_test_1");
    assert_eq!(intent["clientSecret"], "pi_test_1_secret");
    // asking again for the same attempt gives back the same intent
    let (_, again) = h
        .call("POST", "/api/payments/create-intent", Some(&customer), Some(json!({ "orderId": order_id, "amount": 50.0 })))
        .await;
    assert_eq!(again, intent);
    let sent = h.processor.requests.lock().await[0].clone();
    assert_eq!(sent.amount_minor, 5000);
    assert!(sent.metadata.contains(&("order_id".to_string(), order_id.clone())));

    // creating the intent alone does not change the order
    let (_, unchanged) = h.call("GET", &format!("/api/orders/{}", order_id), Some(&customer), None).await;
    assert_eq!(unchanged["paymentStatus"], "PENDING");

    let (status, ack) = h.webhook(&succeeded_event("pi_test_1", &order_id), WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({ "received": true }));

    let (_, paid) = h.call("GET", &format!("/api/orders/{}", order_id), Some(&customer), None).await;
    assert_eq!(paid["status"], "CONFIRMED");
    assert_eq!(paid["paymentStatus"], "PAID");
    assert_eq!(paid["paymentIntentId"], "pi_test_1");

    // redelivery is acknowledged and changes nothing
    let (status, _) = h.webhook(&succeeded_event("pi_test_1", &order_id), WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    let confirmed = h.publisher.take_published().await.iter().filter(|e| e.kind() == "payment_confirmed").count();
    assert_eq!(confirmed, 1);

    let (status, view) = h.call("GET", &format!("/api/track/{}", order_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["timelinePosition"], 1);
    assert_eq!(view["status"], "CONFIRMED");
}

#[tokio::test]
async fn test_forged_webhook_is_rejected() {
    let h = harness().await;
    let customer = h.token("u1", Role::Customer);
    let (_, order) = h.call("POST", "/api/orders", Some(&customer), Some(checkout_body(json!([{ "productId": "p1", "quantity": 1 }])))).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, body) = h.webhook(&succeeded_event("pi_forged", &order_id), "whsec_attacker").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, after) = h.call("GET", &format!("/api/orders/{}", order_id), Some(&customer), None).await;
    assert_eq!(after["paymentStatus"], "PENDING");
}

#[tokio::test]
async fn test_access_control() {
    let h = harness().await;
    let owner = h.token("u1", Role::Customer);
    let other = h.token("u2", Role::Customer);
    let admin = h.token("boss", Role::Admin);

    let (status, _) = h.call("POST", "/api/orders", None, Some(checkout_body(json!([{ "productId": "p1", "quantity": 1 }])))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, order) = h.call("POST", "/api/orders", Some(&owner), Some(checkout_body(json!([{ "productId": "p1", "quantity": 1 }])))).await;
    let uri = format!("/api/orders/{}", order["id"].as_str().unwrap());

    assert_eq!(h.call("GET", &uri, Some(&other), None).await.0, StatusCode::FORBIDDEN);
    assert_eq!(h.call("GET", &uri, Some(&admin), None).await.0, StatusCode::OK);

    let patch = json!({ "status": "SHIPPED", "trackingNumber": "DHK-778" });
    assert_eq!(h.call("PATCH", &uri, Some(&owner), Some(patch.clone())).await.0, StatusCode::FORBIDDEN);
    let (status, patched) = h.call("PATCH", &uri, Some(&admin), Some(patch)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["status"], "SHIPPED");

    let (status, view) = h.call("GET", "/api/track/DHK-778", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["trackingNumber"], "DHK-778");

    let (status, _) = h.call("PATCH", &uri, Some(&admin), Some(json!({ "status": "PENDING" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, page) = h.call("GET", "/api/orders?page=1&limit=5", Some(&other), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_checkout_validation() {
    let h = harness().await;
    let customer = h.token("u1", Role::Customer);

    let (status, body) = h.call("POST", "/api/orders", Some(&customer), Some(checkout_body(json!([])))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cart is empty");

    let (status, _) = h.call("POST", "/api/orders", Some(&customer), Some(checkout_body(json!([{ "productId": "ghost", "quantity": 1 }])))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h.call("POST", "/api/orders", Some(&customer), Some(json!({ "items": "not a list" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mixed = checkout_body(json!([{ "productId": "p1", "quantity": 1 }, { "productId": "ghost", "quantity": 1 }]));
    let (status, body) = h.call("POST", "/api/orders", Some(&customer), Some(mixed)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Product ghost not found");

    // none of the rejected checkouts left an order behind
    let (_, page) = h.call("GET", "/api/orders", Some(&customer), None).await;
    assert_eq!(page["pagination"]["total"], 0);
    assert!(h.publisher.take_published().await.is_empty());

    let (_, order) = h.call("POST", "/api/orders", Some(&customer), Some(checkout_body(json!([{ "productId": "p1", "quantity": 2 }])))).await;
    let order_id = order["id"].as_str().unwrap();
    let (status, _) = h.call("POST", "/api/payments/create-intent", Some(&customer), Some(json!({ "orderId": order_id, "amount": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = h.call("POST", "/api/payments/create-intent", Some(&customer), Some(json!({ "orderId": order_id, "amount": 1.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = h.call("POST", "/api/payments/create-intent", Some(&customer), Some(json!({ "orderId": order_id, "amount": 1e28 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(h.processor.requests.lock().await.is_empty());

    let (status, _) = h.call("GET", "/api/track/unknown-code", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = h.call("GET", "/api/track/%FF", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
