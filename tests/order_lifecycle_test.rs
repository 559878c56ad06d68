//! End-to-end tests for order creation, visibility, and the fulfillment
//! state machine.

mod common;

use axum::http::Method;
use common::{address_payload, dec_field, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn create_order_happy_path() {
    let app = TestApp::new().await;

    let product_a = app.seed_product("Harbor Mug", dec!(10.00)).await;
    let product_b = app.seed_product("Tide Chart", dec!(5.00)).await;

    let payload = json!({
        "items": [
            { "product_id": product_a.id, "quantity": 2, "unit_price": "10.00" },
            { "product_id": product_b.id, "quantity": 1, "unit_price": "5.00" }
        ],
        "shipping_address": address_payload(),
        "payment_method": "card"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    let order = &body["data"];

    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(dec_field(&order["subtotal"]), dec!(25.00));
    assert_eq!(dec_field(&order["shipping_cost"]), dec!(0.00));
    assert_eq!(dec_field(&order["total_amount"]), dec!(25.00));
    assert_eq!(order["currency"], "USD");
    assert_eq!(order["items"].as_array().unwrap().len(), 2);
    assert!(order["order_number"]
        .as_str()
        .unwrap()
        .starts_with("ORD-"));
    assert!(order["shipping_address"]
        .as_str()
        .unwrap()
        .contains("12 Harbor Way"));
}

#[tokio::test]
async fn create_order_requires_items() {
    let app = TestApp::new().await;

    let payload = json!({
        "items": [],
        "shipping_address": address_payload(),
        "payment_method": "card"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn create_order_rejects_zero_quantity() {
    let app = TestApp::new().await;
    let product = app.seed_product("Harbor Mug", dec!(10.00)).await;

    let payload = json!({
        "items": [{ "product_id": product.id, "quantity": 0, "unit_price": "10.00" }],
        "shipping_address": address_payload(),
        "payment_method": "card"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn create_order_unknown_product_is_not_found() {
    let app = TestApp::new().await;

    let payload = json!({
        "items": [{ "product_id": Uuid::new_v4(), "quantity": 1, "unit_price": "10.00" }],
        "shipping_address": address_payload(),
        "payment_method": "card"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 404);

    // Nothing was persisted
    let list = app
        .request_authenticated(Method::GET, "/api/v1/orders", None)
        .await;
    let body = response_json(list).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn create_order_requires_authentication() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(json!({})), None)
        .await;
    assert_eq!(response.status(), 401);
}

async fn create_test_order(app: &TestApp) -> String {
    let product = app.seed_product("Harbor Mug", dec!(10.00)).await;

    let payload = json!({
        "items": [{ "product_id": product.id, "quantity": 1, "unit_price": "10.00" }],
        "shipping_address": address_payload(),
        "payment_method": "card"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    body["data"]["id"].as_str().expect("order id").to_string()
}

#[tokio::test]
async fn order_visibility_is_owner_or_admin() {
    let app = TestApp::new().await;
    let order_id = create_test_order(&app).await;

    // Owner sees the order
    let response = app
        .request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(response.status(), 200);

    // A different customer does not
    let stranger = app.token_for(Uuid::new_v4(), &["customer"]);
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{order_id}"),
            None,
            Some(&stranger),
        )
        .await;
    assert_eq!(response.status(), 403);

    // Admins see everything
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{order_id}"),
            None,
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), 200);

    // Unknown order is a 404 even for admins
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn list_orders_is_scoped_to_owner() {
    let app = TestApp::new().await;
    create_test_order(&app).await;

    let response = app
        .request_authenticated(Method::GET, "/api/v1/orders", None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 1);

    let stranger = app.token_for(Uuid::new_v4(), &["customer"]);
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&stranger))
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 0);

    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(app.admin_token()))
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn owner_may_only_cancel() {
    let app = TestApp::new().await;
    let order_id = create_test_order(&app).await;

    // Owner cannot force processing
    let response = app
        .request_authenticated(
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "processing" })),
        )
        .await;
    assert_eq!(response.status(), 403);

    // Owner can cancel an unpaid order
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/cancel"),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["payment_status"], "pending");
}

#[tokio::test]
async fn processing_requires_settled_payment() {
    let app = TestApp::new().await;
    let order_id = create_test_order(&app).await;

    // Even an admin cannot force processing while payment is pending
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "processing" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn terminal_orders_reject_transitions() {
    let app = TestApp::new().await;
    let order_id = create_test_order(&app).await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/cancel"),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);

    // Cancelled is terminal
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "completed" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), 409);

    // Cancelling again is an idempotent no-op
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/cancel"),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn unknown_status_is_rejected() {
    let app = TestApp::new().await;
    let order_id = create_test_order(&app).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "shipped-ish" })),
            Some(app.admin_token()),
        )
        .await;
    // Unknown enum variants are rejected at deserialization
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn admin_delete_is_privileged_cleanup() {
    let app = TestApp::new().await;
    let order_id = create_test_order(&app).await;

    // Customers cannot reach the admin surface
    let response = app
        .request_authenticated(
            Method::DELETE,
            &format!("/api/v1/admin/orders/{order_id}"),
            None,
        )
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/admin/orders/{order_id}"),
            None,
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), 200);

    let response = app
        .request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(response.status(), 404);

    // Deleting again is a 404
    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/admin/orders/{order_id}"),
            None,
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn order_can_reference_saved_address() {
    let app = TestApp::new().await;
    let product = app.seed_product("Harbor Mug", dec!(10.00)).await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/addresses",
            Some(address_payload()),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    let address_id = body["data"]["id"].as_str().unwrap().to_string();

    let payload = json!({
        "items": [{ "product_id": product.id, "quantity": 1, "unit_price": "10.00" }],
        "shipping_address_id": address_id,
        "payment_method": "card"
    });

    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["data"]["shipping_address_id"], address_id.as_str());

    // Someone else's address id is rejected
    let stranger = app.token_for(Uuid::new_v4(), &["customer"]);
    let payload = json!({
        "items": [{ "product_id": product.id, "quantity": 1, "unit_price": "10.00" }],
        "shipping_address_id": address_id,
        "payment_method": "card"
    });
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(payload), Some(&stranger))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn placed_order_keeps_address_snapshot() {
    let app = TestApp::new().await;
    let order_id = create_test_order(&app).await;

    // Fetch the address the order captured
    let response = app
        .request_authenticated(Method::GET, "/api/v1/addresses", None)
        .await;
    let body = response_json(response).await;
    let address_id = body["data"][0]["id"].as_str().unwrap().to_string();

    // Edit the address after the order was placed
    let mut updated = address_payload();
    updated["line1"] = json!("99 Relocated Street");
    let response = app
        .request_authenticated(
            Method::PUT,
            &format!("/api/v1/addresses/{address_id}"),
            Some(updated),
        )
        .await;
    assert_eq!(response.status(), 200);

    // The placed order still shows the original destination
    let response = app
        .request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    let body = response_json(response).await;
    let snapshot = body["data"]["shipping_address"].as_str().unwrap();
    assert!(snapshot.contains("12 Harbor Way"));
    assert!(!snapshot.contains("99 Relocated Street"));
}
