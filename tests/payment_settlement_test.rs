//! End-to-end tests for payment intent creation and signature-verified
//! settlement, including idempotency and the concurrent-settlement race.

mod common;

use axum::http::Method;
use common::{address_payload, response_json, TestApp, TEST_WEBHOOK_SECRET};
use orderflow_api::{errors::ServiceError, services::payments::{sign_callback, PaymentCallback}};
use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Spin up an app pointed at a wiremock payment processor and place a
/// reference order: 2 x 10.00 + 1 x 5.00, flat shipping 0.
async fn app_with_provider() -> (TestApp, MockServer) {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let app = TestApp::with_config(move |cfg| {
        cfg.payment_api_base_url = base_url;
    })
    .await;
    (app, mock_server)
}

async fn place_reference_order(app: &TestApp) -> String {
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
    body["data"]["id"].as_str().expect("order id").to_string()
}

fn mock_provider_order(id: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": id })))
}

async fn create_intent(app: &TestApp, order_id: &str) -> serde_json::Value {
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/intent"),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    response_json(response).await
}

fn signed_callback(provider_order_id: &str, provider_payment_id: &str) -> serde_json::Value {
    json!({
        "provider_order_id": provider_order_id,
        "provider_payment_id": provider_payment_id,
        "signature": sign_callback(TEST_WEBHOOK_SECRET, provider_order_id, provider_payment_id),
    })
}

#[tokio::test]
async fn intent_amount_is_in_minor_units() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1")
        .expect(1)
        .mount(&mock_server)
        .await;

    let order_id = place_reference_order(&app).await;
    let body = create_intent(&app, &order_id).await;

    assert_eq!(body["data"]["provider_order_id"], "prov_order_1");
    assert_eq!(body["data"]["amount"], 2500);
    assert_eq!(body["data"]["currency"], "USD");
}

#[tokio::test]
async fn intent_is_reused_on_retry() {
    let (app, mock_server) = app_with_provider().await;
    // The remote order is minted exactly once
    mock_provider_order("prov_order_1")
        .expect(1)
        .mount(&mock_server)
        .await;

    let order_id = place_reference_order(&app).await;
    let first = create_intent(&app, &order_id).await;
    let second = create_intent(&app, &order_id).await;

    assert_eq!(first["data"]["provider_order_id"], "prov_order_1");
    assert_eq!(second["data"]["provider_order_id"], "prov_order_1");
}

#[tokio::test]
async fn upstream_failure_leaves_order_pending_and_is_retryable() {
    let (app, mock_server) = app_with_provider().await;
    let order_id = place_reference_order(&app).await;

    {
        let _guard = Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(500))
            .mount_as_scoped(&mock_server)
            .await;

        let response = app
            .request_authenticated(
                Method::POST,
                &format!("/api/v1/orders/{order_id}/payment/intent"),
                None,
            )
            .await;
        assert_eq!(response.status(), 502);
    }

    // Order is untouched
    let response = app
        .request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["payment_status"], "pending");
    assert!(body["data"]["provider_order_id"].is_null());

    // Retry succeeds once the provider recovers
    mock_provider_order("prov_order_retry")
        .mount(&mock_server)
        .await;
    let body = create_intent(&app, &order_id).await;
    assert_eq!(body["data"]["provider_order_id"], "prov_order_retry");
}

#[tokio::test]
async fn settlement_happy_path() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(signed_callback("prov_order_1", "prov_pay_1")),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "success");
    assert_eq!(body["data"]["already_settled"], false);

    let response = app
        .request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["payment_status"], "paid");
    assert_eq!(body["data"]["provider_payment_id"], "prov_pay_1");
}

#[tokio::test]
async fn duplicate_settlement_is_idempotent_success() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    let callback = signed_callback("prov_order_1", "prov_pay_1");
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(callback.clone()),
        )
        .await;
    assert_eq!(response.status(), 200);

    let after_first = response_json(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await,
    )
    .await;

    // Same valid callback again: success, but no second transition
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(callback),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["already_settled"], true);

    let after_second = response_json(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await,
    )
    .await;
    assert_eq!(after_first["data"]["updated_at"], after_second["data"]["updated_at"]);
    assert_eq!(after_second["data"]["payment_status"], "paid");
}

#[tokio::test]
async fn forged_signature_is_rejected_without_state_change() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    let callback = json!({
        "provider_order_id": "prov_order_1",
        "provider_payment_id": "prov_pay_1",
        "signature": sign_callback("some_other_secret", "prov_order_1", "prov_pay_1"),
    });

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(callback),
        )
        .await;
    assert_eq!(response.status(), 400);

    let body = response_json(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["payment_status"], "pending");
    assert!(body["data"]["provider_payment_id"].is_null());
}

#[tokio::test]
async fn mismatched_provider_order_id_is_rejected() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    // Correctly signed, but for a different provider order
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(signed_callback("prov_order_other", "prov_pay_1")),
        )
        .await;
    assert_eq!(response.status(), 400);

    let body = response_json(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["payment_status"], "pending");
}

#[tokio::test]
async fn settlement_requires_order_owner() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    let stranger = app.token_for(uuid::Uuid::new_v4(), &["customer"]);
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(signed_callback("prov_order_1", "prov_pay_1")),
            Some(&stranger),
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn concurrent_settlements_settle_exactly_once() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    let order_uuid = uuid::Uuid::parse_str(&order_id).unwrap();
    let user = app.customer();
    let payments = app.state.services.payments.clone();

    let callback = || PaymentCallback {
        provider_order_id: "prov_order_1".to_string(),
        provider_payment_id: "prov_pay_1".to_string(),
        signature: sign_callback(TEST_WEBHOOK_SECRET, "prov_order_1", "prov_pay_1"),
    };

    let (left, right) = tokio::join!(
        payments.verify_and_settle(&user, order_uuid, callback()),
        payments.verify_and_settle(&user, order_uuid, callback()),
    );

    // Exactly one caller wins the conditional update; the loser observes
    // the idempotent already-paid outcome.
    let outcomes = [left, right];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    let already_paid = outcomes
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::AlreadyPaid)))
        .count();
    assert_eq!(wins + already_paid, 2);
    assert_eq!(wins, 1, "exactly one settlement must win");

    let body = response_json(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["payment_status"], "paid");
    assert_eq!(body["data"]["status"], "processing");
}

#[tokio::test]
async fn paid_order_rejects_new_intent() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(signed_callback("prov_order_1", "prov_pay_1")),
        )
        .await;
    assert_eq!(response.status(), 200);

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/intent"),
            None,
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn provider_failure_cancels_pending_order() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/failure"),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["payment_status"], "failed");

    // A valid callback can no longer settle the failed order
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(signed_callback("prov_order_1", "prov_pay_1")),
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn failure_report_cannot_claw_back_paid_order() {
    let (app, mock_server) = app_with_provider().await;
    mock_provider_order("prov_order_1").mount(&mock_server).await;

    let order_id = place_reference_order(&app).await;
    create_intent(&app, &order_id).await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/verify"),
            Some(signed_callback("prov_order_1", "prov_pay_1")),
        )
        .await;
    assert_eq!(response.status(), 200);

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment/failure"),
            None,
        )
        .await;
    assert_eq!(response.status(), 409);

    let body = response_json(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["payment_status"], "paid");
}
