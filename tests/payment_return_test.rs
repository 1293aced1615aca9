//! Provider return handling on `GET /api/payment/return`.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use rust_decimal_macros::dec;
use serde_json::json;

struct OnlineOrder {
    order_id: String,
    token: String,
    user_id: i32,
    variant: i32,
}

/// Places an ONLINE order of 80.00 (free shipping, 8000 minor units).
async fn online_order(app: &TestApp, email: &str) -> OnlineOrder {
    let user_id = app.seed_user(email).await;
    let address_id = app.seed_address(user_id).await.id;
    let token = app.token_for(user_id);
    let variant = app.seed_variant("Trench Coat", dec!(80.00), 5).await;
    app.put_in_cart(user_id, variant, 1).await;

    let res = app
        .post(
            "/api/orders",
            json!({ "shippingAddressId": address_id, "paymentMethod": "ONLINE" }),
            &token,
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

    OnlineOrder {
        order_id: res.body["data"]["order"]["id"].as_i64().unwrap().to_string(),
        token,
        user_id,
        variant,
    }
}

fn return_params<'a>(order_id: &'a str, amount: &'a str, code: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("vnp_TmnCode", "TESTTMN1"),
        ("vnp_TxnRef", order_id),
        ("vnp_Amount", amount),
        ("vnp_ResponseCode", code),
        ("vnp_TransactionNo", "14226112"),
        ("vnp_OrderInfo", "Payment for order"),
    ]
}

async fn order_payment_status(app: &TestApp, order: &OnlineOrder) -> String {
    let res = app
        .get(&format!("/api/orders/{}", order.order_id), &order.token)
        .await;
    res.body["data"]["payment_status"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn verified_success_marks_order_paid_once() {
    let app = TestApp::new().await;
    let order = online_order(&app, "pay@example.com").await;
    let query = app.signed_return_query(&return_params(&order.order_id, "8000", "00"));

    let res = app
        .get(&format!("/api/payment/return?{query}"), &order.token)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["code"], "00");
    assert_eq!(res.body["orderId"].to_string(), order.order_id);
    assert_eq!(order_payment_status(&app, &order).await, "PAID");

    let detail = app
        .get(&format!("/api/orders/{}", order.order_id), &order.token)
        .await;
    assert!(!detail.body["data"]["paid_at"].is_null());

    let replay = app
        .get(&format!("/api/payment/return?{query}"), &order.token)
        .await;
    assert_eq!(replay.body["code"], "02");
}

#[tokio::test]
async fn tampered_amount_fails_signature() {
    let app = TestApp::new().await;
    let order = online_order(&app, "tamper@example.com").await;
    let query = app
        .signed_return_query(&return_params(&order.order_id, "8000", "00"))
        .replace("vnp_Amount=8000", "vnp_Amount=100");

    let res = app
        .get(&format!("/api/payment/return?{query}"), &order.token)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["code"], "97");
    assert_eq!(res.body["message"], "payment could not be verified");
    assert!(res.body.get("orderId").is_none());
    assert_eq!(order_payment_status(&app, &order).await, "PENDING");
}

#[tokio::test]
async fn signed_but_wrong_amount_is_compared_with_stored_total() {
    let app = TestApp::new().await;
    let order = online_order(&app, "amount@example.com").await;
    let query = app.signed_return_query(&return_params(&order.order_id, "100", "00"));

    let res = app
        .get(&format!("/api/payment/return?{query}"), &order.token)
        .await;
    assert_eq!(res.body["code"], "04");
    assert_eq!(order_payment_status(&app, &order).await, "PENDING");
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let app = TestApp::new().await;
    let order = online_order(&app, "nosig@example.com").await;
    let query = format!(
        "vnp_TxnRef={}&vnp_Amount=8000&vnp_ResponseCode=00",
        order.order_id
    );

    let res = app
        .get(&format!("/api/payment/return?{query}"), &order.token)
        .await;
    assert_eq!(res.body["code"], "97");
    assert_eq!(order_payment_status(&app, &order).await, "PENDING");
}

#[tokio::test]
async fn unknown_or_foreign_order_is_not_found() {
    let app = TestApp::new().await;
    let order = online_order(&app, "mine@example.com").await;
    let intruder = app.seed_user("intruder@example.com").await;
    let intruder_token = app.token_for(intruder);

    let foreign = app.signed_return_query(&return_params(&order.order_id, "8000", "00"));
    let res = app
        .get(&format!("/api/payment/return?{foreign}"), &intruder_token)
        .await;
    assert_eq!(res.body["code"], "01");

    let unknown = app.signed_return_query(&return_params("999999", "8000", "00"));
    let res = app
        .get(&format!("/api/payment/return?{unknown}"), &order.token)
        .await;
    assert_eq!(res.body["code"], "01");

    assert_eq!(order_payment_status(&app, &order).await, "PENDING");
    assert_ne!(intruder, order.user_id);
}

#[tokio::test]
async fn cod_orders_cannot_be_paid_online() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("cod@example.com").await;
    let address_id = app.seed_address(user_id).await.id;
    let token = app.token_for(user_id);
    let variant = app.seed_variant("Linen Shirt", dec!(20.00), 5).await;
    app.put_in_cart(user_id, variant, 1).await;
    let placed = app
        .post(
            "/api/orders",
            json!({ "shippingAddressId": address_id, "paymentMethod": "COD" }),
            &token,
        )
        .await;
    let order_id = placed.body["data"]["order"]["id"].as_i64().unwrap().to_string();

    // 20.00 + 2.00 shipping
    let query = app.signed_return_query(&return_params(&order_id, "2200", "00"));
    let res = app
        .get(&format!("/api/payment/return?{query}"), &token)
        .await;
    assert_eq!(res.body["code"], "01");
}

#[tokio::test]
async fn provider_failure_code_is_passed_through() {
    let app = TestApp::new().await;
    let order = online_order(&app, "cancelled@example.com").await;
    let query = app.signed_return_query(&return_params(&order.order_id, "8000", "24"));

    let res = app
        .get(&format!("/api/payment/return?{query}"), &order.token)
        .await;
    assert_eq!(res.body["code"], "24");
    assert_eq!(order_payment_status(&app, &order).await, "PENDING");
}

#[tokio::test]
async fn return_requires_authentication() {
    let app = TestApp::new().await;
    let res = app
        .request(
            axum::http::Method::GET,
            "/api/payment/return?vnp_TxnRef=1",
            None,
            None,
            &[],
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

async fn cancel(app: &TestApp, order: &OnlineOrder) -> common::TestResponse {
    app.request(
        axum::http::Method::POST,
        &format!("/api/orders/{}/cancel", order.order_id),
        None,
        Some(&order.token),
        &[],
    )
    .await
}

#[tokio::test]
async fn return_after_cancellation_does_not_mark_paid() {
    let app = TestApp::new().await;
    let order = online_order(&app, "changed-mind@example.com").await;

    let res = cancel(&app, &order).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(app.stock_of(order.variant).await, 5);

    let query = app.signed_return_query(&return_params(&order.order_id, "8000", "00"));
    let res = app
        .get(&format!("/api/payment/return?{query}"), &order.token)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["code"], "03");

    let detail = app
        .get(&format!("/api/orders/{}", order.order_id), &order.token)
        .await;
    assert_eq!(detail.body["data"]["status"], "CANCELLED");
    assert_eq!(detail.body["data"]["payment_status"], "PENDING");
    assert!(detail.body["data"]["paid_at"].is_null());
}

#[tokio::test]
async fn paid_online_order_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let order = online_order(&app, "paid-first@example.com").await;
    let query = app.signed_return_query(&return_params(&order.order_id, "8000", "00"));
    let res = app
        .get(&format!("/api/payment/return?{query}"), &order.token)
        .await;
    assert_eq!(res.body["code"], "00");

    let res = cancel(&app, &order).await;
    assert_eq!(res.status, StatusCode::CONFLICT, "{}", res.body);
    assert_eq!(app.stock_of(order.variant).await, 4);

    let detail = app
        .get(&format!("/api/orders/{}", order.order_id), &order.token)
        .await;
    assert_eq!(detail.body["data"]["status"], "PENDING");
    assert_eq!(detail.body["data"]["payment_status"], "PAID");
}
