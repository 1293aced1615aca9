//! End-to-end checkout through `POST /api/orders`.

mod common;

use std::str::FromStr;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_api::entities::commerce::{address, VoucherType};

fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a money value: {other}"),
    }
}

struct Shopper {
    user_id: i32,
    token: String,
    address_id: i32,
}

async fn shopper(app: &TestApp, email: &str) -> Shopper {
    let user_id = app.seed_user(email).await;
    let address_id = app.seed_address(user_id).await.id;
    Shopper {
        user_id,
        token: app.token_for(user_id),
        address_id,
    }
}

fn cod_order(address_id: i32) -> Value {
    json!({ "shippingAddressId": address_id, "paymentMethod": "COD" })
}

#[tokio::test]
async fn scenario_a_plain_cod_checkout() {
    let app = TestApp::new().await;
    let s = shopper(&app, "a@example.com").await;
    let variant = app.seed_variant("Linen Shirt", dec!(20.00), 10).await;
    app.put_in_cart(s.user_id, variant, 2).await;

    let res = app.post("/api/orders", cod_order(s.address_id), &s.token).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

    let order = &res.body["data"]["order"];
    assert_eq!(money(&order["total_amount"]), dec!(40.00));
    assert_eq!(money(&order["shipping_fee"]), dec!(2.00));
    assert_eq!(money(&order["discount_amount"]), dec!(0));
    assert_eq!(money(&order["final_amount"]), dec!(42.00));
    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["payment_status"], "UNPAID");
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["items"][0]["quantity"], 2);
    assert_eq!(money(&order["items"][0]["price"]), dec!(20.00));
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
    assert!(res.body["data"]["payment_url"].is_null());
    assert_eq!(res.body["data"]["notification_sent"], true);

    assert_eq!(app.stock_of(variant).await, 8);
    assert_eq!(app.cart_len(s.user_id).await, 0);

    let sent = app.mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a@example.com");
    assert_eq!(sent[0].1.final_amount, dec!(42.00));
}

#[tokio::test]
async fn scenario_b_fixed_voucher_is_consumed() {
    let app = TestApp::new().await;
    let s = shopper(&app, "b@example.com").await;
    let variant = app.seed_variant("Linen Shirt", dec!(20.00), 10).await;
    let grant = app
        .grant_voucher(s.user_id, "TENOFF", VoucherType::Fixed, dec!(10))
        .await;
    app.put_in_cart(s.user_id, variant, 2).await;

    let res = app
        .post(
            "/api/orders",
            json!({
                "shippingAddressId": s.address_id,
                "paymentMethod": "COD",
                "voucherCode": "TENOFF"
            }),
            &s.token,
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

    let order = &res.body["data"]["order"];
    assert_eq!(money(&order["discount_amount"]), dec!(10.00));
    assert_eq!(money(&order["final_amount"]), dec!(32.00));
    assert_eq!(order["voucher_code"], "TENOFF");

    let grant = app.grant(grant).await;
    assert!(grant.is_used);
    assert!(grant.used_at.is_some());
    assert_eq!(grant.order_id, order["id"].as_i64().map(|id| id as i32));
}

#[tokio::test]
async fn scenario_c_insufficient_stock_writes_nothing() {
    let app = TestApp::new().await;
    let s = shopper(&app, "c@example.com").await;
    let variant = app.seed_variant("Silk Scarf", dec!(15.00), 1).await;
    app.put_in_cart(s.user_id, variant, 2).await;

    let res = app.post("/api/orders", cod_order(s.address_id), &s.token).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["message"]
        .as_str()
        .unwrap()
        .contains("insufficient stock for Silk Scarf"));

    assert_eq!(app.stock_of(variant).await, 1);
    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.cart_len(s.user_id).await, 1);
}

#[tokio::test]
async fn scenario_d_freeship_waives_shipping() {
    let app = TestApp::new().await;
    let s = shopper(&app, "d@example.com").await;
    let variant = app.seed_variant("Canvas Tote", dec!(12.50), 5).await;
    app.grant_voucher(s.user_id, "SHIPFREE", VoucherType::Freeship, dec!(0))
        .await;
    app.put_in_cart(s.user_id, variant, 2).await;

    let res = app
        .post(
            "/api/orders",
            json!({
                "shippingAddressId": s.address_id,
                "paymentMethod": "COD",
                "voucherCode": "SHIPFREE"
            }),
            &s.token,
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

    let order = &res.body["data"]["order"];
    assert_eq!(money(&order["total_amount"]), dec!(25.00));
    assert_eq!(money(&order["discount_amount"]), dec!(2.00));
    assert_eq!(money(&order["final_amount"]), dec!(25.00));
}

#[tokio::test]
async fn percent_voucher_and_free_shipping_threshold() {
    let app = TestApp::new().await;
    let s = shopper(&app, "pct@example.com").await;
    let variant = app.seed_variant("Wool Coat", dec!(60.00), 3).await;
    app.grant_voucher(s.user_id, "SAVE10", VoucherType::Percent, dec!(10))
        .await;
    app.put_in_cart(s.user_id, variant, 1).await;

    let res = app
        .post(
            "/api/orders",
            json!({
                "shippingAddressId": s.address_id,
                "paymentMethod": "COD",
                "voucherCode": "SAVE10"
            }),
            &s.token,
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

    let order = &res.body["data"]["order"];
    assert_eq!(money(&order["shipping_fee"]), dec!(0));
    assert_eq!(money(&order["discount_amount"]), dec!(6.00));
    assert_eq!(money(&order["final_amount"]), dec!(54.00));
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let s = shopper(&app, "empty@example.com").await;

    let res = app.post("/api/orders", cod_order(s.address_id), &s.token).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["message"].as_str().unwrap().contains("cart is empty"));
}

#[tokio::test]
async fn foreign_address_is_rejected() {
    let app = TestApp::new().await;
    let s = shopper(&app, "owner@example.com").await;
    let other = shopper(&app, "other@example.com").await;
    let variant = app.seed_variant("Denim Jacket", dec!(30.00), 4).await;
    app.put_in_cart(s.user_id, variant, 1).await;

    let res = app
        .post("/api/orders", cod_order(other.address_id), &s.token)
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["message"]
        .as_str()
        .unwrap()
        .contains("invalid shipping address"));
    assert_eq!(app.stock_of(variant).await, 4);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = TestApp::new().await;
    let res = app
        .request(Method::POST, "/api/orders", Some(cod_order(1)), None, &[])
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app.post("/api/orders", cod_order(1), "not-a-jwt").await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn second_line_short_rolls_back_first_line() {
    let app = TestApp::new().await;
    let s = shopper(&app, "atomic@example.com").await;
    let plenty = app.seed_variant("Cotton Tee", dec!(10.00), 10).await;
    let scarce = app.seed_variant("Leather Belt", dec!(25.00), 1).await;
    app.put_in_cart(s.user_id, plenty, 3).await;
    app.put_in_cart(s.user_id, scarce, 2).await;

    let res = app.post("/api/orders", cod_order(s.address_id), &s.token).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["message"]
        .as_str()
        .unwrap()
        .contains("Leather Belt"));

    assert_eq!(app.stock_of(plenty).await, 10);
    assert_eq!(app.stock_of(scarce).await, 1);
    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.cart_len(s.user_id).await, 2);
}

#[tokio::test]
async fn invalid_voucher_aborts_before_any_write() {
    let app = TestApp::new().await;
    let s = shopper(&app, "voucher@example.com").await;
    let variant = app.seed_variant("Knit Beanie", dec!(9.00), 5).await;
    let now = Utc::now();
    app.grant_voucher_between(
        s.user_id,
        "EXPIRED",
        VoucherType::Fixed,
        dec!(5),
        now - Duration::days(10),
        now - Duration::days(1),
    )
    .await;
    app.put_in_cart(s.user_id, variant, 1).await;

    for code in ["EXPIRED", "NOSUCHCODE"] {
        let res = app
            .post(
                "/api/orders",
                json!({
                    "shippingAddressId": s.address_id,
                    "paymentMethod": "COD",
                    "voucherCode": code
                }),
                &s.token,
            )
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST, "{code}");
        assert!(res.body["message"]
            .as_str()
            .unwrap()
            .contains("voucher invalid or expired"));
    }

    assert_eq!(app.stock_of(variant).await, 5);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn used_voucher_cannot_be_applied_twice() {
    let app = TestApp::new().await;
    let s = shopper(&app, "twice@example.com").await;
    let variant = app.seed_variant("Ankle Socks", dec!(5.00), 10).await;
    app.grant_voucher(s.user_id, "ONCE", VoucherType::Fixed, dec!(1))
        .await;
    let body = json!({
        "shippingAddressId": s.address_id,
        "paymentMethod": "COD",
        "voucherCode": "ONCE"
    });

    app.put_in_cart(s.user_id, variant, 1).await;
    let first = app.post("/api/orders", body.clone(), &s.token).await;
    assert_eq!(first.status, StatusCode::CREATED, "{}", first.body);

    app.put_in_cart(s.user_id, variant, 1).await;
    let second = app.post("/api/orders", body, &s.token).await;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.stock_of(variant).await, 9);
}

#[tokio::test]
async fn concurrent_checkouts_for_last_unit() {
    let app = TestApp::new().await;
    let first = shopper(&app, "first@example.com").await;
    let second = shopper(&app, "second@example.com").await;
    let variant = app.seed_variant("Limited Sneaker", dec!(45.00), 1).await;
    app.put_in_cart(first.user_id, variant, 1).await;
    app.put_in_cart(second.user_id, variant, 1).await;

    let (a, b) = tokio::join!(
        app.post("/api/orders", cod_order(first.address_id), &first.token),
        app.post("/api/orders", cod_order(second.address_id), &second.token),
    );

    let mut statuses = vec![a.status, b.status];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);
    let failed = if a.status == StatusCode::BAD_REQUEST { &a } else { &b };
    assert!(failed.body["message"]
        .as_str()
        .unwrap()
        .contains("insufficient stock"));

    assert_eq!(app.stock_of(variant).await, 0);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn snapshot_survives_address_edit_and_delete() {
    let app = TestApp::new().await;
    let s = shopper(&app, "snap@example.com").await;
    let variant = app.seed_variant("Rain Jacket", dec!(35.00), 2).await;
    app.put_in_cart(s.user_id, variant, 1).await;

    let placed = app.post("/api/orders", cod_order(s.address_id), &s.token).await;
    assert_eq!(placed.status, StatusCode::CREATED, "{}", placed.body);
    let order_id = placed.body["data"]["order"]["id"].as_i64().unwrap();

    let source = address::Entity::find_by_id(s.address_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    let mut edited: address::ActiveModel = source.clone().into();
    edited.detail = Set("99 Somewhere Else".to_string());
    edited.phone = Set("0000000000".to_string());
    edited.update(app.db()).await.unwrap();

    let res = app.get(&format!("/api/orders/{order_id}"), &s.token).await;
    assert_eq!(res.status, StatusCode::OK);
    let snapshot = &res.body["data"]["shipping_address"];
    assert_eq!(snapshot["recipient_name"], source.recipient_name);
    assert_eq!(snapshot["phone"], source.phone);
    assert_eq!(snapshot["detail"], source.detail);
    assert_eq!(snapshot["city"], source.city);
    assert_eq!(snapshot["district"], "District 1");
    assert_eq!(snapshot["ward"], "Ben Nghe");

    let deleted = app
        .request(
            Method::DELETE,
            &format!("/api/addresses/{}", s.address_id),
            None,
            Some(&s.token),
            &[],
        )
        .await;
    assert_eq!(deleted.status, StatusCode::OK);

    let res = app.get(&format!("/api/orders/{order_id}"), &s.token).await;
    assert_eq!(res.body["data"]["shipping_address"]["detail"], "12 Nguyen Hue");
}

#[tokio::test]
async fn mail_failure_still_reports_created_order() {
    let app = TestApp::with_failing_mailer().await;
    let s = shopper(&app, "nomail@example.com").await;
    let variant = app.seed_variant("Bucket Hat", dec!(18.00), 3).await;
    app.put_in_cart(s.user_id, variant, 1).await;

    let res = app.post("/api/orders", cod_order(s.address_id), &s.token).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["data"]["notification_sent"], false);
    assert_eq!(app.stock_of(variant).await, 2);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn online_checkout_returns_signed_payment_url() {
    let app = TestApp::new().await;
    let s = shopper(&app, "online@example.com").await;
    let variant = app.seed_variant("Trench Coat", dec!(80.00), 2).await;
    app.put_in_cart(s.user_id, variant, 1).await;

    let res = app
        .post(
            "/api/orders",
            json!({ "shipping_address_id": s.address_id, "payment_method": "ONLINE" }),
            &s.token,
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["data"]["order"]["payment_status"], "PENDING");

    let url = res.body["data"]["payment_url"].as_str().unwrap();
    assert!(url.contains("vnp_Amount=8000"));
    assert!(url.contains("vnp_TmnCode=TESTTMN1"));
    assert!(url.contains("vnp_SecureHash="));
}
