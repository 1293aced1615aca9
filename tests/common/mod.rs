#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use storefront_api::{
    auth::{ADMIN_ROLE, GUEST_CART_HEADER},
    build_router,
    config::AppConfig,
    db,
    entities::{
        commerce::{address, cart, cart_item, product_variant, user_voucher, voucher, VoucherType},
        order, product, user,
    },
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        notifications::{NotificationError, Notifier, OrderConfirmation, OrderMailer},
        payments::canonicalize,
    },
    AppState,
};
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "k7Qm2xVt9LpR4wZs8NbY3cJh6FdGa1UeTo5iKyXvWnMq0rEsPlHjBgCuDfAzIkOt";
pub const GUEST_SECRET: &str = "guest-cart-signing-secret-for-integration";
pub const GATEWAY_SECRET: &str = "INTEGRATIONHASHSECRET0123456789";

/// Mailer that remembers every confirmation it was asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, OrderConfirmation)>>,
}

#[async_trait]
impl OrderMailer for RecordingMailer {
    async fn send_order_confirmation(
        &self,
        to: &str,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .await
            .push((to.to_string(), confirmation.clone()));
        Ok(())
    }
}

/// Mailer whose relay always refuses.
pub struct FailingMailer;

#[async_trait]
impl OrderMailer for FailingMailer {
    async fn send_order_confirmation(
        &self,
        _to: &str,
        _confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        Err(NotificationError::Rejected(503))
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Application wired against a private in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        JWT_SECRET.to_string(),
        GUEST_SECRET.to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "development".to_string(),
    );
    // one connection keeps the in-memory database alive and shared
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.db_acquire_timeout_secs = 30;
    cfg.payment.tmn_code = "TESTTMN1".to_string();
    cfg.payment.hash_secret = GATEWAY_SECRET.to_string();
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        let recorder = Arc::new(RecordingMailer::default());
        Self::build(recorder.clone(), recorder).await
    }

    /// Same application, but every confirmation mail is refused by the relay.
    pub async fn with_failing_mailer() -> Self {
        Self::build(Arc::new(FailingMailer), Arc::new(RecordingMailer::default())).await
    }

    async fn build(mailer: Arc<dyn OrderMailer>, recorder: Arc<RecordingMailer>) -> Self {
        let cfg = test_config();
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let handlers: Vec<Arc<dyn events::EventHandler>> =
            vec![Arc::new(events::SalesMetricsHandler)];
        let event_task = tokio::spawn(events::process_events(event_rx, handlers));

        let notifier = Notifier::new(mailer, Duration::from_secs(2));
        let services = AppServices::new(db_arc.clone(), event_sender.clone(), &cfg, notifier);
        let state = AppState::new(db_arc, cfg, event_sender, services);
        let router = build_router(state.clone());

        Self {
            router,
            state,
            mailer: recorder,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &sea_orm::DatabaseConnection {
        &self.state.db
    }

    pub fn token_for(&self, user_id: i32) -> String {
        self.state
            .auth
            .issue_token(user_id, &[])
            .expect("issue user token")
    }

    pub fn admin_token(&self, user_id: i32) -> String {
        self.state
            .auth
            .issue_token(user_id, &[ADMIN_ROLE])
            .expect("issue admin token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        TestResponse { status, body }
    }

    pub async fn get(&self, uri: &str, token: &str) -> TestResponse {
        self.request(Method::GET, uri, None, Some(token), &[]).await
    }

    pub async fn post(&self, uri: &str, body: Value, token: &str) -> TestResponse {
        self.request(Method::POST, uri, Some(body), Some(token), &[])
            .await
    }

    pub async fn guest(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        guest_token: &str,
    ) -> TestResponse {
        self.request(method, uri, body, None, &[(GUEST_CART_HEADER, guest_token)])
            .await
    }

    // ---- seeding ----

    pub async fn seed_user(&self, email: &str) -> i32 {
        user::ActiveModel {
            email: Set(email.to_string()),
            full_name: Set(format!("Shopper {email}")),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed user")
        .id
    }

    /// Product with one variant; returns the variant id.
    pub async fn seed_variant(&self, name: &str, price: Decimal, stock: i32) -> i32 {
        let now = Utc::now();
        let product = product::ActiveModel {
            name: Set(name.to_string()),
            price: Set(price),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed product");

        product_variant::ActiveModel {
            product_id: Set(product.id),
            sku: Set(format!("{}-{}", name.replace(' ', "-").to_uppercase(), product.id)),
            color: Set("Black".to_string()),
            size: Set("M".to_string()),
            stock: Set(stock),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed variant")
        .id
    }

    pub async fn seed_address(&self, user_id: i32) -> address::Model {
        let now = Utc::now();
        address::ActiveModel {
            user_id: Set(user_id),
            recipient_name: Set("Linh Tran".to_string()),
            phone: Set("0901234567".to_string()),
            city: Set("Ho Chi Minh City".to_string()),
            district: Set(Some("District 1".to_string())),
            ward: Set(Some("Ben Nghe".to_string())),
            detail: Set("12 Nguyen Hue".to_string()),
            is_default: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed address")
    }

    /// Voucher valid from yesterday until tomorrow, granted to `user_id`.
    /// Returns the grant id.
    pub async fn grant_voucher(
        &self,
        user_id: i32,
        code: &str,
        voucher_type: VoucherType,
        value: Decimal,
    ) -> i32 {
        let now = Utc::now();
        self.grant_voucher_between(
            user_id,
            code,
            voucher_type,
            value,
            now - chrono::Duration::days(1),
            now + chrono::Duration::days(1),
        )
        .await
    }

    pub async fn grant_voucher_between(
        &self,
        user_id: i32,
        code: &str,
        voucher_type: VoucherType,
        value: Decimal,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> i32 {
        let now = Utc::now();
        let voucher = voucher::ActiveModel {
            code: Set(code.to_string()),
            description: Set(Some(format!("{voucher_type} voucher"))),
            voucher_type: Set(voucher_type),
            value: Set(value),
            start_date: Set(start),
            end_date: Set(end),
            is_active: Set(true),
            used_count: Set(0),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed voucher");

        user_voucher::ActiveModel {
            user_id: Set(user_id),
            voucher_id: Set(voucher.id),
            is_used: Set(false),
            used_at: Set(None),
            order_id: Set(None),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed voucher grant")
        .id
    }

    /// Writes a cart line directly, bypassing the stock check of the cart API.
    pub async fn put_in_cart(&self, user_id: i32, variant_id: i32, quantity: i32) {
        let now = Utc::now();
        let existing = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(self.db())
            .await
            .expect("load cart");
        let cart_id = match existing {
            Some(c) => c.id,
            None => {
                cart::ActiveModel {
                    user_id: Set(Some(user_id)),
                    guest_token: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(self.db())
                .await
                .expect("seed cart")
                .id
            }
        };

        cart_item::ActiveModel {
            cart_id: Set(cart_id),
            variant_id: Set(variant_id),
            quantity: Set(quantity),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed cart item");
    }

    // ---- inspection ----

    pub async fn stock_of(&self, variant_id: i32) -> i32 {
        product_variant::Entity::find_by_id(variant_id)
            .one(self.db())
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock
    }

    pub async fn cart_len(&self, user_id: i32) -> usize {
        let Some(cart) = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(self.db())
            .await
            .expect("load cart")
        else {
            return 0;
        };
        cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(self.db())
            .await
            .expect("load cart items")
            .len()
    }

    pub async fn order_count(&self) -> usize {
        order::Entity::find()
            .all(self.db())
            .await
            .expect("load orders")
            .len()
    }

    pub async fn grant(&self, grant_id: i32) -> user_voucher::Model {
        user_voucher::Entity::find_by_id(grant_id)
            .one(self.db())
            .await
            .expect("load grant")
            .expect("grant exists")
    }

    // ---- payment provider ----

    /// Query string as the provider would send it back, signed with the
    /// merchant secret.
    pub fn signed_return_query(&self, params: &[(&str, &str)]) -> String {
        let canonical = canonicalize(params.iter().copied());
        let signature = self
            .state
            .services
            .payments
            .gateway()
            .sign(&canonical)
            .expect("sign return");
        format!("{canonical}&vnp_SecureHash={signature}")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
