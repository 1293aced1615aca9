use crate::{
    db,
    entities::{
        commerce::{cart, cart_item, product_variant, Cart, CartItem, ProductVariant},
        order, order_item, user, OrderStatus, PaymentMethod,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::{
            address_service::{self, ShippingAddressSnapshot},
            cart_service::{self, CartLine},
            pricing_service::{self, PriceQuote, ShippingPolicy},
            voucher_service,
        },
        notifications::{Notifier, OrderConfirmation},
        orders::OrderDetail,
        payments::PaymentGateway,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Body of `POST /api/orders`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[serde(alias = "shipping_address_id")]
    pub shipping_address_id: i32,
    #[serde(alias = "payment_method")]
    pub payment_method: PaymentMethod,
    #[serde(default, alias = "voucher_code")]
    #[validate(length(max = 64))]
    pub voucher_code: Option<String>,
}

impl PlaceOrderRequest {
    fn voucher_code(&self) -> Option<String> {
        self.voucher_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaceOrderResponse {
    pub order: OrderDetail,
    /// Provider redirect for ONLINE orders
    pub payment_url: Option<String>,
    /// Whether the confirmation mail went out
    pub notification_sent: bool,
}

/// `ORD-{yyyymmdd}-{8 uppercase hex}`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

fn insufficient_stock(product_name: &str) -> ServiceError {
    ServiceError::ValidationError(format!("insufficient stock for {product_name}"))
}

struct Committed {
    order: order::Model,
    items: Vec<order_item::Model>,
    snapshot: ShippingAddressSnapshot,
    email: String,
    redeemed_grant: Option<i32>,
}

/// Everything the writer needs, owned so it can move into the transaction.
#[derive(Clone)]
struct Checkout {
    user_id: i32,
    address_id: i32,
    payment_method: PaymentMethod,
    voucher_code: Option<String>,
    policy: ShippingPolicy,
    currency: String,
    now: DateTime<Utc>,
}

impl Checkout {
    /// Reads, prechecks and writes of one checkout. Returns before the first
    /// write when any precondition fails.
    async fn run(self, txn: &DatabaseTransaction) -> Result<Committed, ServiceError> {
        let customer = user::Entity::find_by_id(self.user_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::AuthError("unknown user".to_string()))?;

        let lines = cart_service::load_lines(txn, self.user_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".to_string()));
        }
        if let Some(short) = lines.iter().find(|l| l.quantity > l.stock) {
            return Err(insufficient_stock(&short.product_name));
        }

        let snapshot =
            address_service::resolve_snapshot(txn, self.user_id, self.address_id).await?;

        let redeemable = match &self.voucher_code {
            Some(code) => {
                Some(voucher_service::find_redeemable(txn, self.user_id, code, self.now).await?)
            }
            None => None,
        };

        let subtotal = pricing_service::subtotal(lines.iter().map(|l| (l.unit_price, l.quantity)));
        let effect = redeemable.as_ref().map(|r| r.effect());
        let quote = pricing_service::quote(subtotal, &self.policy, effect.as_ref());
        debug!(
            user_id = self.user_id,
            subtotal = %quote.subtotal,
            payable_shipping = %quote.payable_shipping(),
            final_amount = %quote.final_amount,
            "Checkout priced"
        );

        let order = self.insert_order(txn, &quote, &snapshot, redeemable.is_some()).await?;
        let items = insert_items(txn, order.id, &lines).await?;
        decrement_stock(txn, &lines).await?;

        if let Some(redeemable) = &redeemable {
            voucher_service::consume(txn, redeemable, order.id, self.now).await?;
        }

        clear_cart(txn, self.user_id).await?;

        Ok(Committed {
            order,
            items,
            snapshot,
            email: customer.email,
            redeemed_grant: redeemable.map(|r| r.grant.id),
        })
    }

    async fn insert_order(
        &self,
        txn: &DatabaseTransaction,
        quote: &PriceQuote,
        snapshot: &ShippingAddressSnapshot,
        with_voucher: bool,
    ) -> Result<order::Model, ServiceError> {
        let order = order::ActiveModel {
            order_number: Set(generate_order_number(self.now)),
            user_id: Set(self.user_id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(self.payment_method.initial_payment_status()),
            payment_method: Set(self.payment_method),
            total_amount: Set(quote.subtotal),
            shipping_fee: Set(quote.shipping_fee),
            discount_amount: Set(quote.discount_amount),
            final_amount: Set(quote.final_amount),
            currency: Set(self.currency.clone()),
            shipping_address: Set(snapshot.to_json()?),
            voucher_code: Set(self.voucher_code.clone().filter(|_| with_voucher)),
            paid_at: Set(None),
            created_at: Set(self.now),
            updated_at: Set(self.now),
            ..Default::default()
        }
        .insert(txn)
        .await?;
        Ok(order)
    }
}

async fn insert_items(
    txn: &DatabaseTransaction,
    order_id: i32,
    lines: &[CartLine],
) -> Result<Vec<order_item::Model>, ServiceError> {
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = order_item::ActiveModel {
            order_id: Set(order_id),
            variant_id: Set(line.variant_id),
            product_name: Set(line.product_name.clone()),
            color: Set(line.color.clone()),
            size: Set(line.size.clone()),
            price: Set(line.unit_price),
            quantity: Set(line.quantity),
            ..Default::default()
        }
        .insert(txn)
        .await?;
        items.push(item);
    }
    Ok(items)
}

/// `stock = stock - q WHERE id = ? AND stock >= q`, one row per line. A
/// concurrent checkout that took the last units leaves zero rows affected.
async fn decrement_stock(txn: &DatabaseTransaction, lines: &[CartLine]) -> Result<(), ServiceError> {
    for line in lines {
        let result = ProductVariant::update_many()
            .col_expr(
                product_variant::Column::Stock,
                Expr::col(product_variant::Column::Stock).sub(line.quantity),
            )
            .filter(product_variant::Column::Id.eq(line.variant_id))
            .filter(product_variant::Column::Stock.gte(line.quantity))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(insufficient_stock(&line.product_name));
        }
    }
    Ok(())
}

async fn clear_cart(txn: &DatabaseTransaction, user_id: i32) -> Result<(), ServiceError> {
    if let Some(cart) = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(txn)
        .await?
    {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(txn)
            .await?;
    }
    Ok(())
}

/// Converts a user's cart into an order.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<PaymentGateway>,
    notifier: Notifier,
    policy: ShippingPolicy,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<PaymentGateway>,
        notifier: Notifier,
        policy: ShippingPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            notifier,
            policy,
            currency: currency.into(),
        }
    }

    /// Places an order from the user's cart.
    ///
    /// Order, order lines, stock decrements, voucher redemption and cart
    /// clearing commit together or not at all. The confirmation mail and the
    /// payment redirect are produced after commit and cannot fail the call.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - empty cart, insufficient stock, invalid shipping
    ///   address, voucher invalid or expired
    /// * `AuthError` - the user no longer exists
    #[instrument(skip(self, request), fields(payment_method = %request.payment_method))]
    pub async fn place_order(
        &self,
        user_id: i32,
        request: PlaceOrderRequest,
        client_ip: &str,
    ) -> Result<PlaceOrderResponse, ServiceError> {
        request.validate()?;

        let checkout = Checkout {
            user_id,
            address_id: request.shipping_address_id,
            payment_method: request.payment_method,
            voucher_code: request.voucher_code(),
            policy: self.policy,
            currency: self.currency.clone(),
            now: Utc::now(),
        };

        let committed = db::in_transaction(&self.db, "checkout.place_order", move |txn| {
            Box::pin(checkout.run(txn))
        })
        .await
        .map_err(|e| {
            let reason = if e.is_client_error() { "rejected" } else { "error" };
            counter!("checkout.failed", 1, "reason" => reason);
            if e.is_client_error() {
                warn!(user_id, error = %e, "Checkout rejected");
            } else {
                error!(user_id, error = %e, "Checkout failed");
            }
            e
        })?;

        let Committed {
            order,
            items,
            snapshot,
            email,
            redeemed_grant,
        } = committed;

        counter!("checkout.completed", 1, "payment_method" => order.payment_method.to_string());
        info!(
            order_id = order.id,
            order_number = %order.order_number,
            final_amount = %order.final_amount,
            "Order placed"
        );

        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                user_id,
                final_amount: order.final_amount,
                placed_at: order.created_at,
            })
            .await;
        if let Some(user_voucher_id) = redeemed_grant {
            self.event_sender
                .send_or_log(Event::VoucherRedeemed {
                    user_voucher_id,
                    order_id: order.id,
                })
                .await;
        }

        let confirmation = OrderConfirmation::from_order(&order, &items, snapshot.clone());
        let notification_sent = self.notifier.order_placed(&email, &confirmation).await;

        let payment_url = match order.payment_method {
            PaymentMethod::Online => match self.gateway.payment_url(&order, client_ip, Utc::now())
            {
                Ok(url) => Some(url),
                Err(e) => {
                    error!(order_id = order.id, error = %e, "Could not build payment URL");
                    None
                }
            },
            PaymentMethod::Cod => None,
        };

        Ok(PlaceOrderResponse {
            order: OrderDetail::new(order, &items)?,
            payment_url,
            notification_sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::product;
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    async fn seed_variant(pool: &DatabaseConnection, name: &str, stock: i32) -> i32 {
        let now = Utc::now();
        let product = product::ActiveModel {
            name: Set(name.to_string()),
            price: Set(dec!(20.00)),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(pool)
        .await
        .unwrap();
        product_variant::ActiveModel {
            product_id: Set(product.id),
            sku: Set(format!("SKU-{}", product.id)),
            color: Set("Navy".to_string()),
            size: Set("S".to_string()),
            stock: Set(stock),
            ..Default::default()
        }
        .insert(pool)
        .await
        .unwrap()
        .id
    }

    /// Line as read before any other checkout ran.
    fn line(variant_id: i32, name: &str, quantity: i32, stock: i32) -> CartLine {
        CartLine {
            item_id: variant_id,
            variant_id,
            product_id: variant_id,
            product_name: name.to_string(),
            color: "Navy".to_string(),
            size: "S".to_string(),
            unit_price: dec!(20.00),
            quantity,
            line_total: dec!(20.00) * Decimal::from(quantity),
            stock,
        }
    }

    async fn stock_of(pool: &DatabaseConnection, variant_id: i32) -> i32 {
        ProductVariant::find_by_id(variant_id)
            .one(pool)
            .await
            .unwrap()
            .unwrap()
            .stock
    }

    #[tokio::test]
    async fn guarded_decrement_rejects_stale_line_and_rolls_back() {
        let pool = db::migrated_memory_pool().await;
        let coat = seed_variant(&pool, "Wool Coat", 3).await;
        let scarf = seed_variant(&pool, "Silk Scarf", 1).await;
        let lines = vec![line(coat, "Wool Coat", 2, 3), line(scarf, "Silk Scarf", 1, 1)];

        // The last scarf is sold after the lines were read.
        ProductVariant::update_many()
            .col_expr(product_variant::Column::Stock, Expr::value(0))
            .filter(product_variant::Column::Id.eq(scarf))
            .exec(&pool)
            .await
            .unwrap();

        let result = db::in_transaction(&pool, "checkout.decrement", move |txn| {
            Box::pin(async move { decrement_stock(txn, &lines).await })
        })
        .await;
        assert_matches!(
            result,
            Err(ServiceError::ValidationError(msg)) if msg == "insufficient stock for Silk Scarf"
        );

        assert_eq!(stock_of(&pool, coat).await, 3);
        assert_eq!(stock_of(&pool, scarf).await, 0);
    }

    #[tokio::test]
    async fn guarded_decrement_takes_exactly_the_remaining_stock() {
        let pool = db::migrated_memory_pool().await;
        let coat = seed_variant(&pool, "Wool Coat", 2).await;
        let lines = vec![line(coat, "Wool Coat", 2, 2)];

        db::in_transaction(&pool, "checkout.decrement", move |txn| {
            Box::pin(async move { decrement_stock(txn, &lines).await })
        })
        .await
        .unwrap();
        assert_eq!(stock_of(&pool, coat).await, 0);
    }

    #[test]
    fn order_number_format() {
        let now = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let number = generate_order_number(now);
        assert!(number.starts_with("ORD-20240301-"));
        let suffix = &number["ORD-20240301-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn request_accepts_camel_and_snake_case() {
        let camel: PlaceOrderRequest = serde_json::from_value(serde_json::json!({
            "shippingAddressId": 4,
            "paymentMethod": "ONLINE",
            "voucherCode": " SPRING10 "
        }))
        .unwrap();
        assert_eq!(camel.shipping_address_id, 4);
        assert_eq!(camel.payment_method, PaymentMethod::Online);
        assert_eq!(camel.voucher_code().as_deref(), Some("SPRING10"));

        let snake: PlaceOrderRequest = serde_json::from_value(serde_json::json!({
            "shipping_address_id": 4,
            "payment_method": "COD",
            "voucher_code": ""
        }))
        .unwrap();
        assert_eq!(snake.payment_method, PaymentMethod::Cod);
        assert_eq!(snake.voucher_code(), None);
    }
}
