use crate::{
    db::{self, DbPool},
    entities::{
        commerce::{product_variant, ProductVariant},
        order::{self, Entity as OrderEntity, Model as OrderModel},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        OrderStatus, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::address_service::ShippingAddressSnapshot,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

const MAX_PER_PAGE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub id: i32,
    pub variant_id: i32,
    pub product_name: String,
    pub color: String,
    pub size: String,
    /// Unit price captured at purchase
    pub price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

impl From<&OrderItemModel> for OrderLine {
    fn from(item: &OrderItemModel) -> Self {
        Self {
            id: item.id,
            variant_id: item.variant_id,
            product_name: item.product_name.clone(),
            color: item.color.clone(),
            size: item.size.clone(),
            price: item.price,
            quantity: item.quantity,
            line_total: item.line_total(),
        }
    }
}

/// Order with its lines, as returned by every order endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderDetail {
    pub id: i32,
    #[schema(example = "ORD-20240301-0A1B2C3D")]
    pub order_number: String,
    pub user_id: i32,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: Decimal,
    pub shipping_fee: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub currency: String,
    pub shipping_address: ShippingAddressSnapshot,
    pub voucher_code: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderLine>,
}

impl OrderDetail {
    pub fn new(order: OrderModel, items: &[OrderItemModel]) -> Result<Self, ServiceError> {
        let shipping_address = ShippingAddressSnapshot::from_json(&order.shipping_address)?;
        Ok(Self {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            total_amount: order.total_amount,
            shipping_fee: order.shipping_fee,
            discount_amount: order.discount_amount,
            final_amount: order.final_amount,
            currency: order.currency,
            shipping_address,
            voucher_code: order.voucher_code,
            paid_at: order.paid_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: items.iter().map(OrderLine::from).collect(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderDetail>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Puts every purchased unit of the order back into variant stock.
async fn restock<C>(conn: &C, order_id: i32) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for item in items {
        ProductVariant::update_many()
            .col_expr(
                product_variant::Column::Stock,
                Expr::col(product_variant::Column::Stock).add(item.quantity),
            )
            .filter(product_variant::Column::Id.eq(item.variant_id))
            .exec(conn)
            .await?;
    }
    Ok(())
}

async fn detail<C>(conn: &C, order: OrderModel) -> Result<OrderDetail, ServiceError>
where
    C: ConnectionTrait,
{
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?;
    OrderDetail::new(order, &items)
}

/// Moves the order to `to`, guarded on the status it was read with.
async fn transition<C>(
    conn: &C,
    order: &OrderModel,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let mut update = OrderEntity::update_many()
        .col_expr(order::Column::Status, Expr::value(to))
        .col_expr(order::Column::UpdatedAt, Expr::value(now));

    if to == OrderStatus::Completed && order.payment_method == PaymentMethod::Cod {
        update = update
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(order::Column::PaidAt, Expr::value(now));
    }

    let result = update
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(order.status))
        .filter(order::Column::PaymentStatus.eq(order.payment_status))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InvalidOperation(format!(
            "order {} was modified concurrently",
            order.id
        )));
    }

    if to.releases_stock() {
        restock(conn, order.id).await?;
    }
    Ok(())
}

/// Reads and status changes for placed orders.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// The user's orders, newest first, each with its lines.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<OrderDetail>, ServiceError> {
        let db = &*self.db_pool;
        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .all(db)
            .await?;
        self.with_items(orders).await
    }

    /// Missing orders and other users' orders are both reported as not found.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_for_user(
        &self,
        user_id: i32,
        order_id: i32,
    ) -> Result<OrderDetail, ServiceError> {
        let db = &*self.db_pool;
        let order = OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
        detail(db, order).await
    }

    /// Customer cancellation; only allowed while the order is PENDING and unpaid.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_for_user(
        &self,
        user_id: i32,
        order_id: i32,
    ) -> Result<OrderDetail, ServiceError> {
        let now = Utc::now();
        let (updated, old_status) =
            db::in_transaction(&self.db_pool, "order.cancel", move |txn| {
                Box::pin(async move {
                    let order = OrderEntity::find_by_id(order_id)
                        .filter(order::Column::UserId.eq(user_id))
                        .one(txn)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;

                    if order.status != OrderStatus::Pending {
                        return Err(ServiceError::InvalidOperation(format!(
                            "order in status {} can no longer be cancelled",
                            order.status
                        )));
                    }
                    if order.payment_status == PaymentStatus::Paid {
                        return Err(ServiceError::InvalidOperation(format!(
                            "order {order_id} is already paid and can no longer be cancelled"
                        )));
                    }

                    transition(txn, &order, OrderStatus::Cancelled, now).await?;
                    let old_status = order.status;
                    let refreshed = OrderEntity::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
                    Ok((detail(txn, refreshed).await?, old_status))
                })
            })
            .await?;

        info!(order_id, user_id, "Order cancelled by customer");
        self.publish_status_change(order_id, old_status, updated.status)
            .await;
        Ok(updated)
    }

    /// Lists all orders with pagination, optionally filtered by status.
    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);

        let mut query = OrderEntity::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(db, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, page, per_page, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        let orders = self.with_items(orders).await?;
        info!(total, page, per_page, returned_count = orders.len(), "Orders listed");

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Admin status change along the order lifecycle.
    ///
    /// Entering CANCELLED or RETURNED restocks every line in the same
    /// transaction; completing a COD order records it as paid.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: i32,
        new_status: OrderStatus,
    ) -> Result<OrderDetail, ServiceError> {
        let now = Utc::now();
        let (updated, old_status) =
            db::in_transaction(&self.db_pool, "order.update_status", move |txn| {
                Box::pin(async move {
                    let order = OrderEntity::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            warn!(order_id, "Order not found for status update");
                            ServiceError::NotFound(format!("order {order_id}"))
                        })?;

                    if !order.status.can_transition_to(new_status) {
                        return Err(ServiceError::InvalidOperation(format!(
                            "cannot move order from {} to {}",
                            order.status, new_status
                        )));
                    }

                    transition(txn, &order, new_status, now).await?;
                    let old_status = order.status;
                    let refreshed = OrderEntity::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
                    Ok((detail(txn, refreshed).await?, old_status))
                })
            })
            .await?;

        info!(order_id, old_status = %old_status, new_status = %new_status, "Order status updated");
        self.publish_status_change(order_id, old_status, new_status)
            .await;
        Ok(updated)
    }

    async fn with_items(&self, orders: Vec<OrderModel>) -> Result<Vec<OrderDetail>, ServiceError> {
        let db = &*self.db_pool;
        let ids: Vec<i32> = orders.iter().map(|o| o.id).collect();
        let mut items: HashMap<i32, Vec<OrderItemModel>> = HashMap::new();
        for item in OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::Id)
            .all(db)
            .await?
        {
            items.entry(item.order_id).or_default().push(item);
        }

        orders
            .into_iter()
            .map(|order| {
                let lines = items.remove(&order.id).unwrap_or_default();
                OrderDetail::new(order, &lines)
            })
            .collect()
    }

    async fn publish_status_change(
        &self,
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) {
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
    }
}
