use crate::{
    db,
    entities::{
        commerce::{cart, cart_item, product_variant, Cart, CartItem, ProductVariant},
        product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Whose cart an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOwner {
    User(i32),
    /// Anonymous cart identified by a verified guest-cart token
    Guest(Uuid),
}

/// One cart row joined with its variant and product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub item_id: i32,
    pub variant_id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub color: String,
    pub size: String,
    /// Current product price
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    /// Units currently on hand for the variant
    pub stock: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub cart_id: i32,
    pub lines: Vec<CartLine>,
    pub item_count: i32,
    pub subtotal: Decimal,
}

impl CartView {
    fn new(cart_id: i32, lines: Vec<CartLine>) -> Self {
        let item_count = lines.iter().map(|l| l.quantity).sum();
        let subtotal = lines.iter().map(|l| l.line_total).sum();
        Self {
            cart_id,
            lines,
            item_count,
            subtotal,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddToCartInput {
    pub variant_id: i32,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItemInput {
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

/// Loads every line of the user's cart with current variant and product data.
///
/// Read-only. A user without a cart, or with an empty one, gets an empty list.
pub async fn load_lines<C>(conn: &C, user_id: i32) -> Result<Vec<CartLine>, DbErr>
where
    C: ConnectionTrait,
{
    let cart = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?;

    match cart {
        Some(cart) => lines_for_cart(conn, cart.id).await,
        None => Ok(Vec::new()),
    }
}

async fn lines_for_cart<C>(conn: &C, cart_id: i32) -> Result<Vec<CartLine>, DbErr>
where
    C: ConnectionTrait,
{
    let rows = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::Id)
        .find_also_related(ProductVariant)
        .all(conn)
        .await?;

    let product_ids: Vec<i32> = rows
        .iter()
        .filter_map(|(_, variant)| variant.as_ref().map(|v| v.product_id))
        .collect();
    let products: HashMap<i32, product::Model> = product::Entity::find()
        .filter(product::Column::Id.is_in(product_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    Ok(rows
        .into_iter()
        .filter_map(|(item, variant)| {
            let variant = variant?;
            let product = products.get(&variant.product_id)?;
            Some(CartLine {
                item_id: item.id,
                variant_id: variant.id,
                product_id: product.id,
                product_name: product.name.clone(),
                color: variant.color,
                size: variant.size,
                unit_price: product.price,
                quantity: item.quantity,
                line_total: product.price * Decimal::from(item.quantity),
                stock: variant.stock,
            })
        })
        .collect())
}

async fn find_cart<C>(conn: &C, owner: CartOwner) -> Result<Option<cart::Model>, DbErr>
where
    C: ConnectionTrait,
{
    let query = match owner {
        CartOwner::User(user_id) => Cart::find().filter(cart::Column::UserId.eq(user_id)),
        CartOwner::Guest(token) => Cart::find().filter(cart::Column::GuestToken.eq(token)),
    };
    query.one(conn).await
}

/// Carts are created lazily on first access.
async fn find_or_create_cart<C>(conn: &C, owner: CartOwner) -> Result<cart::Model, DbErr>
where
    C: ConnectionTrait,
{
    if let Some(existing) = find_cart(conn, owner).await? {
        return Ok(existing);
    }

    let (user_id, guest_token) = match owner {
        CartOwner::User(id) => (Some(id), None),
        CartOwner::Guest(token) => (None, Some(token)),
    };
    let now = Utc::now();
    cart::ActiveModel {
        user_id: Set(user_id),
        guest_token: Set(guest_token),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
}

async fn touch_cart<C>(conn: &C, cart: cart::Model) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let mut active: cart::ActiveModel = cart.into();
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map(|_| ())
}

/// Shopping cart service for signed-in users and guest sessions.
///
/// Every operation is scoped to a [`CartOwner`]; an item id that belongs to
/// another owner's cart is reported as not found.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the owner's cart, creating an empty one if none exists yet.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, owner: CartOwner) -> Result<CartView, ServiceError> {
        let cart = find_or_create_cart(&*self.db, owner).await?;
        let lines = lines_for_cart(&*self.db, cart.id).await?;
        Ok(CartView::new(cart.id, lines))
    }

    /// Adds a variant to the cart.
    ///
    /// Adding a variant already in the cart increases that line's quantity.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - quantity below 1, or more units than are in stock
    /// * `NotFound` - the variant does not exist
    #[instrument(skip(self, input), fields(variant_id = input.variant_id, quantity = input.quantity))]
    pub async fn add_item(
        &self,
        owner: CartOwner,
        input: AddToCartInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
        let AddToCartInput {
            variant_id,
            quantity,
        } = input;

        let cart = db::in_transaction(&self.db, "cart.add_item", move |txn| {
            Box::pin(async move {
                let (variant, product) = find_variant(txn, variant_id).await?;
                let cart = find_or_create_cart(txn, owner).await?;

                let existing = CartItem::find()
                    .filter(cart_item::Column::CartId.eq(cart.id))
                    .filter(cart_item::Column::VariantId.eq(variant_id))
                    .one(txn)
                    .await?;

                let wanted = existing.as_ref().map_or(0, |i| i.quantity) + quantity;
                if wanted > variant.stock {
                    return Err(ServiceError::ValidationError(format!(
                        "insufficient stock for {}",
                        product.name
                    )));
                }

                match existing {
                    Some(item) => {
                        let mut active: cart_item::ActiveModel = item.into();
                        active.quantity = Set(wanted);
                        active.update(txn).await?;
                    }
                    None => {
                        cart_item::ActiveModel {
                            cart_id: Set(cart.id),
                            variant_id: Set(variant_id),
                            quantity: Set(wanted),
                            created_at: Set(Utc::now()),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await?;
                    }
                }
                touch_cart(txn, cart.clone()).await?;
                Ok(cart)
            })
        })
        .await?;

        info!(cart_id = cart.id, variant_id, "Item added to cart");
        self.view(cart.id).await
    }

    /// Sets the quantity of an existing cart line.
    #[instrument(skip(self, input), fields(quantity = input.quantity))]
    pub async fn update_item(
        &self,
        owner: CartOwner,
        item_id: i32,
        input: UpdateCartItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
        let quantity = input.quantity;

        let cart_id = db::in_transaction(&self.db, "cart.update_item", move |txn| {
            Box::pin(async move {
                let (cart, item) = owned_item(txn, owner, item_id).await?;
                let (variant, product) = find_variant(txn, item.variant_id).await?;
                if quantity > variant.stock {
                    return Err(ServiceError::ValidationError(format!(
                        "insufficient stock for {}",
                        product.name
                    )));
                }

                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(quantity);
                active.update(txn).await?;
                let cart_id = cart.id;
                touch_cart(txn, cart).await?;
                Ok(cart_id)
            })
        })
        .await?;

        self.view(cart_id).await
    }

    /// Removes a line from the owner's cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        owner: CartOwner,
        item_id: i32,
    ) -> Result<CartView, ServiceError> {
        let (cart, item) = owned_item(&*self.db, owner, item_id).await?;
        CartItem::delete_by_id(item.id).exec(&*self.db).await?;
        let cart_id = cart.id;
        touch_cart(&*self.db, cart).await?;
        self.view(cart_id).await
    }

    /// Moves a guest cart into the user's cart and deletes the guest cart.
    ///
    /// Quantities of variants present in both carts are summed and capped at
    /// the variant's stock; lines for sold-out variants are dropped.
    #[instrument(skip(self))]
    pub async fn merge_guest_cart(
        &self,
        user_id: i32,
        guest_token: Uuid,
    ) -> Result<CartView, ServiceError> {
        let (cart_id, merged_lines) =
            db::in_transaction(&self.db, "cart.merge_guest", move |txn| {
                Box::pin(async move {
                    let user_cart = find_or_create_cart(txn, CartOwner::User(user_id)).await?;
                    let Some(guest_cart) = find_cart(txn, CartOwner::Guest(guest_token)).await?
                    else {
                        return Ok((user_cart.id, 0));
                    };

                    let guest_items = CartItem::find()
                        .filter(cart_item::Column::CartId.eq(guest_cart.id))
                        .find_also_related(ProductVariant)
                        .all(txn)
                        .await?;

                    let mut merged = 0usize;
                    for (guest_item, variant) in guest_items {
                        let Some(variant) = variant else { continue };
                        let existing = CartItem::find()
                            .filter(cart_item::Column::CartId.eq(user_cart.id))
                            .filter(cart_item::Column::VariantId.eq(variant.id))
                            .one(txn)
                            .await?;
                        let combined = (existing.as_ref().map_or(0, |i| i.quantity)
                            + guest_item.quantity)
                            .min(variant.stock);
                        if combined < 1 {
                            continue;
                        }

                        match existing {
                            Some(item) => {
                                let mut active: cart_item::ActiveModel = item.into();
                                active.quantity = Set(combined);
                                active.update(txn).await?;
                            }
                            None => {
                                cart_item::ActiveModel {
                                    cart_id: Set(user_cart.id),
                                    variant_id: Set(variant.id),
                                    quantity: Set(combined),
                                    created_at: Set(Utc::now()),
                                    ..Default::default()
                                }
                                .insert(txn)
                                .await?;
                            }
                        }
                        merged += 1;
                    }

                    CartItem::delete_many()
                        .filter(cart_item::Column::CartId.eq(guest_cart.id))
                        .exec(txn)
                        .await?;
                    Cart::delete_by_id(guest_cart.id).exec(txn).await?;
                    let cart_id = user_cart.id;
                    touch_cart(txn, user_cart).await?;
                    Ok((cart_id, merged))
                })
            })
            .await?;

        info!(user_id, merged_lines, "Guest cart merged");
        self.event_sender
            .send_or_log(Event::GuestCartMerged {
                user_id,
                merged_lines,
            })
            .await;

        self.view(cart_id).await
    }

    async fn view(&self, cart_id: i32) -> Result<CartView, ServiceError> {
        let lines = lines_for_cart(&*self.db, cart_id).await?;
        Ok(CartView::new(cart_id, lines))
    }
}

async fn find_variant<C>(
    conn: &C,
    variant_id: i32,
) -> Result<(product_variant::Model, product::Model), ServiceError>
where
    C: ConnectionTrait,
{
    let found = ProductVariant::find_by_id(variant_id)
        .find_also_related(product::Entity)
        .one(conn)
        .await?;

    match found {
        Some((variant, Some(product))) if product.is_active => Ok((variant, product)),
        _ => Err(ServiceError::NotFound(format!(
            "product variant {variant_id}"
        ))),
    }
}

async fn owned_item<C>(
    conn: &C,
    owner: CartOwner,
    item_id: i32,
) -> Result<(cart::Model, cart_item::Model), ServiceError>
where
    C: ConnectionTrait,
{
    let not_found = || ServiceError::NotFound(format!("cart item {item_id}"));
    let cart = find_cart(conn, owner).await?.ok_or_else(not_found)?;
    let item = CartItem::find_by_id(item_id)
        .filter(cart_item::Column::CartId.eq(cart.id))
        .one(conn)
        .await?
        .ok_or_else(not_found)?;
    Ok((cart, item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(price: Decimal, quantity: i32) -> CartLine {
        CartLine {
            item_id: 1,
            variant_id: 1,
            product_id: 1,
            product_name: "Linen Shirt".into(),
            color: "white".into(),
            size: "M".into(),
            unit_price: price,
            quantity,
            line_total: price * Decimal::from(quantity),
            stock: 10,
        }
    }

    #[test]
    fn cart_view_totals_lines() {
        let view = CartView::new(3, vec![line(dec!(20.00), 2), line(dec!(5.50), 1)]);
        assert_eq!(view.item_count, 3);
        assert_eq!(view.subtotal, dec!(45.50));
    }

    #[test]
    fn empty_cart_view_is_zero() {
        let view = CartView::new(3, Vec::new());
        assert_eq!(view.item_count, 0);
        assert_eq!(view.subtotal, Decimal::ZERO);
    }

    #[test]
    fn add_input_rejects_zero_quantity() {
        let input = AddToCartInput {
            variant_id: 1,
            quantity: 0,
        };
        assert!(input.validate().is_err());
    }
}
