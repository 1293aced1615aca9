use crate::{
    db,
    entities::commerce::{address, Address},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::Validate;

const INVALID_ADDRESS: &str = "invalid shipping address";

/// Immutable copy of an address taken when an order is placed.
///
/// Stored as JSON on the order; later edits or deletion of the source
/// address never touch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddressSnapshot {
    pub recipient_name: String,
    pub phone: String,
    pub city: String,
    pub district: Option<String>,
    pub ward: Option<String>,
    pub detail: String,
}

impl From<&address::Model> for ShippingAddressSnapshot {
    fn from(model: &address::Model) -> Self {
        Self {
            recipient_name: model.recipient_name.clone(),
            phone: model.phone.clone(),
            city: model.city.clone(),
            district: model.district.clone(),
            ward: model.ward.clone(),
            detail: model.detail.clone(),
        }
    }
}

impl ShippingAddressSnapshot {
    pub fn to_json(&self) -> Result<serde_json::Value, ServiceError> {
        serde_json::to_value(self)
            .map_err(|e| ServiceError::InternalError(format!("address snapshot: {e}")))
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, ServiceError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ServiceError::InternalError(format!("address snapshot: {e}")))
    }

    /// Single-line rendering used in confirmation mail
    pub fn one_line(&self) -> String {
        [
            Some(self.detail.as_str()),
            self.ward.as_deref(),
            self.district.as_deref(),
            Some(self.city.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Fetches the user's address and snapshots it.
///
/// A missing address and one owned by somebody else are indistinguishable
/// to the caller: both fail with "invalid shipping address".
pub async fn resolve_snapshot<C>(
    conn: &C,
    user_id: i32,
    address_id: i32,
) -> Result<ShippingAddressSnapshot, ServiceError>
where
    C: ConnectionTrait,
{
    let found = Address::find_by_id(address_id)
        .filter(address::Column::UserId.eq(user_id))
        .one(conn)
        .await?;

    found
        .as_ref()
        .map(ShippingAddressSnapshot::from)
        .ok_or_else(|| ServiceError::ValidationError(INVALID_ADDRESS.to_string()))
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddressInput {
    #[validate(length(min = 1, max = 120))]
    pub recipient_name: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 120))]
    pub city: String,
    #[validate(length(max = 120))]
    pub district: Option<String>,
    #[validate(length(max = 120))]
    pub ward: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub detail: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Saved shipping addresses of a user.
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DatabaseConnection>,
}

impl AddressService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Default address first, then newest.
    #[instrument(skip(self))]
    pub async fn list(&self, user_id: i32) -> Result<Vec<address::Model>, ServiceError> {
        Ok(Address::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_desc(address::Column::IsDefault)
            .order_by_desc(address::Column::CreatedAt)
            .order_by_desc(address::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Creates an address. A user's first address is always the default.
    #[instrument(skip(self, input))]
    pub async fn create(
        &self,
        user_id: i32,
        input: AddressInput,
    ) -> Result<address::Model, ServiceError> {
        input.validate()?;

        let created = db::in_transaction(&self.db, "address.create", move |txn| {
            Box::pin(async move {
                let existing = Address::find()
                    .filter(address::Column::UserId.eq(user_id))
                    .count(txn)
                    .await?;
                let is_default = input.is_default || existing == 0;
                if is_default {
                    clear_defaults(txn, user_id).await?;
                }

                let now = Utc::now();
                let model = address::ActiveModel {
                    user_id: Set(user_id),
                    recipient_name: Set(input.recipient_name),
                    phone: Set(input.phone),
                    city: Set(input.city),
                    district: Set(input.district),
                    ward: Set(input.ward),
                    detail: Set(input.detail),
                    is_default: Set(is_default),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await?;
                Ok(model)
            })
        })
        .await?;

        info!(address_id = created.id, user_id, "Address created");
        Ok(created)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        user_id: i32,
        address_id: i32,
        input: AddressInput,
    ) -> Result<address::Model, ServiceError> {
        input.validate()?;

        db::in_transaction(&self.db, "address.update", move |txn| {
            Box::pin(async move {
                let current = owned(txn, user_id, address_id).await?;
                let was_default = current.is_default;
                if input.is_default && !was_default {
                    clear_defaults(txn, user_id).await?;
                }

                let mut active: address::ActiveModel = current.into();
                active.recipient_name = Set(input.recipient_name);
                active.phone = Set(input.phone);
                active.city = Set(input.city);
                active.district = Set(input.district);
                active.ward = Set(input.ward);
                active.detail = Set(input.detail);
                // unsetting the flag here would leave the user without a default
                active.is_default = Set(was_default || input.is_default);
                active.updated_at = Set(Utc::now());
                Ok(active.update(txn).await?)
            })
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn set_default(
        &self,
        user_id: i32,
        address_id: i32,
    ) -> Result<address::Model, ServiceError> {
        db::in_transaction(&self.db, "address.set_default", move |txn| {
            Box::pin(async move {
                let current = owned(txn, user_id, address_id).await?;
                clear_defaults(txn, user_id).await?;

                let mut active: address::ActiveModel = current.into();
                active.is_default = Set(true);
                active.updated_at = Set(Utc::now());
                Ok(active.update(txn).await?)
            })
        })
        .await
    }

    /// Deletes an address. When the default goes, the newest remaining
    /// address is promoted.
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: i32, address_id: i32) -> Result<(), ServiceError> {
        db::in_transaction(&self.db, "address.delete", move |txn| {
            Box::pin(async move {
                let current = owned(txn, user_id, address_id).await?;
                Address::delete_by_id(current.id).exec(txn).await?;

                if current.is_default {
                    let next = Address::find()
                        .filter(address::Column::UserId.eq(user_id))
                        .order_by_desc(address::Column::CreatedAt)
                        .order_by_desc(address::Column::Id)
                        .one(txn)
                        .await?;
                    if let Some(next) = next {
                        let mut active: address::ActiveModel = next.into();
                        active.is_default = Set(true);
                        active.update(txn).await?;
                    }
                }
                Ok(())
            })
        })
        .await?;

        info!(address_id, user_id, "Address deleted");
        Ok(())
    }
}

async fn owned<C>(conn: &C, user_id: i32, address_id: i32) -> Result<address::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Address::find_by_id(address_id)
        .filter(address::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("address {address_id}")))
}

async fn clear_defaults<C>(conn: &C, user_id: i32) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    Address::update_many()
        .col_expr(address::Column::IsDefault, Expr::value(false))
        .filter(address::Column::UserId.eq(user_id))
        .filter(address::Column::IsDefault.eq(true))
        .exec(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ShippingAddressSnapshot {
        ShippingAddressSnapshot {
            recipient_name: "Mai Tran".into(),
            phone: "0901234567".into(),
            city: "Ho Chi Minh City".into(),
            district: Some("District 1".into()),
            ward: None,
            detail: "12 Le Loi".into(),
        }
    }

    #[test]
    fn snapshot_survives_json() {
        let snap = snapshot();
        let json = snap.to_json().unwrap();
        assert_eq!(json["recipient_name"], "Mai Tran");
        assert!(json["ward"].is_null());
        assert_eq!(ShippingAddressSnapshot::from_json(&json).unwrap(), snap);
    }

    #[test]
    fn one_line_skips_missing_parts() {
        assert_eq!(
            snapshot().one_line(),
            "12 Le Loi, District 1, Ho Chi Minh City"
        );
    }

    #[test]
    fn input_requires_recipient_and_detail() {
        let input = AddressInput {
            recipient_name: String::new(),
            phone: "0901234567".into(),
            city: "Hanoi".into(),
            district: None,
            ward: None,
            detail: String::new(),
            is_default: false,
        };
        let errors = input.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("recipient_name"));
        assert!(fields.contains_key("detail"));
    }
}
