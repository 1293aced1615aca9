use crate::{
    entities::{
        commerce::{user_voucher, voucher, UserVoucher, Voucher, VoucherType},
        user,
    },
    errors::ServiceError,
    services::commerce::pricing_service::VoucherEffect,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, SelectTwo, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use validator::Validate;

pub const VOUCHER_REJECTED: &str = "voucher invalid or expired";

/// A user's grant together with the voucher it refers to, known to be
/// redeemable at the time it was looked up.
#[derive(Debug, Clone)]
pub struct RedeemableVoucher {
    pub grant: user_voucher::Model,
    pub voucher: voucher::Model,
}

impl RedeemableVoucher {
    pub fn effect(&self) -> VoucherEffect {
        VoucherEffect::from_voucher(&self.voucher)
    }
}

/// Voucher grant as shown to its owner.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AvailableVoucher {
    pub user_voucher_id: i32,
    pub code: String,
    pub description: Option<String>,
    pub voucher_type: VoucherType,
    pub value: Decimal,
    pub end_date: DateTime<Utc>,
}

/// Grants of `user_id` that are unused, active and inside their validity window.
fn redeemable_grants(
    user_id: i32,
    now: DateTime<Utc>,
) -> SelectTwo<user_voucher::Entity, voucher::Entity> {
    UserVoucher::find()
        .find_also_related(Voucher)
        .filter(user_voucher::Column::UserId.eq(user_id))
        .filter(user_voucher::Column::IsUsed.eq(false))
        .filter(voucher::Column::IsActive.eq(true))
        .filter(voucher::Column::StartDate.lte(now))
        .filter(voucher::Column::EndDate.gt(now))
}

/// Looks up an unused grant of `code` for `user_id`.
///
/// Ownership, the unused flag, the code, the active flag and the validity
/// window are all part of one query.
pub async fn find_redeemable<C>(
    conn: &C,
    user_id: i32,
    code: &str,
    now: DateTime<Utc>,
) -> Result<RedeemableVoucher, ServiceError>
where
    C: ConnectionTrait,
{
    let found = redeemable_grants(user_id, now)
        .filter(voucher::Column::Code.eq(code.trim()))
        .order_by_asc(user_voucher::Column::Id)
        .one(conn)
        .await?;

    match found {
        Some((grant, Some(voucher))) => Ok(RedeemableVoucher { grant, voucher }),
        _ => {
            debug!(user_id, code, "Voucher lookup found no redeemable grant");
            Err(ServiceError::ValidationError(VOUCHER_REJECTED.to_string()))
        }
    }
}

/// Marks the grant used for `order_id` and bumps the voucher's usage count.
///
/// The flip is conditional on `is_used = false`, so of two transactions
/// racing on one grant only the first to write succeeds.
pub async fn consume<C>(
    conn: &C,
    redeemable: &RedeemableVoucher,
    order_id: i32,
    now: DateTime<Utc>,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let flipped = UserVoucher::update_many()
        .col_expr(user_voucher::Column::IsUsed, Expr::value(true))
        .col_expr(user_voucher::Column::UsedAt, Expr::value(now))
        .col_expr(user_voucher::Column::OrderId, Expr::value(order_id))
        .filter(user_voucher::Column::Id.eq(redeemable.grant.id))
        .filter(user_voucher::Column::IsUsed.eq(false))
        .exec(conn)
        .await?;

    if flipped.rows_affected != 1 {
        return Err(ServiceError::ValidationError(VOUCHER_REJECTED.to_string()));
    }

    Voucher::update_many()
        .col_expr(
            voucher::Column::UsedCount,
            Expr::col(voucher::Column::UsedCount).add(1),
        )
        .filter(voucher::Column::Id.eq(redeemable.voucher.id))
        .exec(conn)
        .await?;

    Ok(())
}

fn default_active() -> bool {
    true
}

/// New voucher definition. Codes are stored trimmed and upper-cased.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateVoucherInput {
    #[validate(length(min = 3, max = 32))]
    #[schema(example = "SPRING10")]
    pub code: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
    pub voucher_type: VoucherType,
    /// Amount for FIXED, percentage for PERCENT, ignored for FREESHIP
    pub value: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateVoucherInput {
    #[validate(length(min = 3, max = 32))]
    pub code: Option<String>,
    #[validate(length(max = 255))]
    pub description: Option<String>,
    pub voucher_type: Option<VoucherType>,
    pub value: Option<Decimal>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GrantVoucherInput {
    pub user_id: i32,
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Value and window rules shared by create and update.
fn check_terms(
    voucher_type: VoucherType,
    value: Decimal,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if end_date <= start_date {
        return Err(ServiceError::ValidationError(
            "end_date must be after start_date".to_string(),
        ));
    }
    let value_ok = match voucher_type {
        VoucherType::Fixed => value > Decimal::ZERO,
        VoucherType::Percent => value > Decimal::ZERO && value <= Decimal::ONE_HUNDRED,
        VoucherType::Freeship => value >= Decimal::ZERO,
    };
    if !value_ok {
        return Err(ServiceError::ValidationError(format!(
            "value {value} is not valid for a {voucher_type} voucher"
        )));
    }
    Ok(())
}

async fn ensure_code_free<C>(conn: &C, code: &str, except_id: Option<i32>) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = Voucher::find().filter(voucher::Column::Code.eq(code));
    if let Some(id) = except_id {
        query = query.filter(voucher::Column::Id.ne(id));
    }
    if query.one(conn).await?.is_some() {
        return Err(ServiceError::InvalidOperation(format!(
            "voucher code {code} already exists"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct VoucherService {
    db: Arc<DatabaseConnection>,
}

impl VoucherService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Vouchers the user could apply right now, soonest to expire first.
    #[instrument(skip(self))]
    pub async fn list_available(&self, user_id: i32) -> Result<Vec<AvailableVoucher>, ServiceError> {
        let rows = redeemable_grants(user_id, Utc::now())
            .order_by_asc(voucher::Column::EndDate)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(grant, voucher)| {
                voucher.map(|v| AvailableVoucher {
                    user_voucher_id: grant.id,
                    code: v.code,
                    description: v.description,
                    voucher_type: v.voucher_type,
                    value: v.value,
                    end_date: v.end_date,
                })
            })
            .collect())
    }

    /// Every voucher, newest first.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<voucher::Model>, ServiceError> {
        Ok(Voucher::find()
            .order_by_desc(voucher::Column::Id)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreateVoucherInput) -> Result<voucher::Model, ServiceError> {
        input.validate()?;
        check_terms(input.voucher_type, input.value, input.start_date, input.end_date)?;

        let code = normalize_code(&input.code);
        let db = &*self.db;
        ensure_code_free(db, &code, None).await?;

        let created = voucher::ActiveModel {
            code: Set(code),
            description: Set(input.description),
            voucher_type: Set(input.voucher_type),
            value: Set(input.value),
            start_date: Set(input.start_date),
            end_date: Set(input.end_date),
            is_active: Set(input.is_active),
            used_count: Set(0),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(voucher_id = created.id, code = %created.code, "Voucher created");
        Ok(created)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        voucher_id: i32,
        input: UpdateVoucherInput,
    ) -> Result<voucher::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db;
        let current = find_voucher(db, voucher_id).await?;

        let voucher_type = input.voucher_type.unwrap_or(current.voucher_type);
        let value = input.value.unwrap_or(current.value);
        let start_date = input.start_date.unwrap_or(current.start_date);
        let end_date = input.end_date.unwrap_or(current.end_date);
        check_terms(voucher_type, value, start_date, end_date)?;

        let code = match &input.code {
            Some(code) => {
                let code = normalize_code(code);
                if code != current.code {
                    ensure_code_free(db, &code, Some(voucher_id)).await?;
                }
                code
            }
            None => current.code.clone(),
        };

        let mut active: voucher::ActiveModel = current.into();
        active.code = Set(code);
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        active.voucher_type = Set(voucher_type);
        active.value = Set(value);
        active.start_date = Set(start_date);
        active.end_date = Set(end_date);
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        let updated = active.update(db).await?;

        info!(voucher_id, "Voucher updated");
        Ok(updated)
    }

    /// Switches the voucher off. Unused grants stop being redeemable; used
    /// grants keep pointing at their orders.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, voucher_id: i32) -> Result<voucher::Model, ServiceError> {
        let db = &*self.db;
        let current = find_voucher(db, voucher_id).await?;
        let mut active: voucher::ActiveModel = current.into();
        active.is_active = Set(false);
        let updated = active.update(db).await?;

        info!(voucher_id, "Voucher deactivated");
        Ok(updated)
    }

    /// Adds one single-use grant of the voucher to the user's wallet.
    #[instrument(skip(self))]
    pub async fn grant(
        &self,
        voucher_id: i32,
        user_id: i32,
    ) -> Result<user_voucher::Model, ServiceError> {
        let db = &*self.db;
        find_voucher(db, voucher_id).await?;
        user::Entity::find_by_id(user_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))?;

        let grant = user_voucher::ActiveModel {
            user_id: Set(user_id),
            voucher_id: Set(voucher_id),
            is_used: Set(false),
            used_at: Set(None),
            order_id: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(voucher_id, user_id, grant_id = grant.id, "Voucher granted");
        Ok(grant)
    }
}

async fn find_voucher<C>(conn: &C, voucher_id: i32) -> Result<voucher::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Voucher::find_by_id(voucher_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("voucher {voucher_id}")))
}
