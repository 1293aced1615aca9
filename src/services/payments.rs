//! Redirect-and-return payment gateway.
//!
//! Outbound: [`PaymentGateway::payment_url`] signs the order reference and
//! amount with HMAC-SHA512. Inbound: [`PaymentService::handle_return`]
//! verifies the provider's signature over the same canonical form, then ties
//! the claimed amount back to the order's stored `final_amount` before any
//! state changes.

use crate::{
    config::PaymentGatewayConfig,
    entities::{order, OrderStatus, PaymentMethod, PaymentStatus},
    errors::{ServiceError, PAYMENT_UNVERIFIED_MESSAGE},
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::form_urlencoded::byte_serialize;
use utoipa::ToSchema;

type HmacSha512 = Hmac<Sha512>;

const PARAM_PREFIX: &str = "vnp_";
const SECURE_HASH: &str = "vnp_SecureHash";
const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";

/// Gateway result codes returned to the storefront.
pub mod codes {
    pub const SUCCESS: &str = "00";
    pub const ORDER_NOT_FOUND: &str = "01";
    pub const ALREADY_PAID: &str = "02";
    /// Order was cancelled or returned before the payment came back.
    pub const ORDER_CLOSED: &str = "03";
    pub const AMOUNT_MISMATCH: &str = "04";
    pub const INVALID_SIGNATURE: &str = "97";
}

/// Amount in minor units, as the provider expects it.
pub fn minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount {amount} out of range")))
}

/// Canonical form signed in both directions.
///
/// Keeps `vnp_*` parameters other than the signature fields, sorts them by
/// key, form-urlencodes keys and values and joins `k=v` pairs with `&`.
pub fn canonicalize<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let sorted: BTreeMap<&str, &str> = params
        .into_iter()
        .filter(|(key, _)| {
            key.starts_with(PARAM_PREFIX) && *key != SECURE_HASH && *key != SECURE_HASH_TYPE
        })
        .collect();

    sorted
        .into_iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                byte_serialize(key.as_bytes()).collect::<String>(),
                byte_serialize(value.as_bytes()).collect::<String>()
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Parsed, signature-checked provider return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReturn {
    pub txn_ref: String,
    pub amount: Option<i64>,
    pub response_code: String,
    pub transaction_no: Option<String>,
}

#[derive(Clone)]
pub struct PaymentGateway {
    config: PaymentGatewayConfig,
    currency: String,
}

impl PaymentGateway {
    pub fn new(config: PaymentGatewayConfig, currency: impl Into<String>) -> Self {
        Self {
            config,
            currency: currency.into(),
        }
    }

    fn mac(&self) -> Result<HmacSha512, ServiceError> {
        HmacSha512::new_from_slice(self.config.hash_secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("gateway key: {e}")))
    }

    /// Lowercase hex HMAC-SHA512 of `canonical`
    pub fn sign(&self, canonical: &str) -> Result<String, ServiceError> {
        let mut mac = self.mac()?;
        mac.update(canonical.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Provider URL the customer is redirected to for an ONLINE order.
    pub fn payment_url(
        &self,
        order: &order::Model,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let amount = minor_units(order.final_amount)?.to_string();
        let txn_ref = order.id.to_string();
        let order_info = format!("Payment for order {}", order.order_number);
        let create_date = now.format("%Y%m%d%H%M%S").to_string();

        let params = [
            ("vnp_Version", self.config.version.as_str()),
            ("vnp_Command", "pay"),
            ("vnp_TmnCode", self.config.tmn_code.as_str()),
            ("vnp_Locale", self.config.locale.as_str()),
            ("vnp_CurrCode", self.currency.as_str()),
            ("vnp_TxnRef", txn_ref.as_str()),
            ("vnp_OrderInfo", order_info.as_str()),
            ("vnp_OrderType", self.config.order_type.as_str()),
            ("vnp_Amount", amount.as_str()),
            ("vnp_ReturnUrl", self.config.return_url.as_str()),
            ("vnp_IpAddr", client_ip),
            ("vnp_CreateDate", create_date.as_str()),
        ];

        let canonical = canonicalize(params);
        let signature = self.sign(&canonical)?;
        Ok(format!(
            "{}?{}&{}={}",
            self.config.url, canonical, SECURE_HASH, signature
        ))
    }

    /// Recomputes the signature over the returned parameters and compares it
    /// in constant time with `vnp_SecureHash`.
    pub fn verify_return(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<GatewayReturn, ServiceError> {
        let provided = params
            .get(SECURE_HASH)
            .and_then(|sig| hex::decode(sig.trim()).ok())
            .ok_or(ServiceError::SignatureError)?;

        let canonical = canonicalize(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let mut mac = self.mac()?;
        mac.update(canonical.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| ServiceError::SignatureError)?;

        let field = |name: &str| params.get(name).cloned();
        Ok(GatewayReturn {
            txn_ref: field("vnp_TxnRef").unwrap_or_default(),
            amount: params.get("vnp_Amount").and_then(|a| a.parse().ok()),
            response_code: field("vnp_ResponseCode").unwrap_or_default(),
            transaction_no: field("vnp_TransactionNo"),
        })
    }
}

/// Body of `GET /api/payment/return`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReturnResponse {
    #[schema(example = "00")]
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i32>,
}

impl PaymentReturnResponse {
    fn new(code: &str, message: &str, order_id: Option<i32>) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            order_id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == codes::SUCCESS
    }
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<PaymentGateway>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<PaymentGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    pub fn gateway(&self) -> &PaymentGateway {
        &self.gateway
    }

    /// Applies a provider return for an order owned by `user_id`.
    ///
    /// Rejections are reported through the response code. Only a verified
    /// `00` return whose amount equals the order's `final_amount` moves the
    /// order from PENDING to PAID.
    #[instrument(skip(self, params))]
    pub async fn handle_return(
        &self,
        user_id: i32,
        params: &HashMap<String, String>,
    ) -> Result<PaymentReturnResponse, ServiceError> {
        let verified = match self.gateway.verify_return(params) {
            Ok(verified) => verified,
            Err(ServiceError::SignatureError) => {
                counter!("payment.return.rejected", 1, "reason" => "signature");
                warn!(user_id, "Payment return failed signature verification");
                return Ok(PaymentReturnResponse::new(
                    codes::INVALID_SIGNATURE,
                    PAYMENT_UNVERIFIED_MESSAGE,
                    None,
                ));
            }
            Err(other) => return Err(other),
        };

        let order = match verified.txn_ref.parse::<i32>() {
            Ok(order_id) => {
                order::Entity::find_by_id(order_id)
                    .filter(order::Column::UserId.eq(user_id))
                    .one(&*self.db)
                    .await?
            }
            Err(_) => None,
        };
        let Some(order) = order.filter(|o| o.payment_method == PaymentMethod::Online) else {
            counter!("payment.return.rejected", 1, "reason" => "order");
            return Ok(PaymentReturnResponse::new(
                codes::ORDER_NOT_FOUND,
                "order not found",
                None,
            ));
        };

        if verified.amount != Some(minor_units(order.final_amount)?) {
            counter!("payment.return.rejected", 1, "reason" => "amount");
            warn!(
                order_id = order.id,
                claimed = ?verified.amount,
                "Payment return amount does not match order"
            );
            return Ok(PaymentReturnResponse::new(
                codes::AMOUNT_MISMATCH,
                "amount mismatch",
                Some(order.id),
            ));
        }

        if order.payment_status == PaymentStatus::Paid {
            return Ok(PaymentReturnResponse::new(
                codes::ALREADY_PAID,
                "order already paid",
                Some(order.id),
            ));
        }

        if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Returned) {
            counter!("payment.return.rejected", 1, "reason" => "closed");
            warn!(
                order_id = order.id,
                status = %order.status,
                "Payment return for an order that is no longer open"
            );
            return Ok(PaymentReturnResponse::new(
                codes::ORDER_CLOSED,
                "order is no longer awaiting payment",
                Some(order.id),
            ));
        }

        if verified.response_code != codes::SUCCESS {
            info!(
                order_id = order.id,
                response_code = %verified.response_code,
                "Payment not completed at provider"
            );
            return Ok(PaymentReturnResponse {
                code: verified.response_code,
                message: "payment was not completed".to_string(),
                order_id: Some(order.id),
            });
        }

        let now = Utc::now();
        let updated = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(order::Column::PaidAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(
                order::Column::Status.is_not_in([OrderStatus::Cancelled, OrderStatus::Returned]),
            )
            .exec(&*self.db)
            .await?;

        if updated.rows_affected == 0 {
            // Lost a race with another return or a cancellation.
            let code = match order::Entity::find_by_id(order.id).one(&*self.db).await? {
                Some(current) if current.payment_status == PaymentStatus::Paid => {
                    codes::ALREADY_PAID
                }
                _ => codes::ORDER_CLOSED,
            };
            let message = if code == codes::ALREADY_PAID {
                "order already paid"
            } else {
                "order is no longer awaiting payment"
            };
            return Ok(PaymentReturnResponse::new(code, message, Some(order.id)));
        }

        info!(
            order_id = order.id,
            transaction_no = ?verified.transaction_no,
            "Order paid"
        );
        self.event_sender.send_or_log(Event::OrderPaid(order.id)).await;

        Ok(PaymentReturnResponse::new(
            codes::SUCCESS,
            "payment confirmed",
            Some(order.id),
        ))
    }
}
