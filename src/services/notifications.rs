//! Order confirmation mail, sent after checkout has committed.
//!
//! Delivery is best effort. [`Notifier::order_placed`] reports whether the
//! message went out but never returns an error: the order it describes is
//! already durable and must not look failed because a relay was down.

use crate::{
    config::MailConfig,
    entities::{order, order_item, PaymentMethod},
    errors::ServiceError,
    services::commerce::address_service::ShippingAddressSnapshot,
};
use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use std::{fmt::Write as _, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("mail relay request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail relay rejected the message with status {0}")]
    Rejected(u16),
    #[error("mail delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl From<NotificationError> for ServiceError {
    fn from(err: NotificationError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationLine {
    pub product_name: String,
    pub size: String,
    pub color: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Everything the customer sees in the confirmation message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub items: Vec<ConfirmationLine>,
    pub shipping_address: ShippingAddressSnapshot,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
}

impl OrderConfirmation {
    pub fn from_order(
        order: &order::Model,
        items: &[order_item::Model],
        shipping_address: ShippingAddressSnapshot,
    ) -> Self {
        Self {
            order_number: order.order_number.clone(),
            items: items
                .iter()
                .map(|item| ConfirmationLine {
                    product_name: item.product_name.clone(),
                    size: item.size.clone(),
                    color: item.color.clone(),
                    quantity: item.quantity,
                    unit_price: item.price,
                })
                .collect(),
            shipping_address,
            subtotal: order.total_amount,
            shipping_fee: order.shipping_fee,
            discount_amount: order.discount_amount,
            final_amount: order.final_amount,
            currency: order.currency.clone(),
            payment_method: order.payment_method,
        }
    }

    pub fn subject(&self) -> String {
        format!("Order {} confirmed", self.order_number)
    }

    pub fn text_body(&self) -> String {
        let mut body = format!("Thank you for your order {}.\n\n", self.order_number);
        for line in &self.items {
            let _ = writeln!(
                body,
                "{} x {} ({}, {}) @ {} {}",
                line.quantity, line.product_name, line.size, line.color, line.unit_price, self.currency
            );
        }
        let addr = &self.shipping_address;
        let _ = write!(
            body,
            "\nShip to: {} ({})\n{}\n\nSubtotal: {cur} {}\nShipping: {cur} {}\nDiscount: {cur} {}\nTotal: {cur} {}\nPayment: {}\n",
            addr.recipient_name,
            addr.phone,
            addr.one_line(),
            self.subtotal,
            self.shipping_fee,
            self.discount_amount,
            self.final_amount,
            self.payment_method,
            cur = self.currency,
        );
        body
    }
}

/// Outbound channel for order confirmations.
#[async_trait]
pub trait OrderMailer: Send + Sync {
    async fn send_order_confirmation(
        &self,
        to: &str,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError>;
}

/// Writes confirmations to the log. Used when no relay is configured.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl OrderMailer for LogMailer {
    async fn send_order_confirmation(
        &self,
        to: &str,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        info!(
            to,
            order_number = %confirmation.order_number,
            final_amount = %confirmation.final_amount,
            "Order confirmation (log mailer)"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    text: String,
    order: &'a OrderConfirmation,
}

/// Posts confirmations as JSON to an HTTP mail relay.
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
    api_key: Option<String>,
    from_address: String,
}

impl HttpMailer {
    pub fn new(
        relay_url: impl Into<String>,
        api_key: Option<String>,
        from_address: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
            api_key,
            from_address: from_address.into(),
        })
    }
}

#[async_trait]
impl OrderMailer for HttpMailer {
    async fn send_order_confirmation(
        &self,
        to: &str,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        let message = RelayMessage {
            from: &self.from_address,
            to,
            subject: confirmation.subject(),
            text: confirmation.text_body(),
            order: confirmation,
        };

        let mut request = self.client.post(&self.relay_url).json(&message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(NotificationError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Post-commit notifier.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn OrderMailer>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn OrderMailer>, timeout: Duration) -> Self {
        Self { mailer, timeout }
    }

    /// HTTP relay when one is configured, log-only otherwise.
    pub fn from_config(cfg: &MailConfig) -> Result<Self, ServiceError> {
        let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
        let mailer: Arc<dyn OrderMailer> = match &cfg.relay_url {
            Some(url) => Arc::new(HttpMailer::new(
                url.clone(),
                cfg.api_key.clone(),
                cfg.from_address.clone(),
                timeout,
            )?),
            None => Arc::new(LogMailer),
        };
        Ok(Self::new(mailer, timeout))
    }

    /// Sends the confirmation once. Failures are logged and counted, never
    /// retried and never returned.
    #[instrument(skip(self, confirmation), fields(order_number = %confirmation.order_number))]
    pub async fn order_placed(&self, to: &str, confirmation: &OrderConfirmation) -> bool {
        let outcome = tokio::time::timeout(
            self.timeout,
            self.mailer.send_order_confirmation(to, confirmation),
        )
        .await
        .unwrap_or(Err(NotificationError::Timeout(self.timeout)));

        match outcome {
            Ok(()) => {
                info!("Order confirmation sent");
                true
            }
            Err(error) => {
                counter!("notification.failed", 1, "kind" => "order_confirmation");
                warn!(%error, "Order confirmation could not be delivered");
                false
            }
        }
    }
}
