pub mod commerce;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        commerce::{AddressService, CartService, CheckoutService, ShippingPolicy, VoucherService},
        notifications::Notifier,
        orders::OrderService,
        payments::{PaymentGateway, PaymentService},
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub addresses: Arc<AddressService>,
    pub vouchers: Arc<VoucherService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Build the service container around an explicit notifier.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        notifier: Notifier,
    ) -> Self {
        let gateway = Arc::new(PaymentGateway::new(
            config.payment.clone(),
            config.currency.clone(),
        ));

        let cart = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let addresses = Arc::new(AddressService::new(db_pool.clone()));
        let vouchers = Arc::new(VoucherService::new(db_pool.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway.clone(),
            notifier,
            ShippingPolicy::from_config(config),
            config.currency.clone(),
        ));
        let orders = Arc::new(OrderService::new(db_pool.clone(), event_sender.clone()));
        let payments = Arc::new(PaymentService::new(db_pool, gateway, event_sender));

        Self {
            cart,
            addresses,
            vouchers,
            checkout,
            orders,
            payments,
        }
    }

    /// Build the service container with the mailer described by `config.mail`.
    pub fn from_config(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let notifier = Notifier::from_config(&config.mail)?;
        Ok(Self::new(db_pool, event_sender, config, notifier))
    }
}
