use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::entities::OrderStatus;

/// Domain events emitted after a unit of work has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: i32,
        user_id: i32,
        final_amount: Decimal,
        placed_at: DateTime<Utc>,
    },
    OrderPaid(i32),
    OrderStatusChanged {
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    VoucherRedeemed {
        user_voucher_id: i32,
        order_id: i32,
    },
    GuestCartMerged {
        user_id: i32,
        merged_lines: usize,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Events are published after commit, so a lost event never undoes the write.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Turns committed domain events into business counters.
#[derive(Debug, Default, Clone)]
pub struct SalesMetricsHandler;

#[async_trait]
impl EventHandler for SalesMetricsHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::OrderPlaced { final_amount, .. } => {
                counter!("storefront.orders.placed", 1);
                histogram!(
                    "storefront.orders.final_amount",
                    final_amount.to_f64().unwrap_or_default()
                );
            }
            Event::OrderPaid(_) => {
                counter!("storefront.orders.paid", 1);
            }
            Event::OrderStatusChanged { new_status, .. } => {
                counter!(
                    "storefront.orders.status_changed",
                    1,
                    "status" => new_status.to_string()
                );
            }
            Event::VoucherRedeemed { .. } => {
                counter!("storefront.vouchers.redeemed", 1);
            }
            Event::GuestCartMerged { merged_lines, .. } => {
                counter!("storefront.carts.merged", 1);
                histogram!("storefront.carts.merged_lines", *merged_lines as f64);
            }
        }
        Ok(())
    }
}

/// Drains the event channel, fanning every event out to the registered handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                user_id,
                final_amount,
                ..
            } => info!(order_id, user_id, %final_amount, "order placed"),
            Event::OrderPaid(order_id) => info!(order_id, "order paid"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(order_id, %old_status, %new_status, "order status changed"),
            Event::VoucherRedeemed {
                user_voucher_id,
                order_id,
            } => info!(user_voucher_id, order_id, "voucher redeemed"),
            Event::GuestCartMerged {
                user_id,
                merged_lines,
            } => info!(user_id, merged_lines, "guest cart merged"),
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!("Event handler failed for {:?}: {}", event, e);
            }
        }
    }

    info!("Event channel closed; stopping event processing loop");
}
