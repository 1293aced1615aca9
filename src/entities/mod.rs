//! sea-orm entities for the storefront schema.

pub mod commerce;
pub mod order;
pub mod order_item;
pub mod product;
pub mod user;

pub use order::{OrderStatus, PaymentMethod, PaymentStatus};
