//! Shopper-facing storefront endpoints: carts, saved addresses and vouchers.

pub mod addresses;
pub mod carts;
pub mod vouchers;

pub use addresses::addresses_routes;
pub use carts::{carts_routes, guest_cart_routes};
pub use vouchers::{admin_vouchers_routes, vouchers_routes};
