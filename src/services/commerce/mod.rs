/// Commerce services module - cart, addresses, vouchers, pricing and checkout
pub mod address_service;
pub mod cart_service;
pub mod checkout_service;
pub mod pricing_service;
pub mod voucher_service;

// Re-export services for convenience
pub use address_service::{AddressInput, AddressService, ShippingAddressSnapshot};
pub use cart_service::{AddToCartInput, CartLine, CartOwner, CartService, CartView, UpdateCartItemInput};
pub use checkout_service::{CheckoutService, PlaceOrderRequest, PlaceOrderResponse};
pub use pricing_service::{PriceQuote, ShippingPolicy, VoucherEffect};
pub use voucher_service::{
    AvailableVoucher, CreateVoucherInput, GrantVoucherInput, UpdateVoucherInput, VoucherService,
};
