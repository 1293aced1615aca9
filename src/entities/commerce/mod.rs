/// Commerce entities module
pub mod address;
pub mod cart;
pub mod cart_item;
pub mod product_variant;
pub mod user_voucher;
pub mod voucher;

// Re-export entities
pub use address::{Entity as Address, Model as AddressModel};
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use user_voucher::{Entity as UserVoucher, Model as UserVoucherModel};
pub use voucher::{Entity as Voucher, Model as VoucherModel, VoucherType};
