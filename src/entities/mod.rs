pub mod cart;
pub mod cart_item;
pub mod checkout_attempt;
pub mod order;
pub mod order_item;
