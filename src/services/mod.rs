pub mod carts;
pub mod catalog;
pub mod settlement;
