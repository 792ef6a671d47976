pub mod auth;
pub mod cart;
pub mod orders;
pub mod payments;
