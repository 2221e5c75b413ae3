// Pricing and checkout
pub mod cart;
pub mod checkout;
pub mod currency;
pub mod pricing;

// Settlement
pub mod orders;

// Push fanout and inbox
pub mod notifications;

// Service factory for dependency injection
pub mod factory;
