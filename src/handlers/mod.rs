pub mod cart;
pub mod coerce;
pub mod common;
pub mod health;
pub mod notifications;
pub mod orders;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
