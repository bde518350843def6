//! Database connection management.

pub mod connection;

pub use connection::{health_check, init_pool};
