//! Lifecycle event publishing.

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};
