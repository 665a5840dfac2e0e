//! Pipeline event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PipelineEvent`]: the event envelope published by the orchestrator.
//! - [`EventLogger`]: background task that logs every event it receives.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, PipelineEvent};
pub use logger::EventLogger;
