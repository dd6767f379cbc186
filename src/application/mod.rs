//! Application services (use cases).
//!
//! These services orchestrate the domain model and coordinate the outbound
//! ports to implement intake, durable buffering, delivery, consumption and shutdown.

pub mod consumer;
pub mod context;
pub mod dead_letter;
pub mod dispatcher;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod publisher;
pub mod queue;
pub mod shutdown;
