//! Provider-agnostic event model and schema validation. Depends on nothing
//! outside the crate's error types.

pub mod event;
pub mod id;
pub mod validation;

pub use event::{Event, FunnelStage, Source};
pub use id::CorrelationId;
pub use validation::{validate, FieldViolation, ValidationFailure};
