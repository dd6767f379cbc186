//! Infrastructure configuration modules.

pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod service;
pub mod settings;

pub use settings::Config;
