//! Readiness probe over the event repository.

use std::sync::Arc;

use async_trait::async_trait;

use crate::port::outbound::health::DependencyProbe;
use crate::port::outbound::persistence::EventRepository;

/// Reports as `sqlite` and also answers to `postgres` and `database`.
pub struct DatabaseProbe {
    repository: Arc<dyn EventRepository>,
}

impl DatabaseProbe {
    pub const NAME: &'static str = "sqlite";
    pub const ALIASES: &'static [&'static str] = &["postgres", "database"];

    #[must_use]
    pub fn new(repository: Arc<dyn EventRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl DependencyProbe for DatabaseProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aliases(&self) -> &[&str] {
        Self::ALIASES
    }

    async fn check(&self) -> Result<(), String> {
        self.repository.ping().await.map_err(|e| e.to_string())
    }
}
