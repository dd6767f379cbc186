//! Health probe port.

use async_trait::async_trait;

/// A named dependency the readiness check can interrogate.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Name matched against the configured dependency list.
    fn name(&self) -> &str;

    /// Other dependency names this probe answers to.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Whether `dependency` from configuration refers to this probe.
    fn answers_to(&self, dependency: &str) -> bool {
        self.name() == dependency || self.aliases().contains(&dependency)
    }

    /// `Ok(())` when healthy, otherwise a human-readable reason.
    async fn check(&self) -> Result<(), String>;
}
