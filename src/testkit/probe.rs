//! Fixed-result dependency probe.

use async_trait::async_trait;

use crate::port::outbound::health::DependencyProbe;

pub struct StaticProbe {
    name: String,
    aliases: Vec<&'static str>,
    result: Result<(), String>,
}

impl StaticProbe {
    pub fn healthy(name: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            result: Ok(()),
        }
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            result: Err(reason.to_string()),
        }
    }

    pub fn with_alias(mut self, alias: &'static str) -> Self {
        self.aliases.push(alias);
        self
    }
}

#[async_trait]
impl DependencyProbe for StaticProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn aliases(&self) -> &[&str] {
        &self.aliases
    }

    async fn check(&self) -> Result<(), String> {
        self.result.clone()
    }
}
