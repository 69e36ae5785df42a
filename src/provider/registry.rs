//! Usage: HostProviderRegistry - ordered provider matching by priority and support predicate.
//!
//! Registration happens once through the builder; `build()` freezes the order.

use super::{
    BitbucketHostProvider, GenericHostProvider, GiteaHostProvider, GiteeHostProvider,
    GitHubHostProvider, GitLabHostProvider, HostProvider,
};
use crate::infra::settings::Settings;
use crate::protocol::input::InputArguments;
use crate::shared::error::{AppResult, NO_PROVIDER_FOUND};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

pub struct HostProviderRegistration {
    pub provider: Arc<dyn HostProvider>,
    pub priority: Priority,
}

#[derive(Default)]
pub struct HostProviderRegistryBuilder {
    registrations: Vec<HostProviderRegistration>,
}

impl HostProviderRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn HostProvider>, priority: Priority) -> Self {
        self.registrations
            .push(HostProviderRegistration { provider, priority });
        self
    }

    pub fn build(mut self) -> HostProviderRegistry {
        // Stable: registration order is kept within a priority.
        self.registrations.sort_by_key(|r| r.priority);
        HostProviderRegistry {
            registrations: self.registrations,
        }
    }
}

pub struct HostProviderRegistry {
    registrations: Vec<HostProviderRegistration>,
}

impl HostProviderRegistry {
    pub fn builder() -> HostProviderRegistryBuilder {
        HostProviderRegistryBuilder::new()
    }

    /// Every built-in provider; the generic fallback sits at `Low`.
    pub fn with_default_providers() -> Self {
        Self::builder()
            .register(Arc::new(GitHubHostProvider), Priority::Normal)
            .register(Arc::new(GitLabHostProvider), Priority::Normal)
            .register(Arc::new(GiteaHostProvider), Priority::Normal)
            .register(Arc::new(GiteeHostProvider), Priority::Normal)
            .register(Arc::new(BitbucketHostProvider), Priority::Normal)
            .register(Arc::new(GenericHostProvider), Priority::Low)
            .build()
    }

    pub fn provider_ids(&self) -> Vec<&'static str> {
        self.registrations.iter().map(|r| r.provider.id()).collect()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<dyn HostProvider>> {
        self.registrations
            .iter()
            .find(|r| r.provider.id().eq_ignore_ascii_case(id))
            .map(|r| Arc::clone(&r.provider))
    }

    pub fn get_provider(
        &self,
        settings: &Settings,
        input: &InputArguments,
    ) -> AppResult<Arc<dyn HostProvider>> {
        input.validate()?;

        if let Some(id) = settings.provider_override() {
            if let Some(provider) = self.get_by_id(&id) {
                tracing::debug!(provider = provider.id(), "provider selected by override");
                return Ok(provider);
            }
            eprintln!("warning: unknown provider '{id}'; falling back to auto-detection");
            tracing::warn!(provider = %id, "unknown provider override; auto-detecting");
        }

        let matched = self
            .registrations
            .iter()
            .find(|r| r.provider.is_supported(input))
            .map(|r| Arc::clone(&r.provider));
        match matched {
            Some(provider) => {
                tracing::debug!(provider = provider.id(), host = input.host().unwrap_or_default(), "provider matched");
                Ok(provider)
            }
            None => Err(format!(
                "{NO_PROVIDER_FOUND}: no host provider supports '{}'",
                input.resource()
            )
            .into()),
        }
    }
}
