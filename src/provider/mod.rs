//! Usage: HostProvider trait definition - one implementation per hosting service.
//!
//! The registry matches a request to a provider through `is_supported`; the provider then
//! owns key derivation, mode discovery and credential generation for that host family.
//! `get`/`store`/`erase` share one implementation in `base` unless a provider overrides them.

pub(crate) mod base;
mod bitbucket;
mod generic;
mod github;
mod gitea;
mod gitee;
mod gitlab;
pub mod registry;

use crate::app::context::CommandContext;
use crate::auth::modes::AuthenticationModes;
use crate::credential::Credential;
use crate::protocol::input::InputArguments;
use crate::shared::error::AppResult;
use std::future::Future;
use std::pin::Pin;

pub use bitbucket::BitbucketHostProvider;
pub use generic::GenericHostProvider;
pub use gitea::GiteaHostProvider;
pub use gitee::GiteeHostProvider;
pub use github::GitHubHostProvider;
pub use gitlab::GitLabHostProvider;
pub use registry::{HostProviderRegistry, HostProviderRegistryBuilder, Priority};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Generic,
    GitHub,
    GitLab,
    Gitea,
    Gitee,
    Bitbucket,
}

/// Object-safe so the registry can hold `Arc<dyn HostProvider>`.
pub trait HostProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Stable id used by `GCM_PROVIDER` / `credential.provider`.
    fn id(&self) -> &'static str;

    /// Display name shown in prompts.
    fn name(&self) -> &'static str;

    /// Pure predicate on protocol/host; no I/O.
    fn is_supported(&self, input: &InputArguments) -> bool;

    fn service_name(&self, input: &InputArguments) -> AppResult<String> {
        base::default_service_name(input)
    }

    /// Reject requests this provider refuses to authenticate (e.g. plain http).
    fn validate_request(&self, _input: &InputArguments) -> AppResult<()> {
        Ok(())
    }

    fn supported_modes<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<AuthenticationModes>>;

    /// Drive the authentication engine for a store miss.
    fn generate_credential<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
        modes: AuthenticationModes,
    ) -> BoxFuture<'a, AppResult<Credential>>;

    fn uses_refresh_tokens(&self) -> bool {
        false
    }

    /// Silent renewal from a stored refresh token; `Ok(None)` when there is nothing to refresh.
    fn refresh_credential<'a>(
        &'a self,
        _ctx: &'a CommandContext,
        _input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<Option<Credential>>> {
        Box::pin(async { Ok(None) })
    }

    fn get_credential<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<Credential>> {
        Box::pin(base::get_credential(self, ctx, input))
    }

    fn store_credential<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(base::store_credential(self, ctx, input))
    }

    /// `Ok(false)` when nothing matching was stored.
    fn erase_credential<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<bool>> {
        Box::pin(base::erase_credential(self, ctx, input))
    }
}
