//! Usage: get / store / erase dispatch from a parsed request to the matching provider.

use super::input::InputArguments;
use super::output::write_credential;
use crate::app::context::CommandContext;
use crate::provider::HostProviderRegistry;
use crate::shared::error::AppResult;
use std::io::Write;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialCommand {
    Get,
    Store,
    Erase,
}

impl CredentialCommand {
    pub fn name(self) -> &'static str {
        match self {
            CredentialCommand::Get => "get",
            CredentialCommand::Store => "store",
            CredentialCommand::Erase => "erase",
        }
    }
}

/// Run one command; only `get` writes to `out`.
pub async fn execute(
    ctx: &CommandContext,
    registry: &HostProviderRegistry,
    command: CredentialCommand,
    input: &InputArguments,
    out: &mut (dyn Write + Send),
) -> AppResult<()> {
    let started = Instant::now();
    let provider = registry.get_provider(&ctx.settings, input)?;

    let result = match command {
        CredentialCommand::Get => match provider.get_credential(ctx, input).await {
            Ok(credential) => write_credential(out, &credential),
            Err(err) => Err(err),
        },
        CredentialCommand::Store => provider.store_credential(ctx, input).await,
        CredentialCommand::Erase => provider.erase_credential(ctx, input).await.map(|removed| {
            if !removed {
                tracing::trace!(provider = provider.id(), "erase found nothing to remove");
            }
        }),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => tracing::info!(
            command = command.name(),
            provider = provider.id(),
            elapsed_ms,
            outcome = "ok",
            "command finished"
        ),
        Err(err) => tracing::info!(
            command = command.name(),
            provider = provider.id(),
            elapsed_ms,
            outcome = err.code(),
            "command failed"
        ),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use crate::store::{CredentialStore, MemoryCredentialStore, SecretStoreKey};
    use crate::test_support::TestContextBuilder;
    use std::sync::Arc;

    #[tokio::test]
    async fn get_writes_cached_credential() {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .add_or_update(
                &SecretStoreKey::new("git", "https://git.example.com", Some("alice".into())),
                &Credential::password("alice", "pw"),
            )
            .expect("seed");
        let ctx = TestContextBuilder::new().store(store).build();
        let input = InputArguments::parse_str("protocol=https\nhost=git.example.com\n").expect("input");

        let mut out = Vec::new();
        execute(
            &ctx,
            &HostProviderRegistry::with_default_providers(),
            CredentialCommand::Get,
            &input,
            &mut out,
        )
        .await
        .expect("get");
        assert_eq!(String::from_utf8(out).expect("utf8"), "username=alice\npassword=pw\n\n");
    }

    #[tokio::test]
    async fn store_and_erase_write_nothing_to_stdout() {
        let ctx = TestContextBuilder::new().build();
        let registry = HostProviderRegistry::with_default_providers();
        let input = InputArguments::parse_str(
            "protocol=https\nhost=git.example.com\nusername=bob\npassword=pw\n",
        )
        .expect("input");

        let mut out = Vec::new();
        execute(&ctx, &registry, CredentialCommand::Store, &input, &mut out)
            .await
            .expect("store");
        execute(&ctx, &registry, CredentialCommand::Erase, &input, &mut out)
            .await
            .expect("erase");
        assert!(out.is_empty());
    }
}
