mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use git_credential_keeper::app::context::CommandContext;
use git_credential_keeper::auth::modes::{AuthMode, AuthenticationModes};
use git_credential_keeper::credential::Credential;
use git_credential_keeper::protocol::commands::CredentialCommand;
use git_credential_keeper::protocol::input::InputArguments;
use git_credential_keeper::provider::{
    BoxFuture, GenericHostProvider, GitHubHostProvider, HostProvider, HostProviderRegistry,
    Priority, ProviderKind,
};
use git_credential_keeper::run_command;
use git_credential_keeper::shared::error::{AppResult, NO_PROVIDER_FOUND};
use git_credential_keeper::store::MemoryCredentialStore;
use git_credential_keeper::test_support::{ScriptedPrompt, TestContextBuilder};
use support::{input, run};

/// Claims every host ending in `.corp.example` and hands out a fixed token.
#[derive(Default)]
struct CorpProvider {
    generated: AtomicUsize,
}

impl HostProvider for CorpProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Generic
    }

    fn id(&self) -> &'static str {
        "corp"
    }

    fn name(&self) -> &'static str {
        "Corp"
    }

    fn is_supported(&self, input: &InputArguments) -> bool {
        input
            .host_name()
            .is_some_and(|host| host.ends_with(".corp.example"))
    }

    fn supported_modes<'a>(
        &'a self,
        _ctx: &'a CommandContext,
        _input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<AuthenticationModes>> {
        Box::pin(async { Ok(AuthenticationModes::PAT) })
    }

    fn generate_credential<'a>(
        &'a self,
        _ctx: &'a CommandContext,
        _input: &'a InputArguments,
        _modes: AuthenticationModes,
    ) -> BoxFuture<'a, AppResult<Credential>> {
        Box::pin(async move {
            self.generated.fetch_add(1, Ordering::SeqCst);
            Ok(Credential::token(Some("svc".into()), "corp-token"))
        })
    }
}

#[tokio::test]
async fn higher_priority_provider_wins_over_generic_fallback() {
    let corp = Arc::new(CorpProvider::default());
    let registry = HostProviderRegistry::builder()
        .register(Arc::new(GenericHostProvider), Priority::Low)
        .register(corp.clone(), Priority::Normal)
        .build();
    assert_eq!(registry.provider_ids(), ["corp", "generic"]);

    let ctx = TestContextBuilder::new().build();
    let request = input("protocol=https\nhost=git.corp.example\n\n");
    let mut out = Vec::new();
    run_command(&ctx, &registry, CredentialCommand::Get, &request, &mut out)
        .await
        .expect("get");
    assert_eq!(
        String::from_utf8(out).expect("utf8"),
        "username=svc\npassword=corp-token\n\n"
    );

    // Second request is a cache hit; the provider is not asked again.
    let mut out = Vec::new();
    run_command(&ctx, &registry, CredentialCommand::Get, &request, &mut out)
        .await
        .expect("cached get");
    assert_eq!(corp.generated.load(Ordering::SeqCst), 1);
}

#[test]
fn same_priority_keeps_registration_order() {
    let registry = HostProviderRegistry::builder()
        .register(Arc::new(GitHubHostProvider), Priority::Low)
        .register(Arc::new(CorpProvider::default()), Priority::High)
        .register(Arc::new(GenericHostProvider), Priority::Low)
        .build();
    assert_eq!(registry.provider_ids(), ["corp", "github", "generic"]);
}

#[test]
fn provider_override_bypasses_detection() {
    let registry = HostProviderRegistry::with_default_providers();
    let settings = TestContextBuilder::new()
        .env("GCM_PROVIDER", "gitlab")
        .settings();
    let provider = registry
        .get_provider(&settings, &input("protocol=https\nhost=code.example.com\n\n"))
        .expect("provider");
    assert_eq!(provider.id(), "gitlab");

    let settings = TestContextBuilder::new()
        .git("provider", "GitHub")
        .settings();
    let provider = registry
        .get_provider(&settings, &input("protocol=https\nhost=code.example.com\n\n"))
        .expect("provider");
    assert_eq!(provider.kind(), ProviderKind::GitHub);
}

#[test]
fn unknown_override_falls_back_to_detection() {
    let registry = HostProviderRegistry::with_default_providers();
    let settings = TestContextBuilder::new()
        .env("GCM_PROVIDER", "sourceforge")
        .settings();
    let provider = registry
        .get_provider(&settings, &input("protocol=https\nhost=github.com\n\n"))
        .expect("provider");
    assert_eq!(provider.id(), "github");
}

#[test]
fn unmatched_host_without_fallback_is_reported() {
    let registry = HostProviderRegistry::builder()
        .register(Arc::new(GitHubHostProvider), Priority::Normal)
        .build();
    let err = registry
        .get_provider(
            &TestContextBuilder::new().settings(),
            &input("protocol=https\nhost=git.example.com\n\n"),
        )
        .err()
        .expect("no provider");
    assert!(err.is(NO_PROVIDER_FOUND));
}

#[test]
fn well_known_hosts_pick_their_provider() {
    let registry = HostProviderRegistry::with_default_providers();
    let settings = TestContextBuilder::new().settings();
    let cases = [
        ("github.com", ProviderKind::GitHub),
        ("gist.github.com", ProviderKind::GitHub),
        ("gitlab.com", ProviderKind::GitLab),
        ("bitbucket.org", ProviderKind::Bitbucket),
        ("gitea.example.com", ProviderKind::Gitea),
        ("gitee.com", ProviderKind::Gitee),
        ("git.example.com", ProviderKind::Generic),
    ];
    for (host, expected) in cases {
        let provider = registry
            .get_provider(&settings, &input(&format!("protocol=https\nhost={host}\n\n")))
            .expect("provider");
        assert_eq!(provider.kind(), expected, "{host}");
    }
}

#[tokio::test]
async fn github_request_offers_modes_and_stores_the_token() {
    let store = Arc::new(MemoryCredentialStore::new());
    let prompt = ScriptedPrompt::new()
        .with_mode(AuthMode::Pat)
        .with_token("ghp_example");
    let ctx = TestContextBuilder::new()
        .store(store.clone())
        .prompt(prompt.clone())
        .build();

    let (result, out) = run(
        &ctx,
        CredentialCommand::Get,
        "protocol=https\nhost=github.com\nusername=octocat\n\n",
    )
    .await;
    result.expect("get");
    assert_eq!(out, "username=octocat\npassword=ghp_example\n\n");

    let offered = prompt.offered_modes();
    assert_eq!(offered.len(), 1);
    assert!(offered[0].contains(&AuthMode::Pat));
    assert!(offered[0].contains(&AuthMode::DeviceCode));
    assert!(!offered[0].contains(&AuthMode::Browser));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn github_mode_override_skips_selection() {
    let prompt = ScriptedPrompt::new().with_token("ghp_forced");
    let ctx = TestContextBuilder::new()
        .env("GCM_GITHUB_AUTHMODES", "pat")
        .prompt(prompt.clone())
        .build();

    let (result, out) = run(
        &ctx,
        CredentialCommand::Get,
        "protocol=https\nhost=github.com\nusername=octocat\n\n",
    )
    .await;
    result.expect("get");
    assert_eq!(out, "username=octocat\npassword=ghp_forced\n\n");
    assert!(prompt.offered_modes().is_empty());
    assert_eq!(prompt.calls(), 1);
}
