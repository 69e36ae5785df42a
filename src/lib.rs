//! Usage: Git credential helper library: provider registry, authentication engine and
//! credential stores behind the `git credential` protocol.

pub mod app;
pub mod auth;
pub mod credential;
pub mod infra;
pub mod prompt;
pub mod protocol;
pub mod provider;
pub mod shared;
pub mod store;
pub mod test_support;

use app::context::CommandContext;
use app::session::Session;
use auth::browser::SystemBrowser;
use infra::settings::Settings;
use prompt::TerminalPrompt;
use protocol::commands::{execute, CredentialCommand};
use protocol::input::InputArguments;
use provider::HostProviderRegistry;
use shared::error::{AppResult, SYSTEM_ERROR};
use std::io::Write;
use std::sync::Arc;
use tracing::Instrument;

pub fn version_string() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Run one command against an already built context.
pub async fn run_command(
    ctx: &CommandContext,
    registry: &HostProviderRegistry,
    command: CredentialCommand,
    input: &InputArguments,
    out: &mut (dyn Write + Send),
) -> AppResult<()> {
    let span = ctx.session.span(command.name());
    execute(ctx, registry, command, input, out)
        .instrument(span)
        .await
}

/// Read the request from stdin, resolve settings for its remote and run `command` on a
/// fresh runtime. Ctrl-C cancels any pending prompt, browser wait or poll.
pub fn run_from_stdin(session: &Session, command: CredentialCommand) -> AppResult<()> {
    let input = InputArguments::read_from(std::io::stdin().lock())?;
    let remote_url = input.remote_url().ok().map(|url| url.to_string());
    let settings = Settings::load(remote_url.as_deref());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("{SYSTEM_ERROR}: failed to start async runtime: {e}"))?;

    let result = runtime.block_on(async {
        let store = store::open_store(&settings)?;
        let ctx = CommandContext::new(
            session.clone(),
            settings,
            store,
            Arc::new(TerminalPrompt),
            Arc::new(SystemBrowser),
        )?;

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received; cancelling");
                cancel.cancel();
            }
        });

        let registry = HostProviderRegistry::with_default_providers();
        let mut stdout = std::io::stdout();
        run_command(&ctx, &registry, command, &input, &mut stdout).await
    });
    // A cancelled terminal prompt may still be parked on its blocking thread.
    runtime.shutdown_background();
    result
}
