use clap::{Parser, Subcommand};
use git_credential_keeper::app::logging;
use git_credential_keeper::app::session::Session;
use git_credential_keeper::protocol::commands::CredentialCommand;
use git_credential_keeper::{run_from_stdin, version_string};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "git-credential-keeper")]
#[command(version, about = "Git credential helper with OAuth, PAT and OS keyring support")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Return a credential for the request on stdin
    Get,
    /// Store the credential on stdin
    Store,
    /// Erase the credential matching the request on stdin
    Erase,
    /// Print the helper version
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = match cli.command {
        Commands::Version => {
            println!("{}", version_string());
            return ExitCode::SUCCESS;
        }
        Commands::Get => CredentialCommand::Get,
        Commands::Store => CredentialCommand::Store,
        Commands::Erase => CredentialCommand::Erase,
    };

    let trace = std::env::var("GCM_TRACE").ok();
    let _logging = logging::init(trace.as_deref());
    let session = Session::start();

    let exit_code = match run_from_stdin(&session, command) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(code = err.code(), command = command.name(), "command failed");
            eprintln!("fatal: {}", err.message());
            1
        }
    };
    session.finish(exit_code);
    ExitCode::from(exit_code as u8)
}
