//! gitops-repo CLI - Command line interface for the repository service
//!
//! Reads and writes files, branches and history of remote git repositories
//! through a managed local clone.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gitops_repo_core::{Config, RepositoryService};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{
    AddArgs, BranchArgs, BranchesArgs, CommitArgs, CommitsArgs, ConfigArgs, DeleteCloneArgs, FileArgs, LsArgs,
    RmArgs, SetConfigArgs, UploadArgs,
};

/// Exit code for errors caused by the request rather than the system
const EXIT_CLIENT_ERROR: u8 = 2;

fn parse_timeout(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// gitops-repo: file-level access to remote git repositories
#[derive(Parser, Debug)]
#[command(name = "gitops-repo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Root directory for clones (overrides config and env)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Transport deadline, e.g. "30s" (overrides config and env)
    #[arg(long, global = true, value_parser = parse_timeout)]
    timeout: Option<Duration>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// List branches
    #[command(visible_alias = "br")]
    Branches(BranchesArgs),

    /// Show one branch
    Branch(BranchArgs),

    /// List commits on a branch
    #[command(visible_alias = "log")]
    Commits(CommitsArgs),

    /// Show one commit
    Commit(CommitArgs),

    /// Read a file
    #[command(visible_alias = "cat")]
    File(FileArgs),

    /// List a directory
    Ls(LsArgs),

    /// Add files, commit and push
    Add(AddArgs),

    /// Remove files, commit and push
    Rm(RmArgs),

    /// Stage files for a later add
    Upload(UploadArgs),

    /// Show the clone's git configuration
    Config(ConfigArgs),

    /// Update the clone's git configuration
    SetConfig(SetConfigArgs),

    /// Remove the local clone
    DeleteClone(DeleteCloneArgs),

    /// Show current service configuration
    ShowConfig,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration with overrides
    let config = Config::load_with_overrides(cli.base_dir.clone(), cli.timeout)?;

    if cli.verbose {
        tracing::info!(
            base_dir = %config.storage.base_dir.display(),
            timeout = ?config.network.timeout,
            "Configuration loaded"
        );
    }

    let command = match cli.command {
        Some(Commands::Version) => {
            println!("gitops-repo {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::ShowConfig) => {
            print_config(&config);
            return Ok(());
        }
        Some(command) => command,
        None => {
            println!("gitops-repo - file-level access to remote git repositories");
            println!();
            println!("Use --help for usage information");
            return Ok(());
        }
    };

    let service = RepositoryService::from_config(config);
    match command {
        Commands::Branches(args) => args.execute(&service).await,
        Commands::Branch(args) => args.execute(&service).await,
        Commands::Commits(args) => args.execute(&service).await,
        Commands::Commit(args) => args.execute(&service).await,
        Commands::File(args) => args.execute(&service).await,
        Commands::Ls(args) => args.execute(&service).await,
        Commands::Add(args) => args.execute(&service).await,
        Commands::Rm(args) => args.execute(&service).await,
        Commands::Upload(args) => args.execute(&service).await,
        Commands::Config(args) => args.execute(&service).await,
        Commands::SetConfig(args) => args.execute(&service).await,
        Commands::DeleteClone(args) => args.execute(&service).await,
        Commands::Version | Commands::ShowConfig => Ok(()),
    }
}

fn print_config(config: &Config) {
    println!("gitops-repo Configuration");
    println!("=========================");
    println!();
    println!("Storage:");
    println!("  base_dir: {}", config.storage.base_dir.display());
    println!("  upload_ttl: {:?}", config.storage.upload_ttl);
    println!("  max_file_size: {}", config.storage.max_file_size);
    println!();
    println!("Network:");
    println!("  timeout: {:?}", config.network.timeout);
    println!();
    println!("Stores:");
    println!("  repositories: {}", config.stores.repositories.display());
    println!("  secrets: {}", config.stores.secrets.display());
    println!();
    println!("Identity:");
    println!("  default_user: {}", config.identity.default_user);
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}

/// Exit code for a failed command
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<gitops_repo_core::Error>() {
        Some(e) if e.kind().is_client_error() => EXIT_CLIENT_ERROR,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_code_for_client_errors() {
        let err = anyhow::Error::new(gitops_repo_core::Error::InvalidArgument("bad path".into()));
        assert_eq!(exit_code(&err), EXIT_CLIENT_ERROR);

        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn test_parse_add_command() {
        let cli = Cli::try_parse_from([
            "gitops-repo",
            "add",
            "-n",
            "team-a",
            "-r",
            "app",
            "-b",
            "main",
            "-m",
            "deploy",
            "deploy/app.yaml=./app.yaml",
            "--staged",
            "bin/tool=tool",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Add(args)) => {
                assert_eq!(args.branch, "main");
                assert_eq!(args.files, vec!["deploy/app.yaml=./app.yaml"]);
                assert_eq!(args.staged, vec!["bin/tool=tool"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("30s").unwrap(), Duration::from_secs(30));
        assert!(parse_timeout("soon").is_err());
    }
}
