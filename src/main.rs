//! Forgesync CLI entry point

use clap::{Parser, Subcommand};
use std::process;

use forgesync::config::SyncConfig;
use forgesync::service::{InitKinds, JsonlEventSource, SyncService};

/// Sync issues and pull requests from GitHub and Pagure into JIRA
#[derive(Parser, Debug)]
#[command(name = "forgesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/forgesync/config.yaml)
    #[arg(short, long)]
    config: Option<String>,

    /// Log writes instead of applying them
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Consume upstream events (newline-delimited JSON on stdin)
    Serve,

    /// Walk all mapped repositories and sync every item
    Init {
        /// Only sync this repository (owner/repo)
        #[arg(short, long)]
        repo: Option<String>,

        /// Only walk issues
        #[arg(long, conflicts_with = "prs_only")]
        issues_only: bool,

        /// Only walk pull requests
        #[arg(long)]
        prs_only: bool,
    },

    /// Print the upstream URL of every managed issue
    ListManaged,

    /// Close duplicate downstream tickets, keeping the oldest
    CloseDuplicates,

    /// Load and validate the configuration, then exit
    Validate,
}

#[tokio::main]
async fn main() {
    if let Err(e) = forgesync::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(cli, config).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> forgesync::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::load_default()?,
    };
    if cli.dry_run {
        config.dry_run = true;
    }
    Ok(config)
}

async fn run(cli: Cli, config: SyncConfig) -> forgesync::Result<()> {
    match cli.command {
        Commands::Serve => {
            let service = SyncService::new(config)?;
            let mut source = JsonlEventSource::new(tokio::io::stdin());
            service.run(&mut source).await
        }

        Commands::Init {
            repo,
            issues_only,
            prs_only,
        } => {
            let service = SyncService::new(config)?;
            let kinds = InitKinds {
                issues: !prs_only,
                prs: !issues_only,
            };
            service.initialize(kinds, repo.as_deref()).await
        }

        Commands::ListManaged => {
            let service = SyncService::new(config)?;
            for url in service.managed_urls().await {
                println!("{}", url);
            }
            Ok(())
        }

        Commands::CloseDuplicates => {
            let service = SyncService::new(config)?;
            let closed = service.close_all_duplicates().await?;
            println!("Closed {} duplicate ticket(s)", closed);
            Ok(())
        }

        Commands::Validate => {
            // Construction runs the full validation path
            SyncService::new(config)?;
            println!("Configuration OK");
            Ok(())
        }
    }
}
