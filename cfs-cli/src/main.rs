// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chef FS CLI
//!
//! Browse, compare and synchronize a local chef-repo with a Chef server.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "chef-fs")]
#[command(author, version, about = "Chef FS - one tree for your chef-repo and your Chef server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to .chef/fs.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        /// Chef FS path
        #[arg(default_value = "/")]
        path: String,

        /// List the server instead of the repository
        #[arg(short, long)]
        remote: bool,
    },

    /// Print the content of a file
    Show {
        /// Chef FS path
        path: String,

        /// Read from the server instead of the repository
        #[arg(short, long)]
        remote: bool,
    },

    /// Show what differs between the server and the repository
    Diff {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Make the server look like the repository
    Upload {
        #[arg(default_value = "/")]
        path: String,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Make the repository look like the server
    Download {
        #[arg(default_value = "/")]
        path: String,

        #[command(flatten)]
        sync: SyncArgs,
    },
}

#[derive(clap::Args)]
struct SyncArgs {
    /// Delete what only exists at the destination
    #[arg(long)]
    purge: bool,

    /// Copy files even when they compare equal
    #[arg(short, long)]
    force: bool,

    /// Only report what would change
    #[arg(short = 'n', long)]
    dry_run: bool,
}

impl From<&SyncArgs> for cfs_core::operations::CopyOptions {
    fn from(args: &SyncArgs) -> Self {
        Self {
            purge: args.purge,
            force: args.force,
            dry_run: args.dry_run,
            recurse_depth: None,
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match commands::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Commands::Ls { path, remote } => commands::ls(&config, path, *remote).await,
        Commands::Show { path, remote } => commands::show(&config, path, *remote).await,
        Commands::Diff { path } => commands::diff(&config, path).await,
        Commands::Upload { path, sync } => commands::upload(&config, path, &sync.into()).await,
        Commands::Download { path, sync } => commands::download(&config, path, &sync.into()).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
