//! `media-fetch-api` binary
//!
//! - `media-fetch-api serve` runs the HTTP service
//! - `media-fetch-api dockerfile` renders the container build files
//! - `media-fetch-api check-lock` verifies a lock file against its manifest

use anyhow::Result;
use clap::{Parser, Subcommand};

use media_fetch_api::commands::{self, CheckLockArgs, DockerfileArgs, ServeArgs};
use media_fetch_api::core::config::LoggingConfig;
use media_fetch_api::utils::logging::init_tracing;

/// Universal video downloader API backed by yt-dlp
#[derive(Parser)]
#[command(name = "media-fetch-api")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (default)
    Serve(ServeArgs),

    /// Render the Dockerfile and .dockerignore
    Dockerfile(DockerfileArgs),

    /// Verify that a lock file agrees with its manifest
    #[command(name = "check-lock")]
    CheckLock(CheckLockArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => commands::serve::handle(args).await,
        Commands::Dockerfile(args) => {
            init_tracing(&LoggingConfig::default());
            commands::image::handle_dockerfile(args)
        }
        Commands::CheckLock(args) => {
            init_tracing(&LoggingConfig::default());
            commands::image::handle_check_lock(args).map(|_| ())
        }
    }
}
