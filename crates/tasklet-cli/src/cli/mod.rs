//! CLI entry and dispatch.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tasklet_core::auth::{self, Auth0Client, SessionController, SessionHandle};
use tasklet_core::{config, logging};
use tracing::debug;

mod commands;

#[derive(Parser)]
#[command(name = "tasklet")]
#[command(version = "0.1")]
#[command(about = "List manager with an authenticated session")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sign in (username/password, or the hosted login page)
    Login {
        /// Use the provider's hosted login in a browser
        #[arg(long)]
        interactive: bool,

        /// Account name for password sign-in (prompted if omitted)
        #[arg(short, long, conflicts_with = "interactive")]
        username: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show who is signed in
    Status,

    /// Work with the list
    Items {
        #[command(subcommand)]
        command: ItemsCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ItemsCommands {
    /// Load sample items from the configured endpoint
    Fetch {
        /// Number of items to request (default: items.limit)
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Preview an item as the detail view renders it
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Daily rate, e.g. 45 or 1234.50
        #[arg(long, default_value = "")]
        rate: String,
        /// Date the item becomes available
        #[arg(long, default_value = "")]
        date: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = config::Config::load().context("load config")?;
    let _log_guard = logging::init(&config.log).context("init logging")?;

    match cli.command {
        Commands::Login {
            interactive,
            username,
        } => commands::auth::login(&config, interactive, username).await,
        Commands::Logout => commands::auth::logout(&config).await,
        Commands::Status => commands::auth::status(&config).await,

        Commands::Items { command } => match command {
            ItemsCommands::Fetch { limit } => commands::items::fetch(&config, limit).await,
            ItemsCommands::Add {
                name,
                description,
                rate,
                date,
            } => {
                commands::items::add(
                    &config,
                    tasklet_core::items::NewItem {
                        name,
                        description,
                        daily_rate: rate,
                        available_date: date,
                    },
                )
                .await
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}

/// Builds the process-wide session and restores any stored sign-in.
pub(crate) async fn start_session(config: &config::Config) -> Result<SessionHandle> {
    let store = auth::open_store(&config.storage).context("open credential store")?;
    let provider = Auth0Client::from_config(&config.auth)
        .context("create identity provider client")?
        .with_url_sink(|url| {
            println!("Open this URL in your browser if it did not open:");
            println!("  {url}");
            println!();
        });

    let session = SessionController::new(Arc::from(store), Arc::new(provider)).into_handle();
    session.subscribe(|state| {
        debug!(phase = ?state.phase(), loading = state.loading, "session");
    });
    session.restore().await;
    Ok(session)
}
