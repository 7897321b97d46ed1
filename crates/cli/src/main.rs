//! Meridian CLI - database migrations and store management.
//!
//! # Usage
//!
//! ```bash
//! # Create or update the storefront tables (and the session table)
//! meridian migrate
//!
//! # Promote a signed-up profile to admin
//! meridian profile set-role -e owner@example.com -r admin
//!
//! # Insert sample products and a hero banner
//! meridian seed
//! ```
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//! - `STORE_CURRENCY` - currency for seeded products (default `USD`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "meridian")]
#[command(author, version, about = "Meridian storefront CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage customer profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Insert sample catalog data (idempotent)
    Seed,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Change the role of an existing profile
    SetRole {
        /// Profile email address
        #[arg(short, long)]
        email: String,

        /// New role (`customer`, `business`, `admin`)
        #[arg(short, long)]
        role: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meridian_cli=info,meridian_storefront=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await,
        Commands::Profile { action } => match action {
            ProfileAction::SetRole { email, role } => {
                commands::profile::set_role(&email, &role).await
            }
        },
        Commands::Seed => commands::seed::run().await,
    }
}
