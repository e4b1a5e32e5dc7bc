//! FlexHub CLI - Database migrations and back-office operations.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! fh-cli migrate
//!
//! # Create a staff account
//! fh-cli user create -e dana@flexhub.fit -n "Dana Reyes" -r taskforce
//!
//! # Change a user's role
//! fh-cli user set-role -e coach@example.com -r coach
//!
//! # Run the weekly payout batch now
//! fh-cli payouts run
//!
//! # Show the addresses treated as the same applicant
//! fh-cli email-variations John.Doe+fit@gmail.com
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "fh-cli")]
#[command(author, version, about = "FlexHub back-office CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage user accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Ambassador payouts
    Payouts {
        #[command(subcommand)]
        action: PayoutAction,
    },
    /// Print the email variations used for duplicate detection
    EmailVariations {
        /// Email address to expand
        email: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a new user
    Create {
        /// Email address
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Role (`customer`, `coach`, `affiliate`, `taskforce`, `admin`)
        #[arg(short, long, default_value = "customer")]
        role: String,
    },
    /// Change an existing user's role
    SetRole {
        /// Email address
        #[arg(short, long)]
        email: String,

        /// New role
        #[arg(short, long)]
        role: String,
    },
}

#[derive(Subcommand)]
enum PayoutAction {
    /// Pay every ambassador with pending commissions now
    Run,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::User { action } => match action {
            UserAction::Create { email, name, role } => {
                commands::users::create_user(&email, &name, &role).await?;
            }
            UserAction::SetRole { email, role } => {
                commands::users::set_role(&email, &role).await?;
            }
        },
        Commands::Payouts { action } => match action {
            PayoutAction::Run => commands::payouts::run().await?,
        },
        Commands::EmailVariations { email } => commands::emails::print_variations(&email),
    }
    Ok(())
}
