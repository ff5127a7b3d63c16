//! Kasir Console - terminal host for the owner PIN dialog

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kasir_auth::{hash_pin, AuthConfig, Pin};

mod render;
mod unlock;

/// Kasir Console - PIN step-up for sensitive back-office actions
#[derive(Parser)]
#[command(name = "kasir-console")]
#[command(about = "PIN step-up authentication for the Kasir back office")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a PIN dialog on stdin and report the outcome
    Unlock {
        /// Credentials file with Argon2id PIN hashes
        #[arg(long)]
        credentials: PathBuf,

        /// Authenticator config (defaults to the platform config dir)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print outcomes as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Hash a PIN for a credentials file entry
    HashPin {
        /// Six-digit PIN
        pin: String,

        /// Identity id to emit a full [[credential]] block
        #[arg(long)]
        id: Option<String>,

        /// Display name for the block
        #[arg(long)]
        label: Option<String>,

        /// Role for the block
        #[arg(long)]
        role: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable with --json
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "kasir_console={level},kasir_auth={level}",
                    level = cli.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Unlock {
            credentials,
            config,
            json,
        } => {
            let config_path = config.unwrap_or_else(AuthConfig::default_path);
            let config = AuthConfig::load_or_default(&config_path)
                .with_context(|| format!("Failed to load config from {:?}", config_path))?;
            info!("Using authenticator config from {:?}", config_path);

            let authenticated = unlock::run(&credentials, config, json).await?;
            if !authenticated {
                std::process::exit(1);
            }
        }

        Commands::HashPin {
            pin,
            id,
            label,
            role,
        } => {
            let pin = Pin::parse(&pin).context("Invalid PIN")?;
            let hash = hash_pin(&pin).context("Failed to hash PIN")?;
            let block =
                render::credential_block(&hash, id.as_deref(), label.as_deref(), role.as_deref())
                    .context("Failed to render credential entry")?;
            println!("{}", block);
        }
    }

    Ok(())
}
