use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskwire::auth::{self, Role};
use taskwire::config::{AppConfig, DEFAULT_JWT_SECRET};

#[derive(Parser)]
#[command(name = "taskwire")]
#[command(version, about = "Task tracking backend with real-time notifications")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP + WebSocket server and the reminder scheduler
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path (overrides DATABASE_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Mint a signed access token for a user
    Token {
        #[arg(long)]
        user_id: i64,

        #[arg(long)]
        email: String,

        /// "user" or "admin"
        #[arg(long, default_value = "user")]
        role: String,

        #[arg(long, default_value = "24")]
        expires_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        // Keep stdout clean so `taskwire token` output can be piped.
        .with_writer(std::io::stderr)
        .init();

    let mut config = AppConfig::from_env()?;

    match cli.command {
        Commands::Serve { port, db_path } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            if config.jwt_secret == DEFAULT_JWT_SECRET {
                tracing::warn!("JWT_SECRET is unset; using the insecure default");
            }
            taskwire::server::start_server(config).await?;
        }
        Commands::Token {
            user_id,
            email,
            role,
            expires_hours,
        } => {
            let role: Role = role.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let token =
                auth::issue_token(user_id, &email, role, &config.jwt_secret, expires_hours)?;
            println!("{}", token);
        }
    }

    Ok(())
}
