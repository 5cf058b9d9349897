mod backend;
mod config;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keyward_auth::AuthService;
use keyward_storage::Page;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use backend::StoreBackend;
use config::{Overrides, ServerConfig};

// ────────────────────────────────────── CLI Types ──────────────────────────────────────

#[derive(Parser)]
#[command(name = "keyward-server")]
#[command(about = "keyward token authority: serving and bootstrap administration")]
struct Cli {
    /// Config file (created with a fresh secret if missing; default ~/.keyward/config.toml)
    #[arg(long, short = 'c', global = true, env = "KEYWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL (sqlite://path/to/db.db?mode=rwc, kv:///path/to/dir, or a bare directory)
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Hex-encoded fallback secret for legacy tokens
    #[arg(long, global = true, env = "KEYWARD_SECRET", hide_env_values = true)]
    secret: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Listen address
        #[arg(long, env = "KEYWARD_LISTEN")]
        listen: Option<String>,
    },
    /// Token management commands
    Token {
        #[command(subcommand)]
        token_cmd: TokenCommand,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Issue a token (e.g. the first admin token)
    Issue {
        name: String,
        /// read, write, sign or admin
        #[arg(long, default_value = "read")]
        perm: String,
        #[arg(long, default_value = "")]
        extra: String,
    },
    /// List live tokens
    List {
        #[arg(long, default_value = "0")]
        skip: u64,
        #[arg(long, default_value = "20")]
        limit: u64,
    },
    /// Revoke a token
    Revoke { token: String },
}

// ────────────────────────────────────── Commands ──────────────────────────────────────

async fn cmd_serve(svc: AuthService, cfg: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = routes::router(svc, &cfg.trusted_paths, cfg.verify_timeout()?);

    let listener = tokio::net::TcpListener::bind(&cfg.listen).await?;
    tracing::info!(addr = %listener.local_addr()?, "keyward listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shut down");
    Ok(())
}

async fn cmd_token(svc: AuthService, cmd: TokenCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        TokenCommand::Issue { name, perm, extra } => {
            let token = svc.issue_token(&name, &perm, &extra).await?;
            println!("{token}");
        }
        TokenCommand::List { skip, limit } => {
            for info in svc.list_tokens(Page::new(skip, limit)).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    info.name,
                    info.perm,
                    info.created_at.to_rfc3339(),
                    info.token
                );
            }
        }
        TokenCommand::Revoke { token } => {
            svc.revoke_token(&token).await?;
            println!("revoked");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

// ────────────────────────────────────── Main ──────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => ServerConfig::default_path()?,
    };
    let mut cfg = ServerConfig::load_or_init(&path)?;
    let listen = match &cli.command {
        Command::Serve { listen } => listen.clone(),
        Command::Token { .. } => None,
    };
    cfg.apply(Overrides {
        secret: cli.secret,
        database_url: cli.database_url,
        listen,
    });
    cfg.validate()?;

    let store = StoreBackend::from_url(&cfg.db.url)?.open(&cfg.db).await?;
    let svc = AuthService::start(store, &cfg.secret).await?;

    match cli.command {
        Command::Serve { .. } => cmd_serve(svc, &cfg).await?,
        Command::Token { token_cmd } => cmd_token(svc, token_cmd).await?,
    }

    Ok(())
}
