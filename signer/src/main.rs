//! Custodia Signer CLI
//!
//! Entry point for running the signing server or setting up chain wallets
//! offline.

use clap::{Parser, Subcommand};
use custodia::common::CustodiaConfig;
use custodia_signer::{create_router, SigningService};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "custodia-signer")]
#[command(about = "Signing boundary for the Custodia wallet backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signer server
    Run {
        /// Bind address
        #[arg(short, long, default_value = "127.0.0.1:9400")]
        bind: String,

        /// Path to the encrypted key store
        #[arg(short, long, env = "CUSTODIA_SIGNER_KEY_DB", default_value = "data/keys.db")]
        key_db: String,

        /// Key store password (or set CUSTODIA_SIGNER_PASSWORD env var)
        #[arg(short, long, env = "CUSTODIA_SIGNER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Set up a chain wallet and print its first address
    Bootstrap {
        /// Chain tag (btc, eth, trx)
        #[arg(short, long)]
        chain: String,

        /// Path to the encrypted key store
        #[arg(short, long, env = "CUSTODIA_SIGNER_KEY_DB", default_value = "data/keys.db")]
        key_db: String,

        /// Key store password (or set CUSTODIA_SIGNER_PASSWORD env var)
        #[arg(short, long, env = "CUSTODIA_SIGNER_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,custodia_signer=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            bind,
            key_db,
            password,
        } => {
            run_server(bind, key_db, password).await?;
        }
        Commands::Bootstrap {
            chain,
            key_db,
            password,
        } => {
            let service = load_service(key_db, password)?;
            let response = service.bootstrap(&chain).await?;
            println!("{}: {}", response.chain, response.address);
        }
    }

    Ok(())
}

fn load_service(key_db: String, password: String) -> Result<SigningService, Box<dyn std::error::Error>> {
    let config = CustodiaConfig::from_env()?;
    let service = SigningService::new(key_db, password, config.network, &config.chains, config.assets)?;
    Ok(service)
}

/// Run the signer server
async fn run_server(bind: String, key_db: String, password: String) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(key_db = %key_db, "Starting custodia signer");

    let service = load_service(key_db, password)?;
    tracing::info!(
        network = %service.network(),
        chains = ?service.chain_tags(),
        "Key store unlocked"
    );

    let app = create_router(Arc::new(service));
    let addr: SocketAddr = bind.parse()?;

    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
