//! Custodia Backend
//!
//! Run modes:
//!   custodia serve [--port <port>]   - Start synchronizers and the REST API
//!   custodia config                  - Print the resolved configuration

use custodia::api::{self, AppState};
use custodia::chain::build_adapter;
use custodia::common::logging::init_from_config;
use custodia::common::{CustodiaConfig, CustodiaError, Network};
use custodia::service::{ChainHandle, SignerClient, WalletService};
use custodia::storage::SqliteLedgerStore;
use custodia::sync::{spawn_tip_poller, BlockBus, LedgerSynchronizer};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "serve" => run_serve(&args[2..]).await,
        "config" => show_config(),
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Custodia - Multi-Chain Custodial Wallet Backend");
    println!();
    println!("Usage:");
    println!("  custodia serve [--port <port>]   Start synchronizers and the REST API (default: 8080)");
    println!("  custodia config                  Print the resolved configuration");
    println!();
    println!("Environment Variables:");
    println!("  CUSTODIA_NETWORK       mainnet | testnet | regtest");
    println!("  CUSTODIA_DB_PATH       Ledger database file");
    println!("  CUSTODIA_SIGNER_URL    Base URL of custodia-signer");
    println!("  CUSTODIA_BTC_ESPLORA   Esplora API endpoint");
    println!("  CUSTODIA_BTC_OMNI_RPC  Omni Core RPC endpoint (optional)");
    println!("  CUSTODIA_ETH_RPC       Ethereum JSON-RPC endpoint");
    println!("  CUSTODIA_TRX_API       Tron HTTP API endpoint");
    println!("  CUSTODIA_ASSETS        Extra token definitions");
    println!("  CUSTODIA_LOG_LEVEL     trace | debug | info | warn | error");
}

fn load_config() -> Result<CustodiaConfig, CustodiaError> {
    let config = CustodiaConfig::from_env()?;
    if config.network == Network::Mainnet {
        config.validate_for_production()?;
    }
    Ok(config)
}

fn show_config() -> Result<(), CustodiaError> {
    load_config()?.print_summary();
    Ok(())
}

async fn run_serve(args: &[String]) -> Result<(), CustodiaError> {
    let mut config = load_config()?;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.api_port = args[i + 1]
                    .parse()
                    .map_err(|_| CustodiaError::validation(format!("invalid port: {}", args[i + 1])))?;
                i += 2;
            }
            _ => i += 1,
        }
    }

    init_from_config(&config)?;
    config.print_summary();

    let store = Arc::new(SqliteLedgerStore::new(&config.db_path)?);
    let signer = Arc::new(SignerClient::new(&config.signer_url)?);
    let bus = Arc::new(BlockBus::new());

    match signer.health().await {
        Ok(true) => tracing::info!(target: "custodia::signer", url = %config.signer_url, "signer reachable"),
        Ok(false) => tracing::warn!(target: "custodia::signer", url = %config.signer_url, "signer unhealthy"),
        Err(e) => tracing::warn!(target: "custodia::signer", url = %config.signer_url, error = %e, "signer not reachable yet"),
    }

    let mut wallet = WalletService::new(config.assets.clone(), store.clone(), signer);

    for chain in &config.chains {
        let adapter = build_adapter(chain, config.network)?;
        wallet = wallet.with_chain(&chain.tag, ChainHandle::new(chain, adapter.clone()));

        let queue = bus.bind(&format!("{}-ledger", chain.tag), &chain.tag).await;
        let synchronizer = LedgerSynchronizer::new(adapter.clone(), store.clone(), config.sync.clone());
        tokio::spawn(synchronizer.run(queue));

        if let Some(every) = config.sync.poll_interval {
            spawn_tip_poller(adapter, bus.clone(), every);
        }
    }

    let state = AppState::new(Arc::new(wallet), bus, config.network);
    api::start_server(state, config.api_port).await?;

    Ok(())
}
