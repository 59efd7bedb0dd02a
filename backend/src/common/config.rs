//! Environment-based Configuration for the Custodia Backend
//!
//! Everything the service needs at startup is read once from environment
//! variables (optionally seeded from a `.env` file by the binary) and passed
//! into constructors. Nothing reads the environment after startup.
//!
//! # Environment Variables
//!
//! ## Network
//! - `CUSTODIA_NETWORK` - "mainnet", "testnet", or "regtest" (default: "regtest")
//!
//! ## Chain endpoints
//! - `CUSTODIA_BTC_ESPLORA` - Esplora REST endpoint for the Bitcoin chain
//! - `CUSTODIA_BTC_OMNI_RPC` - Omni Core JSON-RPC endpoint (optional)
//! - `CUSTODIA_ETH_RPC` - Ethereum JSON-RPC endpoint
//! - `CUSTODIA_ETH_CHAIN_ID` - EIP-155 chain id (default depends on network)
//! - `CUSTODIA_TRX_API` - TronGrid-compatible HTTP API endpoint
//!
//! ## Service
//! - `CUSTODIA_DB_PATH` - SQLite ledger path (default: "data/custodia.db")
//! - `CUSTODIA_SIGNER_URL` - Signing boundary base URL (default: "http://127.0.0.1:9400")
//! - `CUSTODIA_API_PORT` - API listen port (default: 8080)
//! - `CUSTODIA_FEE_TARGET` - Esplora confirmation target in blocks (default: 6)
//! - `CUSTODIA_CONFIRMATIONS` - Reorg walk depth (default: 6)
//! - `CUSTODIA_POLL_SECS` - Tip polling interval, 0 disables polling (default: 30)
//! - `CUSTODIA_LOG_LEVEL` - Logging level (debug, info, warn, error)
//!
//! ## Assets
//! - `CUSTODIA_ASSETS` - Comma separated `SYMBOL:chain:decimals[:kind]` entries,
//!   where kind is `omni=<property id>` or `token=<contract>`. Replaces the
//!   built-in asset table when set.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("network mismatch: expected {0}, got {1}")]
    NetworkMismatch(String, String),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("unknown asset: {0}")]
    UnknownAsset(String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" | "devnet" | "dev" => Ok(Network::Regtest),
            _ => Err(ConfigError::InvalidValue(
                "CUSTODIA_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        write!(f, "{}", s)
    }
}

impl Network {
    /// Get default Esplora API for this network
    pub fn default_esplora(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            Network::Regtest => "http://127.0.0.1:3002",
        }
    }

    pub fn default_eth_rpc(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://ethereum-rpc.publicnode.com",
            Network::Testnet => "https://ethereum-sepolia-rpc.publicnode.com",
            Network::Regtest => "http://127.0.0.1:8545",
        }
    }

    pub fn default_eth_chain_id(&self) -> u64 {
        match self {
            Network::Mainnet => 1,
            Network::Testnet => 11_155_111,
            Network::Regtest => 1337,
        }
    }

    pub fn default_tron_api(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.trongrid.io",
            Network::Testnet => "https://api.shasta.trongrid.io",
            Network::Regtest => "http://127.0.0.1:9090",
        }
    }

    /// Get bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }

    /// BIP44 coin type used for the UTXO chain's derivation path
    pub fn bip44_coin_type(&self) -> u32 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet | Network::Regtest => 1,
        }
    }
}

/// Which adapter family serves a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    /// Bitcoin-style UTXO ledger (with optional Omni layer)
    Utxo,
    /// Ethereum-style account ledger
    Account,
    /// Tron-style account ledger with bandwidth/energy resources
    Resource,
}

/// Per-chain connection settings
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Routing key and ledger tag, e.g. "btc"
    pub tag: String,
    pub kind: ChainKind,
    /// Primary node endpoint
    pub endpoint: String,
    /// Secondary endpoint (Omni Core RPC for the UTXO chain)
    pub aux_endpoint: Option<String>,
    /// EIP-155 chain id (account chain only)
    pub chain_id: u64,
    /// Fee estimate confirmation target in blocks
    pub fee_target: u16,
    /// Native coin decimals
    pub decimals: u8,
}

/// How an asset is carried on its chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    /// The chain's native coin
    Native,
    /// Omni layer property on the UTXO chain
    Layered { property_id: u32 },
    /// ERC-20 / TRC-20 contract
    Token { contract: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetConfig {
    pub symbol: String,
    pub chain: String,
    pub kind: AssetKind,
    pub decimals: u8,
}

impl AssetConfig {
    /// Contract reference passed to `Query::balance`
    pub fn contract_ref(&self) -> Option<String> {
        match &self.kind {
            AssetKind::Native => None,
            AssetKind::Layered { property_id } => Some(property_id.to_string()),
            AssetKind::Token { contract } => Some(contract.clone()),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, AssetKind::Native)
    }
}

impl FromStr for AssetConfig {
    type Err = ConfigError;

    /// Parses `SYMBOL:chain:decimals[:omni=<id>|:token=<contract>]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |msg: &str| ConfigError::InvalidValue("CUSTODIA_ASSETS".to_string(), format!("{}: {}", msg, s));

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(invalid("expected SYMBOL:chain:decimals[:kind]"));
        }

        let decimals: u8 = parts[2].parse().map_err(|_| invalid("decimals must be a number"))?;
        let kind = match parts.get(3) {
            None => AssetKind::Native,
            Some(kind) => match kind.split_once('=') {
                Some(("omni", id)) => AssetKind::Layered {
                    property_id: id.parse().map_err(|_| invalid("omni property id must be a number"))?,
                },
                Some(("token", contract)) if !contract.is_empty() => AssetKind::Token {
                    contract: contract.to_string(),
                },
                _ => return Err(invalid("kind must be omni=<id> or token=<contract>")),
            },
        };

        Ok(Self {
            symbol: parts[0].to_uppercase(),
            chain: parts[1].to_lowercase(),
            kind,
            decimals,
        })
    }
}

/// Ledger synchronizer settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far below the tip to re-check for reorgs
    pub confirmation_depth: u64,
    /// How far below the tip an empty ledger starts
    pub bootstrap_depth: u64,
    /// Block fetch timeout
    pub fetch_timeout: Duration,
    /// Tip polling interval; `None` relies on notifications only
    pub poll_interval: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 6,
            bootstrap_depth: 6,
            fetch_timeout: Duration::from_secs(60),
            poll_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct CustodiaConfig {
    /// Network environment
    pub network: Network,

    /// SQLite ledger path
    pub db_path: String,

    /// Signing boundary base URL
    pub signer_url: String,

    /// API listen port
    pub api_port: u16,

    pub chains: Vec<ChainConfig>,

    pub assets: Vec<AssetConfig>,

    pub sync: SyncConfig,

    /// Log level
    pub log_level: String,
}

impl CustodiaConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env::var("CUSTODIA_NETWORK")
            .unwrap_or_else(|_| "regtest".to_string())
            .parse()?;

        let db_path = env::var("CUSTODIA_DB_PATH").unwrap_or_else(|_| "data/custodia.db".to_string());
        let signer_url =
            env::var("CUSTODIA_SIGNER_URL").unwrap_or_else(|_| "http://127.0.0.1:9400".to_string());
        let api_port = parse_env("CUSTODIA_API_PORT", 8080)?;

        let fee_target = parse_env("CUSTODIA_FEE_TARGET", 6u16)?;
        let chain_id = parse_env("CUSTODIA_ETH_CHAIN_ID", network.default_eth_chain_id())?;

        let chains = vec![
            ChainConfig {
                tag: "btc".to_string(),
                kind: ChainKind::Utxo,
                endpoint: env::var("CUSTODIA_BTC_ESPLORA")
                    .unwrap_or_else(|_| network.default_esplora().to_string()),
                aux_endpoint: env::var("CUSTODIA_BTC_OMNI_RPC").ok(),
                chain_id: 0,
                fee_target,
                decimals: 8,
            },
            ChainConfig {
                tag: "eth".to_string(),
                kind: ChainKind::Account,
                endpoint: env::var("CUSTODIA_ETH_RPC")
                    .unwrap_or_else(|_| network.default_eth_rpc().to_string()),
                aux_endpoint: None,
                chain_id,
                fee_target,
                decimals: 18,
            },
            ChainConfig {
                tag: "trx".to_string(),
                kind: ChainKind::Resource,
                endpoint: env::var("CUSTODIA_TRX_API")
                    .unwrap_or_else(|_| network.default_tron_api().to_string()),
                aux_endpoint: None,
                chain_id: 0,
                fee_target,
                decimals: 6,
            },
        ];

        let assets = match env::var("CUSTODIA_ASSETS") {
            Ok(list) if !list.trim().is_empty() => list
                .split(',')
                .map(str::parse)
                .collect::<Result<Vec<AssetConfig>, _>>()?,
            _ => default_assets(network),
        };

        let confirmations = parse_env("CUSTODIA_CONFIRMATIONS", 6u64)?;
        let poll_secs = parse_env("CUSTODIA_POLL_SECS", 30u64)?;
        let sync = SyncConfig {
            confirmation_depth: confirmations,
            bootstrap_depth: confirmations,
            poll_interval: (poll_secs > 0).then(|| Duration::from_secs(poll_secs)),
            ..SyncConfig::default()
        };

        let log_level = env::var("CUSTODIA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let config = Self {
            network,
            db_path,
            signer_url,
            api_port,
            chains,
            assets,
            sync,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency of the asset table
    pub fn validate(&self) -> Result<(), ConfigError> {
        for asset in &self.assets {
            let chain = self
                .chain(&asset.chain)
                .ok_or_else(|| ConfigError::UnknownChain(asset.chain.clone()))?;

            match (&asset.kind, chain.kind) {
                (AssetKind::Layered { .. }, ChainKind::Utxo) if chain.aux_endpoint.is_none() => {
                    return Err(ConfigError::MissingEnvVar("CUSTODIA_BTC_OMNI_RPC".to_string()));
                }
                (AssetKind::Layered { .. }, ChainKind::Utxo) => {}
                (AssetKind::Layered { .. }, _) => {
                    return Err(ConfigError::InvalidValue(
                        asset.symbol.clone(),
                        "layered assets require a UTXO chain".to_string(),
                    ));
                }
                (AssetKind::Token { .. }, ChainKind::Utxo) => {
                    return Err(ConfigError::InvalidValue(
                        asset.symbol.clone(),
                        "token assets require an account chain".to_string(),
                    ));
                }
                _ => {}
            }
        }

        if self.sync.confirmation_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "CUSTODIA_CONFIRMATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.network != Network::Mainnet {
            return Err(ConfigError::NetworkMismatch(
                "mainnet".to_string(),
                format!("{:?}", self.network),
            ));
        }

        if !self.signer_url.starts_with("https://") && !is_loopback(&self.signer_url) {
            return Err(ConfigError::InvalidValue(
                "CUSTODIA_SIGNER_URL".to_string(),
                "remote signer must use https".to_string(),
            ));
        }

        if self.sync.confirmation_depth < 6 {
            return Err(ConfigError::InvalidValue(
                "CUSTODIA_CONFIRMATIONS".to_string(),
                "mainnet requires at least 6".to_string(),
            ));
        }

        Ok(())
    }

    pub fn chain(&self, tag: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.tag == tag)
    }

    /// Look up an asset by symbol (case-insensitive)
    pub fn asset(&self, symbol: &str) -> Result<&AssetConfig, ConfigError> {
        self.assets
            .iter()
            .find(|a| a.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ConfigError::UnknownAsset(symbol.to_string()))
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== Custodia Configuration ===");
        println!("Network: {:?}", self.network);
        println!("Ledger DB: {}", self.db_path);
        println!("Signer: {}", self.signer_url);
        for chain in &self.chains {
            println!("Chain {} ({:?}): {}", chain.tag, chain.kind, chain.endpoint);
        }
        let symbols: Vec<&str> = self.assets.iter().map(|a| a.symbol.as_str()).collect();
        println!("Assets: {}", symbols.join(", "));
        println!("Confirmation depth: {}", self.sync.confirmation_depth);
        println!("Log Level: {}", self.log_level);
        println!("==============================");
    }
}

/// Built-in asset table
pub fn default_assets(network: Network) -> Vec<AssetConfig> {
    let (usdt_erc20, usdt_trc20) = match network {
        Network::Mainnet => (
            "0xdAC17F958D2ee523a2206206994597C13D831ec7",
            "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
        ),
        Network::Testnet | Network::Regtest => (
            "0xaA8E23Fb1079EA71e0a56F48a2aA51851D8433D0",
            "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf",
        ),
    };

    let mut assets = vec![
        asset("BTC", "btc", AssetKind::Native, 8),
        asset("ETH", "eth", AssetKind::Native, 18),
        asset(
            "USDT-ERC20",
            "eth",
            AssetKind::Token { contract: usdt_erc20.to_string() },
            6,
        ),
        asset("TRX", "trx", AssetKind::Native, 6),
        asset(
            "USDT-TRC20",
            "trx",
            AssetKind::Token { contract: usdt_trc20.to_string() },
            6,
        ),
    ];

    if env::var("CUSTODIA_BTC_OMNI_RPC").is_ok() {
        assets.push(asset("USDT-OMNI", "btc", AssetKind::Layered { property_id: 31 }, 8));
    }

    assets
}

fn asset(symbol: &str, chain: &str, kind: AssetKind, decimals: u8) -> AssetConfig {
    AssetConfig {
        symbol: symbol.to_string(),
        chain: chain.to_string(),
        kind,
        decimals,
    }
}

fn parse_env<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("cannot parse '{}'", value))
        }),
        Err(_) => Ok(default),
    }
}

fn is_loopback(url: &str) -> bool {
    url.starts_with("http://127.0.0.1") || url.starts_with("http://localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CustodiaConfig {
        let network = Network::Regtest;
        CustodiaConfig {
            network,
            db_path: ":memory:".to_string(),
            signer_url: "http://127.0.0.1:9400".to_string(),
            api_port: 8080,
            chains: vec![ChainConfig {
                tag: "btc".to_string(),
                kind: ChainKind::Utxo,
                endpoint: network.default_esplora().to_string(),
                aux_endpoint: None,
                chain_id: 0,
                fee_target: 6,
                decimals: 8,
            }],
            assets: vec![asset("BTC", "btc", AssetKind::Native, 8)],
            sync: SyncConfig::default(),
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("TESTNET".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("devnet".parse::<Network>().unwrap(), Network::Regtest);
        assert!("invalid".parse::<Network>().is_err());
    }

    #[test]
    fn test_bitcoin_network_mapping() {
        assert_eq!(Network::Mainnet.bitcoin_network(), bitcoin::Network::Bitcoin);
        assert_eq!(Network::Regtest.bitcoin_network(), bitcoin::Network::Regtest);
        assert_eq!(Network::Mainnet.bip44_coin_type(), 0);
        assert_eq!(Network::Testnet.bip44_coin_type(), 1);
    }

    #[test]
    fn test_asset_parsing() {
        let native: AssetConfig = "btc:btc:8".parse().unwrap();
        assert_eq!(native.symbol, "BTC");
        assert!(native.is_native());
        assert_eq!(native.contract_ref(), None);

        let omni: AssetConfig = "USDT-OMNI:btc:8:omni=31".parse().unwrap();
        assert_eq!(omni.kind, AssetKind::Layered { property_id: 31 });
        assert_eq!(omni.contract_ref().as_deref(), Some("31"));

        let token: AssetConfig = "USDC:eth:6:token=0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
            .parse()
            .unwrap();
        assert!(matches!(token.kind, AssetKind::Token { .. }));

        assert!("BTC:btc".parse::<AssetConfig>().is_err());
        assert!("BTC:btc:eight".parse::<AssetConfig>().is_err());
        assert!("X:eth:6:nft=1".parse::<AssetConfig>().is_err());
    }

    #[test]
    fn test_asset_lookup_is_case_insensitive() {
        let config = test_config();
        assert_eq!(config.asset("btc").unwrap().symbol, "BTC");
        assert!(matches!(config.asset("DOGE"), Err(ConfigError::UnknownAsset(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_chain() {
        let mut config = test_config();
        config.assets.push(asset("ETH", "eth", AssetKind::Native, 18));
        assert!(matches!(config.validate(), Err(ConfigError::UnknownChain(_))));
    }

    #[test]
    fn test_validate_requires_omni_endpoint() {
        let mut config = test_config();
        config
            .assets
            .push(asset("USDT-OMNI", "btc", AssetKind::Layered { property_id: 31 }, 8));
        assert!(config.validate().is_err());

        config.chains[0].aux_endpoint = Some("http://127.0.0.1:8332".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_validation() {
        let mut config = test_config();
        assert!(config.validate_for_production().is_err());

        config.network = Network::Mainnet;
        assert!(config.validate_for_production().is_ok());

        config.signer_url = "http://signer.internal:9400".to_string();
        assert!(config.validate_for_production().is_err());
    }
}
