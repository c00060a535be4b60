use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const CONTRACT_ADDRESS: &str = "NOTES_CONTRACT_ADDRESS";
    pub const PORT: &str = "PORT";
    /// Private key for the local key-backed wallet. Without it no wallet is available.
    pub const WALLET_PRIVATE_KEY: &str = "NOTES_WALLET_PRIVATE_KEY";
    /// Chain the local wallet starts on (defaults to the first catalog network)
    pub const WALLET_CHAIN_ID: &str = "NOTES_WALLET_CHAIN_ID";
    /// Prefix for per-network RPC overrides, e.g. NOTES_RPC_11155111
    pub const RPC_PREFIX: &str = "NOTES_RPC_";
    pub const QUOTE_TIMEOUT_SECS: &str = "NOTES_QUOTE_TIMEOUT_SECS";
    pub const SETTLE_TIMEOUT_SECS: &str = "NOTES_SETTLE_TIMEOUT_SECS";
    pub const PROBE_TIMEOUT_SECS: &str = "NOTES_PROBE_TIMEOUT_SECS";
    pub const CONFIRMATIONS: &str = "NOTES_CONFIRMATIONS";
}

/// Default values
pub mod defaults {
    pub const CONTRACT_ADDRESS: &str = "0xa131AD247055FD2e2aA8b156A11bdEc81b9eAD95";
    pub const PORT: u16 = 8090;
    pub const QUOTE_TIMEOUT_SECS: u64 = 15;
    pub const SETTLE_TIMEOUT_SECS: u64 = 300;
    pub const PROBE_TIMEOUT_SECS: u64 = 10;
    pub const CONFIRMATIONS: usize = 1;
}

/// Bounded waits applied to every remote interaction.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Fee quote fetch
    pub quote: Duration,
    /// Transaction settlement (receipt + confirmations)
    pub settle: Duration,
    /// Byte-code probes, chain id reads and validity probes
    pub probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            quote: Duration::from_secs(defaults::QUOTE_TIMEOUT_SECS),
            settle: Duration::from_secs(defaults::SETTLE_TIMEOUT_SECS),
            probe: Duration::from_secs(defaults::PROBE_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub contract_address: Address,
    pub port: u16,
    pub wallet_private_key: Option<String>,
    pub wallet_chain_id: Option<u64>,
    /// chain id -> RPC URL taking precedence over the catalog entry
    pub rpc_overrides: HashMap<u64, String>,
    pub timeouts: Timeouts,
    pub confirmations: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("contract_address", &self.contract_address)
            .field("port", &self.port)
            .field("wallet_private_key", &self.wallet_private_key.as_ref().map(|_| "<redacted>"))
            .field("wallet_chain_id", &self.wallet_chain_id)
            .field("rpc_overrides", &self.rpc_overrides)
            .field("timeouts", &self.timeouts)
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        let rpc_overrides: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with(env_vars::RPC_PREFIX))
            .collect();

        let mut config = Self::from_lookup(|key| env::var(key).ok());
        config.rpc_overrides = parse_rpc_overrides(rpc_overrides);
        config
    }

    /// Build a config from an arbitrary key lookup (process env, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let contract_address = lookup(env_vars::CONTRACT_ADDRESS)
            .and_then(|raw| match raw.trim().parse::<Address>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    log::warn!(
                        "[CONFIG] Invalid {} '{}': {}, using default",
                        env_vars::CONTRACT_ADDRESS,
                        raw,
                        e
                    );
                    None
                }
            })
            .unwrap_or_else(default_contract_address);

        let wallet_private_key = lookup(env_vars::WALLET_PRIVATE_KEY)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        for pk in wallet_private_key.iter().flat_map(|keys| split_keys(keys)) {
            match derive_address_from_private_key(pk) {
                Ok(address) => log::info!("[CONFIG] Local wallet address: {}", address),
                Err(e) => log::warn!("[CONFIG] Local wallet key is unusable: {}", e),
            }
        }

        Self {
            contract_address,
            port: parse_or_default(&lookup, env_vars::PORT, defaults::PORT),
            wallet_private_key,
            wallet_chain_id: lookup(env_vars::WALLET_CHAIN_ID).and_then(|v| v.trim().parse().ok()),
            rpc_overrides: HashMap::new(),
            timeouts: Timeouts {
                quote: Duration::from_secs(parse_or_default(
                    &lookup,
                    env_vars::QUOTE_TIMEOUT_SECS,
                    defaults::QUOTE_TIMEOUT_SECS,
                )),
                settle: Duration::from_secs(parse_or_default(
                    &lookup,
                    env_vars::SETTLE_TIMEOUT_SECS,
                    defaults::SETTLE_TIMEOUT_SECS,
                )),
                probe: Duration::from_secs(parse_or_default(
                    &lookup,
                    env_vars::PROBE_TIMEOUT_SECS,
                    defaults::PROBE_TIMEOUT_SECS,
                )),
            },
            confirmations: parse_or_default(&lookup, env_vars::CONFIRMATIONS, defaults::CONFIRMATIONS)
                .max(1),
        }
    }
}

fn default_contract_address() -> Address {
    defaults::CONTRACT_ADDRESS
        .parse()
        .unwrap_or_else(|_| Address::zero())
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("[CONFIG] {} has invalid value '{}', using default", key, raw);
                default
            }
        },
    }
}

/// Turn NOTES_RPC_<chainid>=url pairs into an override map. Unparseable suffixes are skipped.
pub fn parse_rpc_overrides<I>(vars: I) -> HashMap<u64, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(key, url)| {
            let chain_id = key.strip_prefix(env_vars::RPC_PREFIX)?.parse::<u64>().ok()?;
            let url = url.trim().to_string();
            if url.is_empty() { None } else { Some((chain_id, url)) }
        })
        .collect()
}

/// Parse a hex private key (with or without 0x) into a signing wallet
pub fn wallet_from_private_key(private_key: &str) -> Result<LocalWallet, String> {
    let key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
    let key_bytes = hex::decode(key_hex)
        .map_err(|e| format!("Invalid private key hex: {}", e))?;
    if key_bytes.len() != 32 {
        return Err(format!("Private key must be 32 bytes, got {}", key_bytes.len()));
    }

    let signing_key = SigningKey::from_bytes(key_bytes.as_slice().into())
        .map_err(|e| format!("Invalid private key: {}", e))?;

    Ok(LocalWallet::from(signing_key))
}

/// `NOTES_WALLET_PRIVATE_KEY` holds one key or a comma-separated list.
pub fn split_keys(keys: &str) -> impl Iterator<Item = &str> {
    keys.split(',').map(str::trim).filter(|k| !k.is_empty())
}

/// Derive the public address from a private key
fn derive_address_from_private_key(private_key: &str) -> Result<String, String> {
    let wallet = wallet_from_private_key(private_key)?;
    Ok(format!("{:?}", wallet.address()).to_lowercase())
}
