//! Network catalog: the static table of networks the notes contract may live on.
//!
//! Declaration order matters: the detector probes networks in this order and the
//! earliest network carrying the contract's byte-code wins.

use ethnotes_types::{NativeCurrencyView, NetworkDescriptor};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub explorer_urls: Vec<String>,
    pub native_currency: NativeCurrency,
}

impl Network {
    /// Hex form wallets expect, e.g. "0xaa36a7"
    pub fn chain_id_hex(&self) -> String {
        chain_id_to_hex(self.chain_id)
    }

    pub fn primary_rpc_url(&self) -> Option<&str> {
        self.rpc_urls.first().map(|s| s.as_str())
    }

    pub fn descriptor(&self) -> NetworkDescriptor {
        NetworkDescriptor {
            name: self.name.clone(),
            chain_id: self.chain_id,
            chain_id_hex: self.chain_id_hex(),
            rpc_urls: self.rpc_urls.clone(),
            explorer_urls: self.explorer_urls.clone(),
            native_currency: NativeCurrencyView {
                name: self.native_currency.name.clone(),
                symbol: self.native_currency.symbol.clone(),
                decimals: self.native_currency.decimals,
            },
        }
    }

    /// Parameters for a wallet add-chain request
    pub fn add_chain_params(&self) -> AddChainParams {
        AddChainParams {
            chain_id: self.chain_id_hex(),
            chain_name: self.name.clone(),
            native_currency: self.native_currency.clone(),
            rpc_urls: self.rpc_urls.clone(),
            block_explorer_urls: self.explorer_urls.clone(),
        }
    }
}

/// Body of a `wallet_addEthereumChain` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

pub fn chain_id_to_hex(chain_id: u64) -> String {
    format!("0x{:x}", chain_id)
}

pub fn chain_id_from_hex(hex_id: &str) -> Option<u64> {
    let digits = hex_id
        .strip_prefix("0x")
        .or_else(|| hex_id.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

static DEFAULT_NETWORKS: Lazy<Vec<Network>> = Lazy::new(|| {
    vec![
        Network {
            name: "Sepolia Testnet".to_string(),
            chain_id: 11155111,
            rpc_urls: vec!["https://sepolia.infura.io/v3/".to_string()],
            explorer_urls: vec!["https://sepolia.etherscan.io".to_string()],
            native_currency: NativeCurrency {
                name: "Sepolia Ether".to_string(),
                symbol: "SEP".to_string(),
                decimals: 18,
            },
        },
        Network {
            name: "Goerli Testnet".to_string(),
            chain_id: 5,
            rpc_urls: vec!["https://goerli.infura.io/v3/".to_string()],
            explorer_urls: vec!["https://goerli.etherscan.io".to_string()],
            native_currency: NativeCurrency {
                name: "Goerli Ether".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
            },
        },
    ]
});

/// Ordered, immutable set of supported networks.
#[derive(Debug, Clone)]
pub struct Catalog {
    networks: Vec<Network>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            networks: DEFAULT_NETWORKS.clone(),
        }
    }
}

impl Catalog {
    pub fn new(networks: Vec<Network>) -> Self {
        Self { networks }
    }

    /// Default catalog with RPC overrides placed ahead of the built-in endpoints.
    pub fn with_rpc_overrides(overrides: &HashMap<u64, String>) -> Self {
        let mut catalog = Self::default();
        for network in catalog.networks.iter_mut() {
            if let Some(url) = overrides.get(&network.chain_id) {
                network.rpc_urls.retain(|u| u != url);
                network.rpc_urls.insert(0, url.clone());
            }
        }
        catalog
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn by_chain_id(&self, chain_id: u64) -> Option<&Network> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }

    pub fn first(&self) -> Option<&Network> {
        self.networks.first()
    }

    /// Human label for a chain id; unknown chains render as "chain <id>".
    pub fn label_for(&self, chain_id: u64) -> String {
        self.by_chain_id(chain_id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("chain {}", chain_id))
    }
}
