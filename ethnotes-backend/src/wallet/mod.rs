//! Wallet provider abstraction.
//!
//! A wallet provider authorizes accounts, reports and switches the active chain,
//! pushes account/chain change notifications, and hands out contract handles
//! bound either to its read-only RPC connection or to a signing account.

pub mod local;

pub use local::LocalWalletProvider;

use crate::contract::NotesContract;
use crate::networks::AddChainParams;
use async_trait::async_trait;
use ethers::types::Address;
use std::fmt;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::broadcast;

/// Supported wallet kinds, in default-provider preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WalletKind {
    MetaMask,
    Rabby,
    Local,
}

impl WalletKind {
    pub const PREFERENCE: [WalletKind; 3] = [WalletKind::MetaMask, WalletKind::Rabby, WalletKind::Local];

    pub fn label(&self) -> &'static str {
        match self {
            WalletKind::MetaMask => "MetaMask",
            WalletKind::Rabby => "Rabby",
            WalletKind::Local => "Local wallet",
        }
    }
}

/// Notifications pushed by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// Empty means the user disconnected every account
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// EIP-1193 style error returned by wallet requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRpcError {
    pub code: i64,
    pub message: String,
}

impl WalletRpcError {
    /// User rejected the request
    pub const USER_REJECTED: i64 = 4001;
    /// Chain has not been added to the wallet
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INTERNAL: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == Self::UNRECOGNIZED_CHAIN
    }
}

impl fmt::Display for WalletRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for WalletRpcError {}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn kind(&self) -> WalletKind;

    /// Ask the user to authorize accounts; the first one becomes the session account.
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletRpcError>;

    async fn chain_id(&self) -> Result<u64, WalletRpcError>;

    async fn switch_chain(&self, chain_id_hex: &str) -> Result<(), WalletRpcError>;

    async fn add_chain(&self, params: &AddChainParams) -> Result<(), WalletRpcError>;

    /// New receiver for account/chain notifications.
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;

    fn read_only_contract(&self, address: Address) -> Result<Arc<dyn NotesContract>, String>;

    fn signer_contract(
        &self,
        address: Address,
        account: Address,
    ) -> Result<Arc<dyn NotesContract>, String>;
}

/// The wallet providers present in this environment.
#[derive(Default, Clone)]
pub struct WalletRegistry {
    providers: Vec<Arc<dyn WalletProvider>>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one of the same kind.
    pub fn register(&mut self, provider: Arc<dyn WalletProvider>) {
        let kind = provider.kind();
        self.providers.retain(|p| p.kind() != kind);
        log::info!("[WALLET] Registered {} provider", kind.label());
        self.providers.push(provider);
    }

    pub fn get(&self, kind: WalletKind) -> Option<Arc<dyn WalletProvider>> {
        self.providers.iter().find(|p| p.kind() == kind).cloned()
    }

    /// First available provider in preference order.
    pub fn default_provider(&self) -> Option<Arc<dyn WalletProvider>> {
        WalletKind::PREFERENCE.iter().find_map(|kind| self.get(*kind))
    }

    pub fn available(&self) -> Vec<WalletKind> {
        WalletKind::PREFERENCE
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }
}
