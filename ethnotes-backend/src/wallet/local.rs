//! Key-backed wallet provider.
//!
//! Stands in for a browser wallet when the service holds its own keys. Only the
//! starting chain is known up front; any other chain has to be added before it
//! can be switched to, exactly like a freshly installed extension wallet.

use super::{WalletEvent, WalletKind, WalletProvider, WalletRpcError};
use crate::config::{split_keys, wallet_from_private_key};
use crate::contract::{EthersNotesContract, NotesContract};
use crate::networks::{chain_id_from_hex, AddChainParams, Catalog, NativeCurrency, Network};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_BUFFER: usize = 16;

struct LocalState {
    authorized: bool,
    account_index: usize,
    active: Network,
    known: HashMap<u64, Network>,
}

pub struct LocalWalletProvider {
    wallets: Vec<LocalWallet>,
    state: RwLock<LocalState>,
    events: broadcast::Sender<WalletEvent>,
}

impl LocalWalletProvider {
    /// `start_chain` falls back to the first catalog network when absent or unknown.
    pub fn new(
        wallets: Vec<LocalWallet>,
        catalog: &Catalog,
        start_chain: Option<u64>,
    ) -> Result<Self, String> {
        if wallets.is_empty() {
            return Err("Local wallet needs at least one key".to_string());
        }
        let active = start_chain
            .and_then(|id| catalog.by_chain_id(id))
            .or_else(|| catalog.first())
            .cloned()
            .ok_or_else(|| "Network catalog is empty".to_string())?;

        let mut known = HashMap::new();
        known.insert(active.chain_id, active.clone());

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            wallets,
            state: RwLock::new(LocalState {
                authorized: false,
                account_index: 0,
                active,
                known,
            }),
            events,
        })
    }

    /// One key or a comma-separated list; `rotate_account` walks the list.
    pub fn from_private_key(
        private_keys: &str,
        catalog: &Catalog,
        start_chain: Option<u64>,
    ) -> Result<Self, String> {
        let wallets = split_keys(private_keys)
            .map(wallet_from_private_key)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(wallets, catalog, start_chain)
    }

    pub fn current_account(&self) -> Address {
        let state = self.state.read();
        self.wallets[state.account_index % self.wallets.len()].address()
    }

    pub fn active_network(&self) -> Network {
        self.state.read().active.clone()
    }

    /// Move to the next key and announce it, as a user picking another account would.
    pub fn rotate_account(&self) -> Option<Address> {
        let address = {
            let mut state = self.state.write();
            if !state.authorized {
                return None;
            }
            state.account_index = (state.account_index + 1) % self.wallets.len();
            self.wallets[state.account_index].address()
        };
        log::info!("[WALLET] Local wallet switched to account {:?}", address);
        let _ = self.events.send(WalletEvent::AccountsChanged(vec![address]));
        Some(address)
    }

    /// Drop the authorization and announce an empty account list.
    pub fn revoke(&self) {
        self.state.write().authorized = false;
        log::info!("[WALLET] Local wallet authorization revoked");
        let _ = self.events.send(WalletEvent::AccountsChanged(Vec::new()));
    }

    fn http_provider(&self) -> Result<(Provider<Http>, u64), String> {
        let active = self.state.read().active.clone();
        let url = active
            .primary_rpc_url()
            .ok_or_else(|| format!("{} has no RPC endpoint", active.name))?;
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| format!("Invalid RPC URL '{}': {}", url, e))?;
        Ok((provider, active.chain_id))
    }
}

#[async_trait]
impl WalletProvider for LocalWalletProvider {
    fn kind(&self) -> WalletKind {
        WalletKind::Local
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, WalletRpcError> {
        let mut state = self.state.write();
        state.authorized = true;
        let first = state.account_index % self.wallets.len();
        // current account first, like an extension reports the selected one
        let accounts = self.wallets[first..]
            .iter()
            .chain(self.wallets[..first].iter())
            .map(|w| w.address())
            .collect();
        Ok(accounts)
    }

    async fn chain_id(&self) -> Result<u64, WalletRpcError> {
        Ok(self.state.read().active.chain_id)
    }

    async fn switch_chain(&self, chain_id_hex: &str) -> Result<(), WalletRpcError> {
        let chain_id = chain_id_from_hex(chain_id_hex).ok_or_else(|| {
            WalletRpcError::new(-32602, format!("Invalid chain id '{}'", chain_id_hex))
        })?;

        let changed = {
            let mut state = self.state.write();
            let network = state.known.get(&chain_id).cloned().ok_or_else(|| {
                WalletRpcError::new(
                    WalletRpcError::UNRECOGNIZED_CHAIN,
                    format!("Unrecognized chain ID \"{}\"", chain_id_hex),
                )
            })?;
            let changed = state.active.chain_id != chain_id;
            state.active = network;
            changed
        };

        if changed {
            log::info!("[WALLET] Local wallet switched to chain {}", chain_id);
            let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
        }
        Ok(())
    }

    async fn add_chain(&self, params: &AddChainParams) -> Result<(), WalletRpcError> {
        let chain_id = chain_id_from_hex(&params.chain_id).ok_or_else(|| {
            WalletRpcError::new(-32602, format!("Invalid chain id '{}'", params.chain_id))
        })?;
        if params.rpc_urls.is_empty() {
            return Err(WalletRpcError::new(-32602, "rpcUrls must not be empty"));
        }

        let network = Network {
            name: params.chain_name.clone(),
            chain_id,
            rpc_urls: params.rpc_urls.clone(),
            explorer_urls: params.block_explorer_urls.clone(),
            native_currency: NativeCurrency {
                name: params.native_currency.name.clone(),
                symbol: params.native_currency.symbol.clone(),
                decimals: params.native_currency.decimals,
            },
        };
        log::info!("[WALLET] Local wallet added chain {} ({})", network.name, chain_id);
        self.state.write().known.insert(chain_id, network);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    fn read_only_contract(&self, address: Address) -> Result<Arc<dyn NotesContract>, String> {
        let (provider, _) = self.http_provider()?;
        Ok(Arc::new(EthersNotesContract::new(address, Arc::new(provider))))
    }

    fn signer_contract(
        &self,
        address: Address,
        account: Address,
    ) -> Result<Arc<dyn NotesContract>, String> {
        let wallet = self
            .wallets
            .iter()
            .find(|w| w.address() == account)
            .cloned()
            .ok_or_else(|| format!("No local key for account {:?}", account))?;
        let (provider, chain_id) = self.http_provider()?;
        let client = SignerMiddleware::new(provider, wallet.with_chain_id(chain_id));
        Ok(Arc::new(EthersNotesContract::new(address, Arc::new(client))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // well-known development keys
    const KEY_A: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KEY_B: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn provider() -> LocalWalletProvider {
        let wallets = vec![
            wallet_from_private_key(KEY_A).unwrap(),
            wallet_from_private_key(KEY_B).unwrap(),
        ];
        LocalWalletProvider::new(wallets, &Catalog::default(), None).unwrap()
    }

    #[tokio::test]
    async fn test_starts_on_first_catalog_network() {
        let wallet = provider();
        assert_eq!(wallet.chain_id().await.unwrap(), 11155111);
        assert_eq!(
            format!("{:?}", wallet.current_account()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[tokio::test]
    async fn test_switch_to_unknown_chain_reports_4902() {
        let wallet = provider();
        let err = wallet.switch_chain("0x5").await.unwrap_err();
        assert!(err.is_unrecognized_chain());
        assert_eq!(wallet.chain_id().await.unwrap(), 11155111);
    }

    #[tokio::test]
    async fn test_add_then_switch_emits_chain_changed() {
        let wallet = provider();
        let mut events = wallet.subscribe();
        let goerli = Catalog::default().by_chain_id(5).cloned().unwrap();

        wallet.add_chain(&goerli.add_chain_params()).await.unwrap();
        wallet.switch_chain("0x5").await.unwrap();

        assert_eq!(wallet.chain_id().await.unwrap(), 5);
        assert_eq!(events.recv().await.unwrap(), WalletEvent::ChainChanged(5));
        assert_eq!(wallet.active_network().name, "Goerli Testnet");
    }

    #[tokio::test]
    async fn test_switch_to_current_chain_is_silent() {
        let wallet = provider();
        let mut events = wallet.subscribe();
        wallet.switch_chain("0xaa36a7").await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rotate_requires_authorization() {
        let wallet = provider();
        assert!(wallet.rotate_account().is_none());

        let accounts = wallet.request_accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);

        let mut events = wallet.subscribe();
        let next = wallet.rotate_account().unwrap();
        assert_eq!(events.recv().await.unwrap(), WalletEvent::AccountsChanged(vec![next]));
        assert_eq!(wallet.request_accounts().await.unwrap()[0], next);

        wallet.revoke();
        assert_eq!(events.recv().await.unwrap(), WalletEvent::AccountsChanged(vec![]));
    }

    #[test]
    fn test_contract_handles() {
        let wallet = provider();
        let address = Address::from_low_u64_be(0xbeef);
        let read = wallet.read_only_contract(address).unwrap();
        assert_eq!(read.address(), address);

        assert!(wallet.signer_contract(address, wallet.current_account()).is_ok());
        assert!(wallet.signer_contract(address, Address::zero()).is_err());
    }

    #[test]
    fn test_rejects_empty_key_set() {
        assert!(LocalWalletProvider::new(vec![], &Catalog::default(), None).is_err());
        assert!(LocalWalletProvider::from_private_key("0x12", &Catalog::default(), None).is_err());
        let pair = format!("{}, {}", KEY_A, KEY_B);
        let wallet = LocalWalletProvider::from_private_key(&pair, &Catalog::default(), None).unwrap();
        assert_eq!(wallet.wallets.len(), 2);
    }
}
