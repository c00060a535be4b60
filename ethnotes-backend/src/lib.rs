//! Wallet-backed notes core: network detection, wallet sessions, the contract
//! validity gate, fee-gated note operations and the local note cache.

pub mod cache;
pub mod config;
pub mod contract;
pub mod controllers;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod executor;
pub mod gate;
pub mod networks;
pub mod precedence;
pub mod session;
pub mod wallet;

#[cfg(test)]
mod testing;

use coordinator::NotesCoordinator;
use std::sync::Arc;
use std::time::Instant;
use wallet::LocalWalletProvider;

pub struct AppState {
    pub coordinator: Arc<NotesCoordinator>,
    /// Also registered with the coordinator; kept here for its account hooks
    pub local_wallet: Option<Arc<LocalWalletProvider>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<NotesCoordinator>) -> Self {
        Self {
            coordinator,
            local_wallet: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_local_wallet(mut self, wallet: Arc<LocalWalletProvider>) -> Self {
        self.local_wallet = Some(wallet);
        self
    }
}
