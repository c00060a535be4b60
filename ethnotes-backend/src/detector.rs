//! Network Detector: finds the catalog network hosting the contract's byte-code.

use crate::networks::{Catalog, Network};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes};
use std::sync::Arc;
use std::time::Duration;

/// Reads the code stored at an address on one network.
#[async_trait]
pub trait CodeProbe: Send + Sync {
    async fn get_code(&self, network: &Network, address: Address) -> Result<Bytes, String>;
}

/// Opens an independent JSON-RPC connection to the network's first endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct RpcCodeProbe;

#[async_trait]
impl CodeProbe for RpcCodeProbe {
    async fn get_code(&self, network: &Network, address: Address) -> Result<Bytes, String> {
        let url = network
            .primary_rpc_url()
            .ok_or_else(|| format!("{} has no RPC endpoint", network.name))?;
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| format!("Invalid RPC URL '{}': {}", url, e))?;
        provider
            .get_code(address, None)
            .await
            .map_err(|e| format!("eth_getCode on {} failed: {}", network.name, e))
    }
}

pub struct Detector {
    probe: Arc<dyn CodeProbe>,
    timeout: Duration,
}

impl Detector {
    pub fn new(probe: Arc<dyn CodeProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// Probe the catalog in declared order and return the first network with
    /// non-empty code at `address`. A failed or timed-out probe counts as absent.
    pub async fn detect_contract_network(
        &self,
        catalog: &Catalog,
        address: Address,
    ) -> Option<Network> {
        for network in catalog.networks() {
            let present = match tokio::time::timeout(self.timeout, self.probe.get_code(network, address)).await {
                Ok(Ok(code)) => !code.is_empty(),
                Ok(Err(e)) => {
                    log::warn!("[DETECT] Probe on {} failed: {}", network.name, e);
                    false
                }
                Err(_) => {
                    log::warn!(
                        "[DETECT] Probe on {} timed out after {:?}",
                        network.name,
                        self.timeout
                    );
                    false
                }
            };

            if present {
                log::info!(
                    "[DETECT] Contract {:?} found on {} ({})",
                    address,
                    network.name,
                    network.chain_id
                );
                return Some(network.clone());
            }
            log::debug!("[DETECT] No code for {:?} on {}", address, network.name);
        }

        log::warn!("[DETECT] Contract {:?} not found on any supported network", address);
        None
    }
}
