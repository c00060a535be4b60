//! Contract Validity Gate.
//!
//! Validity is a function of the most recent probe only. The coordinator runs
//! the gate at initial load, after connect, after a chain-change reinit and
//! after every contract handle rebuild.

use crate::contract::NotesContract;
use crate::error::NotesError;
use crate::networks::Network;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub valid: bool,
    /// Connectivity diagnostic when invalid
    pub diagnostic: Option<NotesError>,
}

impl GateOutcome {
    pub fn valid() -> Self {
        Self {
            valid: true,
            diagnostic: None,
        }
    }

    pub fn invalid(diagnostic: NotesError) -> Self {
        Self {
            valid: false,
            diagnostic: Some(diagnostic),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidityGate {
    timeout: Duration,
}

impl ValidityGate {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Issue one no-side-effect call and classify a failure.
    pub async fn evaluate(
        &self,
        contract: &dyn NotesContract,
        active_chain: Option<u64>,
        required: Option<&Network>,
    ) -> GateOutcome {
        let result = match tokio::time::timeout(self.timeout, contract.probe()).await {
            Ok(result) => result,
            Err(_) => Err(format!("probe timed out after {:?}", self.timeout)),
        };

        match result {
            Ok(()) => {
                log::info!("[GATE] Contract {:?} is reachable", contract.address());
                GateOutcome::valid()
            }
            Err(reason) => {
                let outcome = GateOutcome::invalid(classify(active_chain, required, reason));
                if let Some(ref diag) = outcome.diagnostic {
                    log::warn!("[GATE] Contract invalid: {}", diag);
                }
                outcome
            }
        }
    }
}

/// WrongNetwork when the active chain is not the required one, otherwise unreachable.
pub fn classify(active_chain: Option<u64>, required: Option<&Network>, reason: String) -> NotesError {
    match required {
        Some(network) if active_chain != Some(network.chain_id) => NotesError::WrongNetwork {
            required: Box::new(network.clone()),
        },
        Some(_) => NotesError::ContractUnreachable(reason),
        None => NotesError::ContractUnreachable(format!(
            "not deployed on any supported network ({})",
            reason
        )),
    }
}
