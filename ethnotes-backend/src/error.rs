//! Error taxonomy shared by the session, gate and executor layers.
//!
//! Connectivity-class errors come from the session manager and validity gate and
//! gate off mutating operations. Everything else is scoped to a single action and
//! never invalidates the session.

use crate::contract::{ActionKind, NoteId};
use crate::networks::Network;
use ethnotes_types::ErrorView;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotesError {
    #[error("{0} is not installed or not available")]
    ProviderUnavailable(String),

    #[error("Wallet connection was rejected: {0}")]
    ConnectionRejected(String),

    #[error("The Notes contract could not be found on this network. Please switch to {}", .required.name)]
    WrongNetwork { required: Box<Network> },

    #[error("Contract is not accessible: {0}")]
    ContractUnreachable(String),

    #[error("Failed to get {action} fee: {reason}")]
    FeeFetchFailed { action: ActionKind, reason: String },

    #[error("{action} transaction failed: {reason}")]
    TransactionFailed { action: ActionKind, reason: String },

    #[error("An operation is already in progress for note {0}")]
    OperationInProgress(NoteId),

    #[error("Connect a wallet first")]
    NotConnected,

    #[error("Note {0} not found")]
    NoteNotFound(NoteId),

    #[error("Fee quote {0} is unknown or no longer awaiting confirmation")]
    UnknownQuote(String),

    #[error("{action} timed out during {stage} after {secs}s")]
    Timeout {
        action: ActionKind,
        stage: &'static str,
        secs: u64,
    },

    #[error("Network switch failed: {0}")]
    NetworkSwitchFailed(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Raised by the presentation layer for the action it is showing
    #[error("{0}")]
    Local(String),
}

impl NotesError {
    /// Stable snake_case identifier for the presentation layer
    pub fn kind(&self) -> &'static str {
        match self {
            NotesError::ProviderUnavailable(_) => "provider_unavailable",
            NotesError::ConnectionRejected(_) => "connection_rejected",
            NotesError::WrongNetwork { .. } => "wrong_network",
            NotesError::ContractUnreachable(_) => "contract_unreachable",
            NotesError::FeeFetchFailed { .. } => "fee_fetch_failed",
            NotesError::TransactionFailed { .. } => "transaction_failed",
            NotesError::OperationInProgress(_) => "operation_in_progress",
            NotesError::NotConnected => "not_connected",
            NotesError::NoteNotFound(_) => "note_not_found",
            NotesError::UnknownQuote(_) => "unknown_quote",
            NotesError::Timeout { .. } => "timeout",
            NotesError::NetworkSwitchFailed(_) => "network_switch_failed",
            NotesError::Wallet(_) => "wallet_error",
            NotesError::Local(_) => "local",
        }
    }

    /// Errors owned by the session manager / validity gate.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            NotesError::ProviderUnavailable(_)
                | NotesError::ConnectionRejected(_)
                | NotesError::WrongNetwork { .. }
                | NotesError::ContractUnreachable(_)
                | NotesError::NetworkSwitchFailed(_)
                | NotesError::Wallet(_)
        )
    }

    pub fn required_network(&self) -> Option<&Network> {
        match self {
            NotesError::WrongNetwork { required } => Some(required),
            _ => None,
        }
    }

    pub fn to_view(&self) -> ErrorView {
        ErrorView {
            kind: self.kind().to_string(),
            message: self.to_string(),
            required_network: self.required_network().map(|n| n.descriptor()),
        }
    }
}

pub type NotesResult<T> = Result<T, NotesError>;
