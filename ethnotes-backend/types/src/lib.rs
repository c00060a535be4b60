//! Shared types between the ethnotes core and its presentation layer.

use serde::{Deserialize, Serialize};

// =====================================================
// Response envelope
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: ErrorView) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

// =====================================================
// Request bodies
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Wallet kind, e.g. "metamask", "rabby" or "local"
    pub wallet: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SwitchNetworkRequest {
    /// Target chain id. Absent means the network the contract was detected on.
    #[serde(default)]
    pub chain_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveNoteRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveEditRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LocalErrorRequest {
    #[serde(default)]
    pub message: Option<String>,
}

// =====================================================
// Domain views
// =====================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrencyView {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Descriptor used for "switch network" prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub name: String,
    pub chain_id: u64,
    pub chain_id_hex: String,
    pub rpc_urls: Vec<String>,
    pub explorer_urls: Vec<String>,
    pub native_currency: NativeCurrencyView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteView {
    /// Decimal rendering of the ledger-assigned id
    pub id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeQuoteView {
    pub ticket: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
    /// Raw amount in wei (decimal string)
    pub amount_wei: String,
    /// Amount formatted with 18 decimals
    pub amount_formatted: String,
    pub currency_symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorView {
    /// Stable snake_case kind, e.g. "wrong_network"
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_network: Option<NetworkDescriptor>,
}

/// Result of confirming a quote (or running a delete).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledView {
    pub ticket: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
    pub tx_hash: String,
}

/// Everything the presentation layer needs to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotesView {
    pub session_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub network_label: String,
    pub contract_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_network: Option<NetworkDescriptor>,
    pub notes: Vec<NoteView>,
    pub loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
    pub pending_quotes: Vec<FeeQuoteView>,
    pub edit_unlocked: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Wallet kinds that can be connected, in preference order
    pub wallets: Vec<String>,
}
