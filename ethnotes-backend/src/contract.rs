//! Notes contract surface.
//!
//! `NotesContract` is the seam between the core and the remote ledger program.
//! The ethers-backed implementation talks JSON-RPC through any `Middleware`:
//! a plain `Provider<Http>` for read-only handles, a `SignerMiddleware` once a
//! wallet session exists.

use async_trait::async_trait;
use ethers::contract::{abigen, parse_log};
use ethers::providers::{Middleware, PendingTransaction};
use ethers::types::{Address, TxHash, U256, U64};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};

abigen!(
    NotesContractAbi,
    r#"[
        function getUserNotes() external view returns (uint256[])
        function getNote(uint256 noteId) external view returns (string, string)
        function createNoteFee() external view returns (uint256)
        function saveNoteFee() external view returns (uint256)
        function editNoteFee() external view returns (uint256)
        function saveEditFee() external view returns (uint256)
        function createNote(string title) external payable
        function saveNote(uint256 noteId, string content) external payable
        function startEditNote(uint256 noteId) external payable
        function saveEditedNote(uint256 noteId, string title, string content) external payable
        function deleteNote(uint256 noteId) external
        event NoteCreated(uint256 indexed noteId, address indexed owner, string title)
    ]"#
);

/// Ledger-assigned note identifier. Rendered in decimal everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteId(pub U256);

impl NoteId {
    pub fn from_u64(id: u64) -> Self {
        Self(U256::from(id))
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_dec_str(s.trim())
            .map(NoteId)
            .map_err(|e| format!("Invalid note id '{}': {}", s, e))
    }
}

/// Mutating actions. Every one but `Delete` carries a fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum ActionKind {
    Create,
    Save,
    StartEdit,
    SaveEdit,
    Delete,
}

impl ActionKind {
    pub fn fee_exempt(&self) -> bool {
        matches!(self, ActionKind::Delete)
    }
}

/// A mutating contract call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteCall {
    Create { title: String },
    Save { id: NoteId, content: String },
    StartEdit { id: NoteId },
    SaveEdit { id: NoteId, title: String, content: String },
    Delete { id: NoteId },
}

impl NoteCall {
    pub fn kind(&self) -> ActionKind {
        match self {
            NoteCall::Create { .. } => ActionKind::Create,
            NoteCall::Save { .. } => ActionKind::Save,
            NoteCall::StartEdit { .. } => ActionKind::StartEdit,
            NoteCall::SaveEdit { .. } => ActionKind::SaveEdit,
            NoteCall::Delete { .. } => ActionKind::Delete,
        }
    }

    /// The note this call targets. `None` for creation.
    pub fn note_id(&self) -> Option<NoteId> {
        match self {
            NoteCall::Create { .. } => None,
            NoteCall::Save { id, .. }
            | NoteCall::StartEdit { id }
            | NoteCall::SaveEdit { id, .. }
            | NoteCall::Delete { id } => Some(*id),
        }
    }
}

/// Outcome of a transaction that reached finality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    /// Id carried by a `NoteCreated` event in the receipt, if any
    pub created_note: Option<NoteId>,
}

#[async_trait]
pub trait NotesContract: Send + Sync {
    fn address(&self) -> Address;

    /// No-side-effect call used by the validity gate.
    async fn probe(&self) -> Result<(), String> {
        self.get_user_notes().await.map(|_| ())
    }

    async fn get_user_notes(&self) -> Result<Vec<NoteId>, String>;

    /// Returns (title, content)
    async fn get_note(&self, id: NoteId) -> Result<(String, String), String>;

    /// Current fee for a fee-bearing action. Fee-exempt actions quote zero.
    async fn fee(&self, action: ActionKind) -> Result<U256, String>;

    /// Sign and broadcast, returning once the node accepted the transaction.
    async fn submit(&self, call: &NoteCall, value: U256) -> Result<TxHash, String>;

    /// Wait until the transaction has `confirmations` confirmations.
    async fn settle(&self, tx_hash: TxHash, confirmations: usize) -> Result<Settlement, String>;
}

/// ethers-backed contract handle.
pub struct EthersNotesContract<M: Middleware> {
    client: Arc<M>,
    contract: NotesContractAbi<M>,
}

impl<M: Middleware + 'static> EthersNotesContract<M> {
    pub fn new(address: Address, client: Arc<M>) -> Self {
        let contract = NotesContractAbi::new(address, client.clone());
        Self { client, contract }
    }
}

#[async_trait]
impl<M: Middleware + 'static> NotesContract for EthersNotesContract<M> {
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn get_user_notes(&self) -> Result<Vec<NoteId>, String> {
        let ids = self
            .contract
            .get_user_notes()
            .call()
            .await
            .map_err(|e| format!("getUserNotes failed: {}", e))?;
        Ok(ids.into_iter().map(NoteId).collect())
    }

    async fn get_note(&self, id: NoteId) -> Result<(String, String), String> {
        self.contract
            .get_note(id.0)
            .call()
            .await
            .map_err(|e| format!("getNote({}) failed: {}", id, e))
    }

    async fn fee(&self, action: ActionKind) -> Result<U256, String> {
        let call = match action {
            ActionKind::Create => self.contract.create_note_fee(),
            ActionKind::Save => self.contract.save_note_fee(),
            ActionKind::StartEdit => self.contract.edit_note_fee(),
            ActionKind::SaveEdit => self.contract.save_edit_fee(),
            ActionKind::Delete => return Ok(U256::zero()),
        };
        call.call()
            .await
            .map_err(|e| format!("{} fee lookup failed: {}", action, e))
    }

    async fn submit(&self, call: &NoteCall, value: U256) -> Result<TxHash, String> {
        let tx = match call {
            NoteCall::Create { title } => self.contract.create_note(title.clone()),
            NoteCall::Save { id, content } => self.contract.save_note(id.0, content.clone()),
            NoteCall::StartEdit { id } => self.contract.start_edit_note(id.0),
            NoteCall::SaveEdit { id, title, content } => {
                self.contract
                    .save_edited_note(id.0, title.clone(), content.clone())
            }
            NoteCall::Delete { id } => self.contract.delete_note(id.0),
        }
        .value(value);

        let pending = tx
            .send()
            .await
            .map_err(|e| format!("{} submission failed: {}", call.kind(), e))?;
        Ok(pending.tx_hash())
    }

    async fn settle(&self, tx_hash: TxHash, confirmations: usize) -> Result<Settlement, String> {
        let receipt = PendingTransaction::new(tx_hash, self.client.provider())
            .confirmations(confirmations)
            .await
            .map_err(|e| format!("Waiting for {:?} failed: {}", tx_hash, e))?
            .ok_or_else(|| format!("Transaction {:?} was dropped", tx_hash))?;

        if receipt.status != Some(U64::from(1)) {
            return Err(format!("Transaction {:?} reverted", tx_hash));
        }

        let address = self.address();
        let created_note = receipt
            .logs
            .iter()
            .filter(|log| log.address == address)
            .find_map(|log| parse_log::<NoteCreatedFilter>(log.clone()).ok())
            .map(|event| NoteId(event.note_id));

        Ok(Settlement {
            tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            created_note,
        })
    }
}
