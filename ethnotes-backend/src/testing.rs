//! Scripted collaborators for unit tests.

use crate::contract::{ActionKind, NoteCall, NoteId, NotesContract, Settlement};
use crate::detector::CodeProbe;
use crate::executor::FeeConfirmer;
use crate::networks::{chain_id_from_hex, AddChainParams, Network};
use crate::wallet::{WalletEvent, WalletKind, WalletProvider, WalletRpcError};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, TxHash, U256};
use ethnotes_types::FeeQuoteView;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

const STALL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ContractState {
    notes: BTreeMap<NoteId, (String, String)>,
    next_id: u64,
    fees: HashMap<ActionKind, U256>,
    failing_fees: HashSet<ActionKind>,
    failing_notes: HashSet<NoteId>,
    stall_fees: bool,
    fail_probe: bool,
    fail_settle: bool,
    omit_created_event: bool,
    submitted: Vec<(NoteCall, U256)>,
    in_flight: HashMap<TxHash, NoteCall>,
}

/// In-memory ledger. Settling a transaction applies it to the ledger.
pub struct MockContract {
    address: Address,
    state: Mutex<ContractState>,
    probes: AtomicUsize,
    user_notes_calls: AtomicUsize,
    note_calls: AtomicUsize,
    fee_calls: AtomicUsize,
    settle_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockContract {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            address: Address::from_low_u64_be(0xa131),
            state: Mutex::new(ContractState {
                next_id: 1,
                ..Default::default()
            }),
            probes: AtomicUsize::new(0),
            user_notes_calls: AtomicUsize::new(0),
            note_calls: AtomicUsize::new(0),
            fee_calls: AtomicUsize::new(0),
            settle_gate: Mutex::new(None),
        })
    }

    /// Settlement waits for one `notify_one` on the returned handle per transaction.
    pub fn hold_settle(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.settle_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn seed_note(&self, id: u64, title: &str, content: &str) {
        let mut state = self.state.lock();
        state
            .notes
            .insert(NoteId::from_u64(id), (title.to_string(), content.to_string()));
        state.next_id = state.next_id.max(id + 1);
    }

    pub fn ledger_note(&self, id: u64) -> Option<(String, String)> {
        self.state.lock().notes.get(&NoteId::from_u64(id)).cloned()
    }

    pub fn set_fee(&self, action: ActionKind, fee: U256) {
        self.state.lock().fees.insert(action, fee);
    }

    pub fn fail_fee(&self, action: ActionKind) {
        self.state.lock().failing_fees.insert(action);
    }

    pub fn fail_note(&self, id: u64) {
        self.state.lock().failing_notes.insert(NoteId::from_u64(id));
    }

    pub fn stall_fees(&self, stall: bool) {
        self.state.lock().stall_fees = stall;
    }

    pub fn fail_probe(&self, fail: bool) {
        self.state.lock().fail_probe = fail;
    }

    pub fn fail_settle(&self, fail: bool) {
        self.state.lock().fail_settle = fail;
    }

    pub fn omit_created_event(&self, omit: bool) {
        self.state.lock().omit_created_event = omit;
    }

    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Remote calls other than the validity probe
    pub fn read_calls(&self) -> usize {
        self.user_notes_calls.load(Ordering::SeqCst) + self.note_calls.load(Ordering::SeqCst)
    }

    pub fn fee_calls(&self) -> usize {
        self.fee_calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<(NoteCall, U256)> {
        self.state.lock().submitted.clone()
    }
}

#[async_trait]
impl NotesContract for MockContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn probe(&self) -> Result<(), String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().fail_probe {
            return Err("execution reverted".to_string());
        }
        Ok(())
    }

    async fn get_user_notes(&self) -> Result<Vec<NoteId>, String> {
        self.user_notes_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().notes.keys().copied().collect())
    }

    async fn get_note(&self, id: NoteId) -> Result<(String, String), String> {
        self.note_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.failing_notes.contains(&id) {
            return Err(format!("getNote({}) reverted", id));
        }
        state
            .notes
            .get(&id)
            .cloned()
            .ok_or_else(|| format!("note {} does not exist", id))
    }

    async fn fee(&self, action: ActionKind) -> Result<U256, String> {
        self.fee_calls.fetch_add(1, Ordering::SeqCst);
        let stall = self.state.lock().stall_fees;
        if stall {
            tokio::time::sleep(STALL).await;
        }
        let state = self.state.lock();
        if state.failing_fees.contains(&action) {
            return Err("rpc unavailable".to_string());
        }
        Ok(state
            .fees
            .get(&action)
            .copied()
            .unwrap_or_else(|| U256::exp10(15)))
    }

    async fn submit(&self, call: &NoteCall, value: U256) -> Result<TxHash, String> {
        let mut state = self.state.lock();
        state.submitted.push((call.clone(), value));
        let hash = TxHash::from_low_u64_be(state.submitted.len() as u64);
        state.in_flight.insert(hash, call.clone());
        Ok(hash)
    }

    async fn settle(&self, tx_hash: TxHash, _confirmations: usize) -> Result<Settlement, String> {
        let gate = self.settle_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.state.lock();
        let call = state
            .in_flight
            .remove(&tx_hash)
            .ok_or_else(|| format!("unknown transaction {:?}", tx_hash))?;
        if state.fail_settle {
            return Err(format!("Transaction {:?} reverted", tx_hash));
        }

        let mut created_note = None;
        match call {
            NoteCall::Create { title } => {
                let id = NoteId::from_u64(state.next_id);
                state.next_id += 1;
                state.notes.insert(id, (title, String::new()));
                if !state.omit_created_event {
                    created_note = Some(id);
                }
            }
            NoteCall::Save { id, content } => {
                if let Some(note) = state.notes.get_mut(&id) {
                    note.1 = content;
                }
            }
            NoteCall::StartEdit { .. } => {}
            NoteCall::SaveEdit { id, title, content } => {
                state.notes.insert(id, (title, content));
            }
            NoteCall::Delete { id } => {
                state.notes.remove(&id);
            }
        }

        Ok(Settlement {
            tx_hash,
            block_number: Some(state.submitted.len() as u64),
            created_note,
        })
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

struct WalletState {
    accounts: Vec<Address>,
    chain_id: u64,
    known_chains: HashSet<u64>,
    reject: bool,
}

pub struct MockWallet {
    kind: WalletKind,
    state: Mutex<WalletState>,
    events: broadcast::Sender<WalletEvent>,
    contract: Arc<MockContract>,
    account_requests: AtomicUsize,
    switch_requests: AtomicUsize,
    add_requests: AtomicUsize,
}

pub struct MockWalletBuilder {
    kind: WalletKind,
    accounts: Vec<Address>,
    chain_id: u64,
    known_chains: Vec<u64>,
    reject: bool,
    contract: Option<Arc<MockContract>>,
}

impl MockWalletBuilder {
    pub fn kind(mut self, kind: WalletKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Chains the wallet can switch to without an add-chain request
    pub fn known_chains(mut self, chains: Vec<u64>) -> Self {
        self.known_chains = chains;
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    pub fn contract(mut self, contract: Arc<MockContract>) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn build(self) -> Arc<MockWallet> {
        let mut known_chains: HashSet<u64> = self.known_chains.into_iter().collect();
        known_chains.insert(self.chain_id);
        let (events, _) = broadcast::channel(16);
        Arc::new(MockWallet {
            kind: self.kind,
            state: Mutex::new(WalletState {
                accounts: self.accounts,
                chain_id: self.chain_id,
                known_chains,
                reject: self.reject,
            }),
            events,
            contract: self.contract.unwrap_or_else(MockContract::new),
            account_requests: AtomicUsize::new(0),
            switch_requests: AtomicUsize::new(0),
            add_requests: AtomicUsize::new(0),
        })
    }
}

pub fn account(n: u64) -> Address {
    Address::from_low_u64_be(0x1000 + n)
}

impl MockWallet {
    pub fn builder() -> MockWalletBuilder {
        MockWalletBuilder {
            kind: WalletKind::MetaMask,
            accounts: vec![account(1)],
            chain_id: 11155111,
            known_chains: Vec::new(),
            reject: false,
            contract: None,
        }
    }

    pub fn contract(&self) -> Arc<MockContract> {
        self.contract.clone()
    }

    /// Push a notification as the wallet would.
    pub fn emit(&self, event: WalletEvent) {
        if let WalletEvent::ChainChanged(chain_id) = event {
            self.state.lock().chain_id = chain_id;
        }
        if let WalletEvent::AccountsChanged(ref accounts) = event {
            self.state.lock().accounts = accounts.clone();
        }
        let _ = self.events.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn account_requests(&self) -> usize {
        self.account_requests.load(Ordering::SeqCst)
    }

    pub fn switch_requests(&self) -> usize {
        self.switch_requests.load(Ordering::SeqCst)
    }

    pub fn add_requests(&self) -> usize {
        self.add_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    fn kind(&self) -> WalletKind {
        self.kind
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, WalletRpcError> {
        self.account_requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.reject {
            return Err(WalletRpcError::new(
                WalletRpcError::USER_REJECTED,
                "User rejected the request.",
            ));
        }
        Ok(state.accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64, WalletRpcError> {
        Ok(self.state.lock().chain_id)
    }

    async fn switch_chain(&self, chain_id_hex: &str) -> Result<(), WalletRpcError> {
        self.switch_requests.fetch_add(1, Ordering::SeqCst);
        let chain_id = chain_id_from_hex(chain_id_hex)
            .ok_or_else(|| WalletRpcError::new(-32602, "bad chain id"))?;
        {
            let mut state = self.state.lock();
            if !state.known_chains.contains(&chain_id) {
                return Err(WalletRpcError::new(
                    WalletRpcError::UNRECOGNIZED_CHAIN,
                    "Unrecognized chain ID",
                ));
            }
            if state.chain_id == chain_id {
                return Ok(());
            }
            state.chain_id = chain_id;
        }
        let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
        Ok(())
    }

    async fn add_chain(&self, params: &AddChainParams) -> Result<(), WalletRpcError> {
        self.add_requests.fetch_add(1, Ordering::SeqCst);
        let chain_id = chain_id_from_hex(&params.chain_id)
            .ok_or_else(|| WalletRpcError::new(-32602, "bad chain id"))?;
        self.state.lock().known_chains.insert(chain_id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    fn read_only_contract(&self, _address: Address) -> Result<Arc<dyn NotesContract>, String> {
        Ok(self.contract.clone())
    }

    fn signer_contract(
        &self,
        _address: Address,
        _account: Address,
    ) -> Result<Arc<dyn NotesContract>, String> {
        Ok(self.contract.clone())
    }
}

// ---------------------------------------------------------------------------
// Byte-code probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Empty,
    Code,
    Fail,
    Stall,
}

pub struct MockProbe {
    outcomes: Mutex<HashMap<u64, ProbeOutcome>>,
    calls: Mutex<Vec<u64>>,
}

impl MockProbe {
    /// Every network reports empty code until told otherwise
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with(self: Arc<Self>, chain_id: u64, outcome: ProbeOutcome) -> Arc<Self> {
        self.outcomes.lock().insert(chain_id, outcome);
        self
    }

    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CodeProbe for MockProbe {
    async fn get_code(&self, network: &Network, _address: Address) -> Result<Bytes, String> {
        self.calls.lock().push(network.chain_id);
        let outcome = self
            .outcomes
            .lock()
            .get(&network.chain_id)
            .copied()
            .unwrap_or(ProbeOutcome::Empty);
        match outcome {
            ProbeOutcome::Empty => Ok(Bytes::new()),
            ProbeOutcome::Code => Ok(Bytes::from(vec![0x60, 0x80, 0x60, 0x40])),
            ProbeOutcome::Fail => Err("connection refused".to_string()),
            ProbeOutcome::Stall => {
                tokio::time::sleep(STALL).await;
                Ok(Bytes::new())
            }
        }
    }
}

/// Answers every fee quote the same way.
pub struct ScriptedConfirmer(pub bool);

#[async_trait]
impl FeeConfirmer for ScriptedConfirmer {
    async fn confirm(&self, _quote: &FeeQuoteView) -> bool {
        self.0
    }
}

/// Poll until `check` holds or a second has passed.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
