//! The notes coordinator.
//!
//! One object owns the session, the contract handle, the validity state, the
//! error sources, the note cache and the executor. Every mutation flows through
//! its operations. Lifecycle changes (initialize, connect, disconnect, wallet
//! notifications) are serialized on an async mutex; the synchronous state sits
//! behind a `parking_lot` mutex that is never held across an await.
//!
//! Lock order: `state` before the cache and executor internals.

use crate::cache::{Note, NoteCache};
use crate::config::Config;
use crate::contract::{NoteCall, NoteId, NotesContract, Settlement};
use crate::detector::{CodeProbe, Detector};
use crate::error::{NotesError, NotesResult};
use crate::executor::{reconcile, Executor, FeeConfirmer, OperationScope, PendingOperation};
use crate::gate::ValidityGate;
use crate::networks::{Catalog, Network};
use crate::precedence::ErrorBoard;
use crate::session::{spawn_subscriber, Session, Subscription};
use crate::wallet::{WalletEvent, WalletKind, WalletProvider, WalletRegistry};
use ethnotes_types::{FeeQuoteView, NotesView, SettledView};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

#[derive(Default)]
struct CoreState {
    session: Session,
    /// Provider backing read-only probing; retained across disconnects
    provider: Option<Arc<dyn WalletProvider>>,
    contract: Option<Arc<dyn NotesContract>>,
    contract_valid: bool,
    active_chain: Option<u64>,
    required: Option<Network>,
    errors: ErrorBoard,
    edit_unlocked: BTreeSet<NoteId>,
}

impl CoreState {
    /// Diagnostic for refusing an action while the gate is closed. It is the
    /// connectivity diagnostic itself, so `record` leaves it out of the domain slot.
    fn gate_error(&mut self) -> NotesError {
        if let Some(diagnostic) = self.errors.connectivity() {
            return diagnostic.clone();
        }
        let diagnostic =
            NotesError::ContractUnreachable("contract validity has not been established".to_string());
        self.errors.set_connectivity(Some(diagnostic.clone()));
        diagnostic
    }

    fn is_gate_refusal(&self, err: &NotesError) -> bool {
        !self.contract_valid && self.errors.connectivity() == Some(err)
    }
}

struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct NotesCoordinator {
    config: Config,
    catalog: Catalog,
    registry: WalletRegistry,
    detector: Detector,
    gate: ValidityGate,
    executor: Executor,
    cache: NoteCache,
    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<CoreState>,
    loading: AtomicUsize,
    this: Weak<NotesCoordinator>,
}

impl NotesCoordinator {
    pub fn new(config: Config, registry: WalletRegistry, probe: Arc<dyn CodeProbe>) -> Arc<Self> {
        let catalog = Catalog::with_rpc_overrides(&config.rpc_overrides);
        Self::with_catalog(config, catalog, registry, probe)
    }

    pub fn with_catalog(
        config: Config,
        catalog: Catalog,
        registry: WalletRegistry,
        probe: Arc<dyn CodeProbe>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            detector: Detector::new(probe, config.timeouts.probe),
            gate: ValidityGate::new(config.timeouts.probe),
            executor: Executor::new(config.timeouts, config.confirmations),
            cache: NoteCache::new(),
            lifecycle: tokio::sync::Mutex::new(()),
            state: Mutex::new(CoreState::default()),
            loading: AtomicUsize::new(0),
            this: this.clone(),
            catalog,
            registry,
            config,
        })
    }

    pub fn available_wallets(&self) -> Vec<WalletKind> {
        self.registry.available()
    }

    /// Record an operation's failure in the domain error slot. Refusals by the
    /// closed gate are already on the connectivity source.
    fn record<T>(&self, result: NotesResult<T>) -> NotesResult<T> {
        if let Err(ref e) = result {
            let mut state = self.state.lock();
            if !state.is_gate_refusal(e) {
                state.errors.set_domain(e.clone());
            }
        }
        result
    }

    // =====================================================
    // Lifecycle
    // =====================================================

    /// Initial load: default provider, chain, detection, read-only handle, gate.
    pub async fn initialize(&self) {
        let _guard = self.lifecycle.lock().await;
        self.bootstrap(self.registry.default_provider()).await;
    }

    async fn bootstrap(&self, provider: Option<Arc<dyn WalletProvider>>) {
        let Some(provider) = provider else {
            log::warn!("[SESSION] No wallet provider available");
            let mut state = self.state.lock();
            state.provider = None;
            state.contract = None;
            state.contract_valid = false;
            state.active_chain = None;
            state.errors.set_connectivity(Some(NotesError::ProviderUnavailable(
                "No wallet provider".to_string(),
            )));
            return;
        };

        let active_chain = self.read_chain_id(provider.as_ref()).await;
        let required = self
            .detector
            .detect_contract_network(&self.catalog, self.config.contract_address)
            .await;
        {
            let mut state = self.state.lock();
            state.provider = Some(provider.clone());
            state.active_chain = active_chain;
            state.required = required;
        }

        match provider.read_only_contract(self.config.contract_address) {
            Ok(contract) => {
                self.bind_contract(contract).await;
            }
            Err(e) => self.unbind_contract(NotesError::ContractUnreachable(e)),
        }
    }

    async fn read_chain_id(&self, provider: &dyn WalletProvider) -> Option<u64> {
        let limit = self.config.timeouts.probe;
        match tokio::time::timeout(limit, provider.chain_id()).await {
            Ok(Ok(chain_id)) => Some(chain_id),
            Ok(Err(e)) => {
                log::warn!("[SESSION] Could not read chain id: {}", e);
                None
            }
            Err(_) => {
                log::warn!("[SESSION] Chain id request timed out after {:?}", limit);
                None
            }
        }
    }

    /// Handle rebuild: bind `contract` and run the validity gate on it.
    async fn bind_contract(&self, contract: Arc<dyn NotesContract>) -> bool {
        let (active_chain, required) = {
            let state = self.state.lock();
            (state.active_chain, state.required.clone())
        };
        let outcome = self
            .gate
            .evaluate(contract.as_ref(), active_chain, required.as_ref())
            .await;

        let mut state = self.state.lock();
        state.contract = Some(contract);
        state.contract_valid = outcome.valid;
        state.errors.set_connectivity(outcome.diagnostic);
        outcome.valid
    }

    fn unbind_contract(&self, diagnostic: NotesError) {
        log::warn!("[GATE] No usable contract handle: {}", diagnostic);
        let mut state = self.state.lock();
        state.contract = None;
        state.contract_valid = false;
        state.errors.set_connectivity(Some(diagnostic));
    }

    async fn rebind_read_only(&self) {
        let provider = self.state.lock().provider.clone();
        let Some(provider) = provider else {
            return;
        };
        match provider.read_only_contract(self.config.contract_address) {
            Ok(contract) => {
                self.bind_contract(contract).await;
            }
            Err(e) => self.unbind_contract(NotesError::ContractUnreachable(e)),
        }
    }

    /// Tear down the session and everything scoped to its account.
    fn end_session(&self) -> (Option<WalletKind>, Option<Arc<dyn WalletProvider>>) {
        let mut state = self.state.lock();
        let wallet = state.session.teardown();
        state.edit_unlocked.clear();
        self.cache.clear();
        self.executor.discard_quotes();
        (wallet, state.provider.clone())
    }

    pub async fn connect(&self, kind: WalletKind) -> NotesResult<()> {
        let result = {
            let _guard = self.lifecycle.lock().await;
            self.connect_locked(kind).await
        };
        let result = self.record(result);
        if result.is_ok() {
            self.reload_if_valid().await;
        }
        result
    }

    async fn connect_locked(&self, kind: WalletKind) -> NotesResult<()> {
        let Some(provider) = self.registry.get(kind) else {
            log::warn!("[SESSION] {} is not available", kind.label());
            return Err(NotesError::ProviderUnavailable(kind.label().to_string()));
        };

        let current = {
            let state = self.state.lock();
            state.session.is_connected().then(|| state.session.wallet()).flatten()
        };
        if current == Some(kind) {
            return Ok(());
        }
        if current.is_some() {
            self.end_session();
        }

        self.state.lock().session.begin_connect()?;
        log::info!("[SESSION] Connecting via {}", kind.label());

        let account = match provider.request_accounts().await {
            Ok(accounts) if !accounts.is_empty() => accounts[0],
            Ok(_) => {
                self.state.lock().session.abort_connect();
                return Err(NotesError::ConnectionRejected("no accounts were authorized".to_string()));
            }
            Err(e) => {
                self.state.lock().session.abort_connect();
                return Err(NotesError::ConnectionRejected(e.to_string()));
            }
        };

        let active_chain = self.read_chain_id(provider.as_ref()).await;
        let signer = match provider.signer_contract(self.config.contract_address, account) {
            Ok(signer) => signer,
            Err(e) => {
                self.state.lock().session.abort_connect();
                return Err(NotesError::Wallet(e));
            }
        };
        {
            let mut state = self.state.lock();
            state.provider = Some(provider.clone());
            state.active_chain = active_chain;
        }

        self.bind_contract(signer).await;

        let mut state = self.state.lock();
        let subscription = self.subscribe(provider.as_ref(), state.session.generation());
        state.session.complete(account, kind, subscription);
        Ok(())
    }

    fn subscribe(&self, provider: &dyn WalletProvider, generation: u64) -> Subscription {
        let this = self.this.clone();
        spawn_subscriber(provider.subscribe(), move |event| {
            let this = this.clone();
            async move {
                match this.upgrade() {
                    Some(core) => {
                        core.handle_wallet_event(generation, event).await;
                        true
                    }
                    None => false,
                }
            }
        })
    }

    pub async fn disconnect(&self) -> NotesResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.end_session();
        log::info!("[SESSION] Disconnected");
        self.rebind_read_only().await;
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.session.is_connected() && state.session.generation() == generation
    }

    async fn handle_wallet_event(&self, generation: u64, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                None => {
                    let _guard = self.lifecycle.lock().await;
                    if !self.is_current(generation) {
                        return;
                    }
                    log::info!("[SESSION] Wallet reported no accounts, disconnecting");
                    self.end_session();
                    self.rebind_read_only().await;
                }
                Some(account) => {
                    let changed = {
                        let _guard = self.lifecycle.lock().await;
                        self.change_account_locked(generation, account).await
                    };
                    if changed {
                        self.reload_if_valid().await;
                    }
                }
            },
            WalletEvent::ChainChanged(chain_id) => {
                let result = {
                    let _guard = self.lifecycle.lock().await;
                    if !self.is_current(generation) {
                        return;
                    }
                    log::info!("[SESSION] Chain changed to {}, reinitializing", chain_id);
                    self.reinitialize_locked().await
                };
                if self.record(result).is_ok() {
                    self.reload_if_valid().await;
                }
            }
        }
    }

    /// Account switch inside a live session: notes are per-account, and the
    /// signer is rebuilt for the new account.
    async fn change_account_locked(&self, generation: u64, account: ethers::types::Address) -> bool {
        let provider = {
            let mut state = self.state.lock();
            if !(state.session.is_connected() && state.session.generation() == generation) {
                return false;
            }
            if !state.session.set_account(account) {
                return false;
            }
            state.edit_unlocked.clear();
            self.cache.clear();
            self.executor.discard_quotes();
            state.provider.clone()
        };

        if let Some(provider) = provider {
            match provider.signer_contract(self.config.contract_address, account) {
                Ok(signer) => {
                    self.bind_contract(signer).await;
                }
                Err(e) => self.unbind_contract(NotesError::Wallet(e)),
            }
        }
        true
    }

    /// Full teardown and re-initialization, then re-establish the session on
    /// the same wallet.
    async fn reinitialize_locked(&self) -> NotesResult<()> {
        let (wallet, provider) = self.end_session();
        self.bootstrap(provider.or_else(|| self.registry.default_provider()))
            .await;
        match wallet {
            Some(kind) => self.connect_locked(kind).await,
            None => Ok(()),
        }
    }

    // =====================================================
    // Network switching
    // =====================================================

    pub async fn switch_network(&self, chain_id: u64) -> NotesResult<()> {
        let result = self.switch_network_inner(chain_id).await;
        self.record(result)
    }

    /// Switch to the network the contract was detected on.
    pub async fn switch_to_required_network(&self) -> NotesResult<()> {
        let required = self.state.lock().required.clone();
        match required {
            Some(network) => self.switch_network(network.chain_id).await,
            None => self.record(Err(NotesError::NetworkSwitchFailed(
                "the Notes contract was not found on any supported network".to_string(),
            ))),
        }
    }

    async fn switch_network_inner(&self, chain_id: u64) -> NotesResult<()> {
        let network = self.catalog.by_chain_id(chain_id).cloned().ok_or_else(|| {
            NotesError::NetworkSwitchFailed(format!("chain {} is not supported", chain_id))
        })?;

        let (provider, connected) = {
            let state = self.state.lock();
            (state.provider.clone(), state.session.is_connected())
        };
        let provider = provider
            .or_else(|| self.registry.default_provider())
            .ok_or_else(|| NotesError::ProviderUnavailable("No wallet provider".to_string()))?;

        request_switch(provider.as_ref(), &network).await?;
        log::info!("[WALLET] Switched to {} ({})", network.name, network.chain_id);

        // a live session reinitializes from its chain-changed notification
        if !connected {
            let _guard = self.lifecycle.lock().await;
            self.bootstrap(Some(provider)).await;
        }
        Ok(())
    }

    // =====================================================
    // Notes
    // =====================================================

    /// Bulk load. A no-op without a valid contract and an account.
    pub async fn load_notes(&self) -> NotesResult<usize> {
        let contract = {
            let state = self.state.lock();
            if !state.contract_valid || state.session.account().is_none() {
                log::debug!("[CACHE] Skipping load: no valid contract or no account");
                return Ok(0);
            }
            state.contract.clone()
        };
        let Some(contract) = contract else {
            return Ok(0);
        };

        let _loading = LoadingGuard::new(&self.loading);
        let limit = self.config.timeouts.probe;
        let ticket = self.cache.begin_reload();

        let ids = match tokio::time::timeout(limit, contract.get_user_notes()).await {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                return self.record(Err(NotesError::ContractUnreachable(e)));
            }
            Err(_) => {
                return self.record(Err(NotesError::ContractUnreachable(format!(
                    "getUserNotes timed out after {:?}",
                    limit
                ))));
            }
        };

        let fetches = ids.into_iter().map(|id| {
            let contract = contract.clone();
            async move { (id, tokio::time::timeout(limit, contract.get_note(id)).await) }
        });
        let notes: Vec<Note> = join_all(fetches)
            .await
            .into_iter()
            .filter_map(|(id, fetched)| match fetched {
                Ok(Ok((title, content))) => Some(Note { id, title, content }),
                Ok(Err(e)) => {
                    log::warn!("[CACHE] Dropping note {}: {}", id, e);
                    None
                }
                Err(_) => {
                    log::warn!("[CACHE] Dropping note {}: fetch timed out", id);
                    None
                }
            })
            .collect();

        let count = notes.len();
        if ticket.finish(notes) {
            log::info!("[CACHE] Loaded {} note(s)", count);
            Ok(count)
        } else {
            Ok(0)
        }
    }

    async fn reload_if_valid(&self) {
        if let Err(e) = self.load_notes().await {
            log::warn!("[CACHE] Automatic reload failed: {}", e);
        }
    }

    /// Signer handle, scope and currency symbol for a mutating call.
    fn prepare(&self, call: &NoteCall) -> NotesResult<(Arc<dyn NotesContract>, OperationScope, String)> {
        let (contract, scope, symbol) = {
            let mut state = self.state.lock();
            if !state.contract_valid {
                return Err(state.gate_error());
            }
            if !state.session.is_connected() {
                return Err(NotesError::NotConnected);
            }
            let contract = state.contract.clone().ok_or(NotesError::NotConnected)?;
            let account = state.session.account().ok_or(NotesError::NotConnected)?;
            let symbol = state
                .active_chain
                .and_then(|id| self.catalog.by_chain_id(id))
                .map(|n| n.native_currency.symbol.clone())
                .unwrap_or_else(|| "ETH".to_string());
            let scope = OperationScope {
                generation: state.session.generation(),
                account,
            };
            (contract, scope, symbol)
        };

        if let Some(id) = call.note_id() {
            if !self.cache.contains(id) {
                return Err(NotesError::NoteNotFound(id));
            }
        }
        Ok((contract, scope, symbol))
    }

    pub async fn quote_create(&self, title: String) -> NotesResult<FeeQuoteView> {
        self.quote(NoteCall::Create { title }).await
    }

    pub async fn quote_save(&self, id: NoteId, content: String) -> NotesResult<FeeQuoteView> {
        self.quote(NoteCall::Save { id, content }).await
    }

    pub async fn quote_start_edit(&self, id: NoteId) -> NotesResult<FeeQuoteView> {
        self.quote(NoteCall::StartEdit { id }).await
    }

    pub async fn quote_save_edit(
        &self,
        id: NoteId,
        title: String,
        content: String,
    ) -> NotesResult<FeeQuoteView> {
        self.quote(NoteCall::SaveEdit { id, title, content }).await
    }

    pub async fn quote(&self, call: NoteCall) -> NotesResult<FeeQuoteView> {
        let result = self.quote_inner(call).await;
        self.record(result)
    }

    async fn quote_inner(&self, call: NoteCall) -> NotesResult<FeeQuoteView> {
        let (contract, scope, symbol) = self.prepare(&call)?;
        let op = self
            .executor
            .quote(contract.as_ref(), call, &symbol, scope)
            .await?;
        op.quote_view()
            .ok_or_else(|| NotesError::UnknownQuote(op.ticket.to_string()))
    }

    /// Accept a quote: submit, await settlement, reconcile the cache.
    pub async fn confirm(&self, ticket: &str) -> NotesResult<SettledView> {
        let (contract, op) = self.record(self.begin_confirm(ticket))?;
        self.settle_detached(contract, &op).await
    }

    fn begin_confirm(&self, ticket: &str) -> NotesResult<(Arc<dyn NotesContract>, PendingOperation)> {
        let ticket = parse_ticket(ticket)?;
        let contract = {
            let mut state = self.state.lock();
            if !state.contract_valid {
                Err(state.gate_error())
            } else if !state.session.is_connected() {
                Err(NotesError::NotConnected)
            } else {
                state.contract.clone().ok_or(NotesError::NotConnected)
            }
        };
        let contract = match contract {
            Ok(contract) => contract,
            Err(e) => {
                let _ = self.executor.fail(ticket);
                return Err(e);
            }
        };

        let op = self.executor.confirm(ticket)?;
        Ok((contract, op))
    }

    pub fn cancel(&self, ticket: &str) -> NotesResult<()> {
        let result = parse_ticket(ticket).and_then(|t| self.executor.cancel(t).map(|_| ()));
        self.record(result)
    }

    /// Fee-exempt; the presentation layer has already confirmed the deletion.
    pub async fn delete(&self, id: NoteId) -> NotesResult<SettledView> {
        let (contract, op) = self.record(self.begin_delete(id))?;
        self.settle_detached(contract, &op).await
    }

    fn begin_delete(&self, id: NoteId) -> NotesResult<(Arc<dyn NotesContract>, PendingOperation)> {
        let call = NoteCall::Delete { id };
        let (contract, scope, _) = self.prepare(&call)?;
        let op = self.executor.begin_direct(call, scope)?;
        Ok((contract, op))
    }

    /// Drive one action end to end, asking `confirmer` about the fee.
    /// Returns `None` when the quote was declined.
    pub async fn execute(
        &self,
        call: NoteCall,
        confirmer: &dyn FeeConfirmer,
    ) -> NotesResult<Option<SettledView>> {
        if let NoteCall::Delete { id } = call {
            return self.delete(id).await.map(Some);
        }
        let quote = self.quote(call).await?;
        if confirmer.confirm(&quote).await {
            self.confirm(&quote.ticket).await.map(Some)
        } else {
            self.cancel(&quote.ticket)?;
            Ok(None)
        }
    }

    /// Submit and settle on a task of its own, so the transaction is still
    /// settled and reconciled when the caller stops waiting.
    async fn settle_detached(
        &self,
        contract: Arc<dyn NotesContract>,
        op: &PendingOperation,
    ) -> NotesResult<SettledView> {
        let ticket = op.ticket;
        let action = op.call.kind();
        let Some(this) = self.this.upgrade() else {
            return self.record(self.settle(contract, ticket).await);
        };
        let task = tokio::spawn(async move {
            let result = this.settle(contract, ticket).await;
            this.record(result)
        });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("[EXECUTOR] Settlement task for {} ended abnormally: {}", ticket, e);
                self.record(Err(NotesError::TransactionFailed {
                    action,
                    reason: e.to_string(),
                }))
            }
        }
    }

    async fn settle(&self, contract: Arc<dyn NotesContract>, ticket: Uuid) -> NotesResult<SettledView> {
        let (op, settlement) = self
            .executor
            .submit_and_settle(contract.as_ref(), ticket)
            .await?;
        self.apply_settlement(&op, &settlement);
        Ok(SettledView {
            ticket: ticket.to_string(),
            action: op.call.kind().to_string(),
            note_id: op
                .call
                .note_id()
                .or(settlement.created_note)
                .map(|id| id.to_string()),
            tx_hash: format!("{:?}", settlement.tx_hash),
        })
    }

    fn apply_settlement(&self, op: &PendingOperation, settlement: &Settlement) {
        let mut state = self.state.lock();
        if state.session.generation() != op.scope.generation {
            log::info!(
                "[EXECUTOR] {} settled after its session ended, cache left untouched",
                op.call.kind()
            );
            return;
        }
        if state.session.account() != Some(op.scope.account) {
            log::info!(
                "[EXECUTOR] {} settled for {:?} after the account changed, cache left untouched",
                op.call.kind(),
                op.scope.account
            );
            return;
        }
        match &op.call {
            NoteCall::StartEdit { id } => {
                state.edit_unlocked.insert(*id);
            }
            NoteCall::SaveEdit { id, .. } | NoteCall::Delete { id } => {
                state.edit_unlocked.remove(id);
            }
            NoteCall::Create { .. } | NoteCall::Save { .. } => {}
        }
        if let Some(patch) = reconcile(&op.call, settlement) {
            self.cache.apply(patch);
        }
    }

    // =====================================================
    // Errors and snapshot
    // =====================================================

    pub fn clear_error(&self) {
        self.state.lock().errors.clear_error();
    }

    pub fn set_local_error(&self, message: Option<String>) {
        self.state
            .lock()
            .errors
            .set_local(message.map(NotesError::Local));
    }

    pub fn snapshot(&self) -> NotesView {
        let state = self.state.lock();
        NotesView {
            session_state: state.session.state().to_string(),
            account: state.session.account().map(|a| format!("{:?}", a)),
            network_label: match state.active_chain {
                Some(chain_id) => self.catalog.label_for(chain_id),
                None => "Unknown network".to_string(),
            },
            contract_valid: state.contract_valid,
            required_network: state.required.as_ref().map(|n| n.descriptor()),
            notes: self.cache.list().iter().map(Note::view).collect(),
            loading: self.loading.load(Ordering::SeqCst) > 0,
            error: state.errors.resolve(state.contract_valid).map(|e| e.to_view()),
            pending_quotes: self.executor.quotes(),
            edit_unlocked: state.edit_unlocked.iter().map(|id| id.to_string()).collect(),
        }
    }
}

fn parse_ticket(ticket: &str) -> NotesResult<Uuid> {
    Uuid::parse_str(ticket).map_err(|_| NotesError::UnknownQuote(ticket.to_string()))
}

/// Switch the wallet to `network`, adding it first if the wallet does not know it.
async fn request_switch(provider: &dyn WalletProvider, network: &Network) -> NotesResult<()> {
    let chain_id_hex = network.chain_id_hex();
    match provider.switch_chain(&chain_id_hex).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_unrecognized_chain() => {
            log::info!("[WALLET] {} is unknown to the wallet, adding it", network.name);
            provider
                .add_chain(&network.add_chain_params())
                .await
                .map_err(|e| NotesError::NetworkSwitchFailed(format!("adding {} failed: {}", network.name, e)))?;
            provider
                .switch_chain(&chain_id_hex)
                .await
                .map_err(|e| NotesError::NetworkSwitchFailed(e.to_string()))
        }
        Err(e) => Err(NotesError::NetworkSwitchFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ActionKind;
    use crate::session::SessionState;
    use crate::testing::{account, eventually, MockContract, MockProbe, MockWallet, ProbeOutcome, ScriptedConfirmer};
    use std::time::Duration;

    const SEPOLIA: u64 = 11155111;
    const GOERLI: u64 = 5;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.timeouts.quote = Duration::from_millis(200);
        config.timeouts.settle = Duration::from_millis(500);
        config.timeouts.probe = Duration::from_millis(200);
        config
    }

    fn coordinator_with(wallet: Arc<MockWallet>) -> Arc<NotesCoordinator> {
        let mut registry = WalletRegistry::new();
        registry.register(wallet);
        let probe = MockProbe::new().with(SEPOLIA, ProbeOutcome::Code);
        NotesCoordinator::new(test_config(), registry, probe)
    }

    async fn connected(contract: Arc<MockContract>) -> (Arc<NotesCoordinator>, Arc<MockWallet>) {
        let wallet = MockWallet::builder().contract(contract).build();
        let core = coordinator_with(wallet.clone());
        core.initialize().await;
        core.connect(WalletKind::MetaMask).await.unwrap();
        (core, wallet)
    }

    fn id(n: u64) -> NoteId {
        NoteId::from_u64(n)
    }

    #[tokio::test]
    async fn test_initialize_detects_and_validates() {
        let wallet = MockWallet::builder().build();
        let core = coordinator_with(wallet.clone());
        core.initialize().await;

        let view = core.snapshot();
        assert!(view.contract_valid);
        assert_eq!(view.network_label, "Sepolia Testnet");
        assert_eq!(view.required_network.unwrap().chain_id, SEPOLIA);
        assert_eq!(view.session_state, "disconnected");
        assert_eq!(wallet.contract().probe_calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_without_provider() {
        let core = NotesCoordinator::new(test_config(), WalletRegistry::new(), MockProbe::new());
        core.initialize().await;
        let view = core.snapshot();
        assert!(!view.contract_valid);
        // suppressed while invalid
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn test_connect_unavailable_provider() {
        let wallet = MockWallet::builder().kind(WalletKind::Local).build();
        let core = coordinator_with(wallet);
        core.initialize().await;

        let err = core.connect(WalletKind::Rabby).await.unwrap_err();
        assert_eq!(err, NotesError::ProviderUnavailable("Rabby".into()));
        assert_eq!(core.snapshot().session_state, SessionState::Disconnected.to_string());
    }

    #[tokio::test]
    async fn test_rejected_connection_stays_disconnected() {
        let wallet = MockWallet::builder().rejecting().build();
        let core = coordinator_with(wallet.clone());
        core.initialize().await;

        let err = core.connect(WalletKind::MetaMask).await.unwrap_err();
        assert_eq!(err.kind(), "connection_rejected");
        assert_eq!(core.snapshot().session_state, "disconnected");
        assert_eq!(wallet.subscriber_count(), 0);

        let empty = MockWallet::builder().accounts(vec![]).build();
        let core = coordinator_with(empty);
        assert_eq!(
            core.connect(WalletKind::MetaMask).await.unwrap_err().kind(),
            "connection_rejected"
        );
    }

    #[tokio::test]
    async fn test_connect_probes_once_then_loads() {
        let contract = MockContract::new();
        contract.seed_note(1, "first", "a");
        contract.seed_note(2, "second", "b");
        let wallet = MockWallet::builder().contract(contract.clone()).build();
        let core = coordinator_with(wallet.clone());
        core.initialize().await;
        let before = contract.probe_calls();

        core.connect(WalletKind::MetaMask).await.unwrap();
        assert_eq!(contract.probe_calls(), before + 1);
        assert_eq!(wallet.subscriber_count(), 1);

        let view = core.snapshot();
        assert_eq!(view.session_state, "connected");
        assert_eq!(view.account, Some(format!("{:?}", account(1))));
        assert_eq!(view.notes.len(), 2);
    }

    #[tokio::test]
    async fn test_load_with_invalid_contract_makes_no_calls() {
        let contract = MockContract::new();
        contract.seed_note(1, "t", "c");
        contract.fail_probe(true);
        let (core, _wallet) = connected(contract.clone()).await;

        assert!(!core.snapshot().contract_valid);
        let reads = contract.read_calls();
        assert_eq!(core.load_notes().await.unwrap(), 0);
        assert_eq!(contract.read_calls(), reads);
        assert!(core.snapshot().notes.is_empty());
    }

    #[tokio::test]
    async fn test_partial_load_drops_failed_notes() {
        let contract = MockContract::new();
        contract.seed_note(1, "ok", "");
        contract.seed_note(2, "broken", "");
        contract.seed_note(3, "ok too", "");
        contract.fail_note(2);
        let (core, _wallet) = connected(contract).await;

        let ids: Vec<String> = core.snapshot().notes.into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert!(core.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_create_inserts_note_from_event() {
        let (core, _wallet) = connected(MockContract::new()).await;

        let settled = core
            .execute(NoteCall::Create { title: "My Title".into() }, &ScriptedConfirmer(true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.action, "create");

        let notes = core.snapshot().notes;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, settled.note_id.unwrap());
        assert_eq!(notes[0].title, "My Title");
        assert_eq!(notes[0].content, "");
    }

    #[tokio::test]
    async fn test_declined_quote_has_no_effect() {
        let contract = MockContract::new();
        let (core, _wallet) = connected(contract.clone()).await;

        let outcome = core
            .execute(NoteCall::Create { title: "nope".into() }, &ScriptedConfirmer(false))
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(contract.submissions().is_empty());
        assert!(core.snapshot().pending_quotes.is_empty());
    }

    #[tokio::test]
    async fn test_save_edit_is_idempotent() {
        let contract = MockContract::new();
        contract.seed_note(7, "T1", "C1");
        let (core, _wallet) = connected(contract).await;

        let call = NoteCall::SaveEdit {
            id: id(7),
            title: "T2".into(),
            content: "C2".into(),
        };
        core.execute(call.clone(), &ScriptedConfirmer(true)).await.unwrap();
        let first = core.snapshot().notes;
        core.execute(call, &ScriptedConfirmer(true)).await.unwrap();
        let second = core.snapshot().notes;

        assert_eq!(first, second);
        assert_eq!(first[0].title, "T2");
        assert_eq!(first[0].content, "C2");
    }

    #[tokio::test]
    async fn test_delete_removes_only_that_note() {
        let contract = MockContract::new();
        for n in 1..=3 {
            contract.seed_note(n, &format!("note {}", n), "");
        }
        let (core, _wallet) = connected(contract.clone()).await;

        let settled = core.delete(id(2)).await.unwrap();
        assert_eq!(settled.note_id.as_deref(), Some("2"));
        let ids: Vec<String> = core.snapshot().notes.into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(contract.submissions()[0].1, ethers::types::U256::zero());
    }

    #[tokio::test]
    async fn test_in_progress_rejection_per_note() {
        let contract = MockContract::new();
        contract.seed_note(1, "x", "");
        contract.seed_note(2, "y", "");
        let (core, _wallet) = connected(contract).await;

        core.quote_save(id(1), "one".into()).await.unwrap();
        let err = core.delete(id(1)).await.unwrap_err();
        assert_eq!(err, NotesError::OperationInProgress(id(1)));
        assert!(core.quote_start_edit(id(2)).await.is_ok());
        assert_eq!(core.snapshot().pending_quotes.len(), 2);
        assert_eq!(core.snapshot().error.unwrap().kind, "operation_in_progress");
    }

    #[tokio::test]
    async fn test_start_edit_unlocks_until_save_edit() {
        let contract = MockContract::new();
        contract.seed_note(4, "t", "c");
        let (core, _wallet) = connected(contract).await;

        let quote = core.quote_start_edit(id(4)).await.unwrap();
        core.confirm(&quote.ticket).await.unwrap();
        assert_eq!(core.snapshot().edit_unlocked, vec!["4".to_string()]);

        let quote = core.quote_save_edit(id(4), "t2".into(), "c2".into()).await.unwrap();
        core.confirm(&quote.ticket).await.unwrap();
        assert!(core.snapshot().edit_unlocked.is_empty());
    }

    #[tokio::test]
    async fn test_failed_settlement_leaves_cache() {
        let contract = MockContract::new();
        contract.seed_note(1, "t", "before");
        let (core, _wallet) = connected(contract.clone()).await;
        contract.fail_settle(true);

        let quote = core.quote_save(id(1), "after".into()).await.unwrap();
        let err = core.confirm(&quote.ticket).await.unwrap_err();
        assert!(matches!(err, NotesError::TransactionFailed { action: ActionKind::Save, .. }));
        assert_eq!(core.snapshot().notes[0].content, "before");
        // action scoped: session and gate untouched
        let view = core.snapshot();
        assert!(view.contract_valid);
        assert_eq!(view.session_state, "connected");
    }

    #[tokio::test]
    async fn test_actions_refused_while_invalid() {
        let contract = MockContract::new();
        contract.fail_probe(true);
        let (core, _wallet) = connected(contract.clone()).await;

        let err = core.quote_create("t".into()).await.unwrap_err();
        assert_eq!(err.kind(), "contract_unreachable");
        assert_eq!(contract.fee_calls(), 0);
    }

    #[tokio::test]
    async fn test_wrong_network_diagnostic() {
        let wallet = MockWallet::builder().chain_id(GOERLI).build();
        wallet.contract().fail_probe(true);
        let core = coordinator_with(wallet);
        core.initialize().await;

        let view = core.snapshot();
        assert!(!view.contract_valid);
        assert_eq!(view.network_label, "Goerli Testnet");
        let err = core.quote_create("t".into()).await.unwrap_err();
        assert_eq!(err.required_network().unwrap().chain_id, SEPOLIA);
    }

    #[tokio::test]
    async fn test_save_requires_cached_note() {
        let (core, _wallet) = connected(MockContract::new()).await;
        assert_eq!(
            core.quote_save(id(99), "c".into()).await.unwrap_err(),
            NotesError::NoteNotFound(id(99))
        );
    }

    #[tokio::test]
    async fn test_quote_requires_session() {
        let wallet = MockWallet::builder().build();
        let core = coordinator_with(wallet);
        core.initialize().await;
        assert_eq!(core.quote_create("t".into()).await.unwrap_err(), NotesError::NotConnected);
    }

    #[tokio::test]
    async fn test_empty_accounts_notification_disconnects() {
        let contract = MockContract::new();
        contract.seed_note(1, "t", "");
        let (core, wallet) = connected(contract).await;
        core.quote_create("pending".into()).await.unwrap();

        wallet.emit(WalletEvent::AccountsChanged(vec![]));
        assert!(eventually(|| core.snapshot().session_state == "disconnected").await);

        let view = core.snapshot();
        assert!(view.notes.is_empty());
        assert!(view.pending_quotes.is_empty());
        assert!(eventually(|| wallet.subscriber_count() == 0).await);
    }

    #[tokio::test]
    async fn test_account_change_updates_in_place_and_reloads() {
        let contract = MockContract::new();
        contract.seed_note(1, "t", "");
        let (core, wallet) = connected(contract).await;

        wallet.emit(WalletEvent::AccountsChanged(vec![account(2)]));
        let expected = format!("{:?}", account(2));
        assert!(eventually(|| core.snapshot().account.as_deref() == Some(expected.as_str())).await);
        assert!(eventually(|| core.snapshot().notes.len() == 1).await);

        assert_eq!(core.snapshot().session_state, "connected");
        assert_eq!(wallet.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_chain_change_reinitializes_with_one_subscriber() {
        let contract = MockContract::new();
        let (core, wallet) = connected(contract.clone()).await;
        let requests = wallet.account_requests();

        contract.fail_probe(true);
        wallet.emit(WalletEvent::ChainChanged(GOERLI));

        assert!(eventually(|| core.snapshot().network_label == "Goerli Testnet").await);
        assert!(eventually(|| wallet.account_requests() == requests + 1).await);
        assert!(eventually(|| core.snapshot().session_state == "connected").await);

        let view = core.snapshot();
        assert!(!view.contract_valid);
        assert_eq!(view.required_network.unwrap().chain_id, SEPOLIA);
        assert!(eventually(|| wallet.subscriber_count() == 1).await);
    }

    #[tokio::test]
    async fn test_switch_adds_unknown_chain_then_retries() {
        let wallet = MockWallet::builder().chain_id(GOERLI).build();
        let core = coordinator_with(wallet.clone());
        core.initialize().await;

        core.switch_to_required_network().await.unwrap();
        assert_eq!(wallet.add_requests(), 1);
        assert_eq!(wallet.switch_requests(), 2);
        // disconnected: reinitialized directly
        assert_eq!(core.snapshot().network_label, "Sepolia Testnet");
    }

    #[tokio::test]
    async fn test_switch_to_unsupported_chain_fails() {
        let wallet = MockWallet::builder().build();
        let core = coordinator_with(wallet.clone());
        core.initialize().await;
        let err = core.switch_network(1).await.unwrap_err();
        assert_eq!(err.kind(), "network_switch_failed");
        assert_eq!(wallet.switch_requests(), 0);
    }

    #[tokio::test]
    async fn test_error_precedence_and_clear() {
        let wallet = MockWallet::builder().build();
        wallet.contract().fail_fee(ActionKind::Create);
        let core = coordinator_with(wallet);
        core.initialize().await;
        core.connect(WalletKind::MetaMask).await.unwrap();

        assert!(core.quote_create("t".into()).await.is_err());
        core.set_local_error(Some("title is required".into()));
        assert_eq!(core.snapshot().error.unwrap().kind, "local");

        core.set_local_error(None);
        assert_eq!(core.snapshot().error.unwrap().kind, "fee_fetch_failed");

        core.clear_error();
        assert!(core.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_quote_does_not_survive_disconnect() {
        let contract = MockContract::new();
        let (core, _wallet) = connected(contract).await;
        let quote = core.quote_create("late".into()).await.unwrap();

        // confirm needs a live session
        core.disconnect().await.unwrap();
        assert!(core.confirm(&quote.ticket).await.is_err());
        assert!(core.snapshot().notes.is_empty());
    }

    #[tokio::test]
    async fn test_refusal_while_invalid_is_not_repeated() {
        let wallet = MockWallet::builder().chain_id(GOERLI).build();
        wallet.contract().fail_probe(true);
        let core = coordinator_with(wallet);
        core.initialize().await;
        core.connect(WalletKind::MetaMask).await.unwrap();

        let err = core.quote_create("t".into()).await.unwrap_err();
        assert_eq!(err.kind(), "wrong_network");
        assert!(core.confirm(&Uuid::new_v4().to_string()).await.is_err());

        let view = core.snapshot();
        assert!(!view.contract_valid);
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn test_abandoned_quote_frees_note() {
        let contract = MockContract::new();
        contract.seed_note(1, "t", "");
        let (core, _wallet) = connected(contract.clone()).await;
        contract.stall_fees(true);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), core.quote_save(id(1), "c".into())).await;
        assert!(abandoned.is_err());

        contract.stall_fees(false);
        assert!(core.quote_save(id(1), "c".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_confirm_still_settles() {
        let contract = MockContract::new();
        contract.seed_note(1, "t", "old");
        let (core, _wallet) = connected(contract.clone()).await;
        let held = contract.hold_settle();

        let quote = core.quote_save(id(1), "new".into()).await.unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(50), core.confirm(&quote.ticket)).await;
        assert!(abandoned.is_err());
        assert!(eventually(|| contract.submissions().len() == 1).await);

        held.notify_one();
        assert!(eventually(|| core.snapshot().notes.first().map(|n| n.content.as_str()) == Some("new")).await);
        assert_eq!(contract.ledger_note(1), Some(("t".into(), "new".into())));

        held.notify_one();
        let quote = core.quote_save(id(1), "newer".into()).await.unwrap();
        core.confirm(&quote.ticket).await.unwrap();
    }

    #[tokio::test]
    async fn test_settlement_from_previous_account_is_not_reconciled() {
        let contract = MockContract::new();
        contract.seed_note(5, "shared id", "");
        let (core, wallet) = connected(contract.clone()).await;
        let held = contract.hold_settle();

        let deleting = {
            let core = core.clone();
            tokio::spawn(async move { core.delete(id(5)).await })
        };
        assert!(eventually(|| contract.submissions().len() == 1).await);

        wallet.emit(WalletEvent::AccountsChanged(vec![account(2)]));
        let expected = format!("{:?}", account(2));
        assert!(eventually(|| core.snapshot().account.as_deref() == Some(expected.as_str())).await);
        assert!(eventually(|| core.snapshot().notes.len() == 1).await);

        held.notify_one();
        let settled = deleting.await.unwrap().unwrap();
        assert_eq!(settled.action, "delete");

        let ids: Vec<String> = core.snapshot().notes.into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["5"]);
    }

    #[tokio::test]
    async fn test_unknown_ticket() {
        let (core, _wallet) = connected(MockContract::new()).await;
        assert_eq!(core.cancel("not-a-uuid").unwrap_err().kind(), "unknown_quote");
        let err = core.confirm(&Uuid::new_v4().to_string()).await.unwrap_err();
        assert_eq!(err.kind(), "unknown_quote");
    }
}
