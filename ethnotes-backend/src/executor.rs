//! Fee-Gated Operation Executor.
//!
//! Every mutating action moves through an explicit state machine:
//!
//! ```text
//! Quoted -> Confirmed -> Submitted -> Settled
//!    |          |            |
//!    +-> Cancelled           +-> Failed
//!    +-> Failed  +-> Failed
//! ```
//!
//! Delete is fee-exempt and enters at `Confirmed`. A note id can have at most
//! one operation in flight; the reservation is taken before the fee is fetched
//! and released when the operation reaches a terminal state. Dropping a quote
//! or settle future midway releases the id as well.

use crate::cache::{CachePatch, Note};
use crate::config::Timeouts;
use crate::contract::{ActionKind, NoteCall, NoteId, NotesContract, Settlement};
use crate::error::{NotesError, NotesResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ethers::types::{Address, U256};
use ethers::utils::format_ether;
use ethnotes_types::FeeQuoteView;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use strum::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperationStatus {
    Quoted,
    Confirmed,
    Cancelled,
    Submitted,
    Settled,
    Failed,
}

impl OperationStatus {
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Quoted, Confirmed)
                | (Quoted, Cancelled)
                | (Quoted, Failed)
                | (Confirmed, Submitted)
                | (Confirmed, Failed)
                | (Submitted, Settled)
                | (Submitted, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Cancelled | OperationStatus::Settled | OperationStatus::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    pub action: ActionKind,
    pub amount: U256,
    pub currency_symbol: String,
}

impl FeeQuote {
    /// 18-decimal ether rendering
    pub fn formatted(&self) -> String {
        format_ether(self.amount)
    }
}

/// Who an operation was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationScope {
    /// Session generation
    pub generation: u64,
    /// Signing account
    pub account: Address,
}

#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub ticket: Uuid,
    pub call: NoteCall,
    pub status: OperationStatus,
    /// None for fee-exempt actions
    pub quote: Option<FeeQuote>,
    pub created_at: DateTime<Utc>,
    pub scope: OperationScope,
}

impl PendingOperation {
    pub fn value(&self) -> U256 {
        self.quote.as_ref().map(|q| q.amount).unwrap_or_default()
    }

    pub fn quote_view(&self) -> Option<FeeQuoteView> {
        let quote = self.quote.as_ref()?;
        Some(FeeQuoteView {
            ticket: self.ticket.to_string(),
            action: quote.action.to_string(),
            note_id: self.call.note_id().map(|id| id.to_string()),
            amount_wei: quote.amount.to_string(),
            amount_formatted: quote.formatted(),
            currency_symbol: quote.currency_symbol.clone(),
        })
    }
}

/// Presentation-side decision for a fee quote.
#[async_trait]
pub trait FeeConfirmer: Send + Sync {
    async fn confirm(&self, quote: &FeeQuoteView) -> bool;
}

/// Cache change for a settled call. `StartEdit` mutates no note data.
pub fn reconcile(call: &NoteCall, settlement: &Settlement) -> Option<CachePatch> {
    match call {
        NoteCall::Create { title } => settlement.created_note.map(|id| {
            CachePatch::Insert(Note {
                id,
                title: title.clone(),
                content: String::new(),
            })
        }),
        NoteCall::Save { id, content } => Some(CachePatch::SetContent {
            id: *id,
            content: content.clone(),
        }),
        NoteCall::StartEdit { .. } => None,
        NoteCall::SaveEdit { id, title, content } => Some(CachePatch::SetTitleAndContent {
            id: *id,
            title: title.clone(),
            content: content.clone(),
        }),
        NoteCall::Delete { id } => Some(CachePatch::Remove(*id)),
    }
}

async fn bounded<T, F>(limit: Duration, action: ActionKind, stage: &'static str, fut: F) -> NotesResult<Result<T, String>>
where
    F: Future<Output = Result<T, String>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| NotesError::Timeout {
            action,
            stage,
            secs: limit.as_secs(),
        })
}

/// Note id held for one ticket. Dropped before `keep`, it frees the id.
struct Reservation<'a> {
    in_flight: &'a DashMap<NoteId, Uuid>,
    id: Option<NoteId>,
    ticket: Uuid,
}

impl Reservation<'_> {
    /// The stored operation owns the id from here on.
    fn keep(mut self) {
        self.id = None;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let ticket = self.ticket;
            self.in_flight.remove_if(&id, |_, owner| *owner == ticket);
        }
    }
}

/// Fails a submitted operation whose settle future is dropped before it resolves.
struct SettleWatch<'a> {
    executor: &'a Executor,
    ticket: Uuid,
}

impl Drop for SettleWatch<'_> {
    fn drop(&mut self) {
        if let Ok(op) = self.executor.advance(self.ticket, OperationStatus::Failed) {
            log::warn!(
                "[EXECUTOR] {} abandoned before settlement (ticket {})",
                op.call.kind(),
                self.ticket
            );
        }
    }
}

pub struct Executor {
    operations: Mutex<HashMap<Uuid, PendingOperation>>,
    in_flight: DashMap<NoteId, Uuid>,
    timeouts: Timeouts,
    confirmations: usize,
}

impl Executor {
    pub fn new(timeouts: Timeouts, confirmations: usize) -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            in_flight: DashMap::new(),
            timeouts,
            confirmations: confirmations.max(1),
        }
    }

    #[cfg(test)]
    pub fn is_busy(&self, id: NoteId) -> bool {
        self.in_flight.contains_key(&id)
    }

    fn reserve(&self, call: &NoteCall, ticket: Uuid) -> NotesResult<Reservation<'_>> {
        let mut reservation = Reservation {
            in_flight: &self.in_flight,
            id: None,
            ticket,
        };
        let Some(id) = call.note_id() else {
            return Ok(reservation);
        };
        match self.in_flight.entry(id) {
            Entry::Occupied(_) => {
                log::info!("[EXECUTOR] Rejecting {} on note {}: operation in progress", call.kind(), id);
                Err(NotesError::OperationInProgress(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(ticket);
                reservation.id = Some(id);
                Ok(reservation)
            }
        }
    }

    fn release(&self, call: &NoteCall, ticket: Uuid) {
        if let Some(id) = call.note_id() {
            self.in_flight.remove_if(&id, |_, owner| *owner == ticket);
        }
    }

    /// Move an operation along; terminal states drop it and free its note id.
    fn advance(&self, ticket: Uuid, next: OperationStatus) -> NotesResult<PendingOperation> {
        let op = {
            let mut ops = self.operations.lock();
            let op = ops
                .get_mut(&ticket)
                .filter(|op| op.status.can_transition_to(next))
                .ok_or_else(|| NotesError::UnknownQuote(ticket.to_string()))?;
            op.status = next;
            let snapshot = op.clone();
            if next.is_terminal() {
                ops.remove(&ticket);
            }
            snapshot
        };

        if next.is_terminal() {
            self.release(&op.call, ticket);
        }
        log::debug!("[EXECUTOR] {} {} -> {}", op.call.kind(), ticket, next);
        Ok(op)
    }

    /// Step 1: reserve the note id and fetch the fee. Nothing is kept on failure.
    pub async fn quote(
        &self,
        contract: &dyn NotesContract,
        call: NoteCall,
        currency_symbol: &str,
        scope: OperationScope,
    ) -> NotesResult<PendingOperation> {
        let ticket = Uuid::new_v4();
        let action = call.kind();
        let reservation = self.reserve(&call, ticket)?;

        let amount = if action.fee_exempt() {
            Ok(U256::zero())
        } else {
            match bounded(self.timeouts.quote, action, "quote", contract.fee(action)).await {
                Ok(Ok(fee)) => Ok(fee),
                Ok(Err(reason)) => Err(NotesError::FeeFetchFailed { action, reason }),
                Err(timeout) => Err(timeout),
            }
        };
        let amount = match amount {
            Ok(amount) => amount,
            Err(e) => {
                log::warn!("[EXECUTOR] {}", e);
                return Err(e);
            }
        };

        let op = PendingOperation {
            ticket,
            call,
            status: OperationStatus::Quoted,
            quote: Some(FeeQuote {
                action,
                amount,
                currency_symbol: currency_symbol.to_string(),
            }),
            created_at: Utc::now(),
            scope,
        };
        log::info!("[EXECUTOR] Quoted {} at {} wei (ticket {})", action, amount, ticket);
        self.operations.lock().insert(ticket, op.clone());
        reservation.keep();
        Ok(op)
    }

    /// Step 2, accept.
    pub fn confirm(&self, ticket: Uuid) -> NotesResult<PendingOperation> {
        self.advance(ticket, OperationStatus::Confirmed)
    }

    /// Step 2, decline. The quote is discarded with no further effect.
    pub fn cancel(&self, ticket: Uuid) -> NotesResult<PendingOperation> {
        let op = self.advance(ticket, OperationStatus::Cancelled)?;
        log::info!("[EXECUTOR] Cancelled {} (ticket {})", op.call.kind(), ticket);
        Ok(op)
    }

    /// Abort a quoted or confirmed operation before submission.
    pub fn fail(&self, ticket: Uuid) -> NotesResult<PendingOperation> {
        self.advance(ticket, OperationStatus::Failed)
    }

    /// Start a fee-exempt operation directly in `Confirmed`.
    pub fn begin_direct(&self, call: NoteCall, scope: OperationScope) -> NotesResult<PendingOperation> {
        let ticket = Uuid::new_v4();
        let reservation = self.reserve(&call, ticket)?;
        let op = PendingOperation {
            ticket,
            call,
            status: OperationStatus::Confirmed,
            quote: None,
            created_at: Utc::now(),
            scope,
        };
        self.operations.lock().insert(ticket, op.clone());
        reservation.keep();
        Ok(op)
    }

    /// Steps 3 and 4 for a confirmed operation. Once submitted there is no
    /// cancellation, only settle or fail.
    pub async fn submit_and_settle(
        &self,
        contract: &dyn NotesContract,
        ticket: Uuid,
    ) -> NotesResult<(PendingOperation, Settlement)> {
        let op = self.advance(ticket, OperationStatus::Submitted)?;
        let action = op.call.kind();
        let _watch = SettleWatch { executor: self, ticket };

        match self.submit_inner(contract, &op).await {
            Ok(settlement) => {
                let op = self.advance(ticket, OperationStatus::Settled)?;
                log::info!(
                    "[EXECUTOR] {} settled in {:?} (block {:?})",
                    action,
                    settlement.tx_hash,
                    settlement.block_number
                );
                Ok((op, settlement))
            }
            Err(e) => {
                let _ = self.advance(ticket, OperationStatus::Failed);
                log::warn!("[EXECUTOR] {}", e);
                Err(e)
            }
        }
    }

    async fn submit_inner(&self, contract: &dyn NotesContract, op: &PendingOperation) -> NotesResult<Settlement> {
        let action = op.call.kind();
        let failed = |reason: String| NotesError::TransactionFailed { action, reason };

        let tx_hash = bounded(self.timeouts.settle, action, "submit", contract.submit(&op.call, op.value()))
            .await?
            .map_err(failed)?;
        log::info!("[EXECUTOR] Submitted {} as {:?}", action, tx_hash);

        let settlement = bounded(
            self.timeouts.settle,
            action,
            "settle",
            contract.settle(tx_hash, self.confirmations),
        )
        .await?
        .map_err(failed)?;

        if matches!(op.call, NoteCall::Create { .. }) && settlement.created_note.is_none() {
            return Err(failed(format!(
                "no NoteCreated event in receipt of {:?}",
                settlement.tx_hash
            )));
        }
        Ok(settlement)
    }

    /// Quotes awaiting a decision, oldest first.
    pub fn quotes(&self) -> Vec<FeeQuoteView> {
        let mut quoted: Vec<PendingOperation> = self
            .operations
            .lock()
            .values()
            .filter(|op| op.status == OperationStatus::Quoted)
            .cloned()
            .collect();
        quoted.sort_by_key(|op| op.created_at);
        quoted.iter().filter_map(|op| op.quote_view()).collect()
    }

    /// Drop every quote awaiting a decision, e.g. when the session ends.
    /// Submitted operations keep running to settlement.
    pub fn discard_quotes(&self) -> usize {
        let dropped: Vec<PendingOperation> = {
            let mut ops = self.operations.lock();
            let tickets: Vec<Uuid> = ops
                .values()
                .filter(|op| op.status == OperationStatus::Quoted)
                .map(|op| op.ticket)
                .collect();
            tickets.iter().filter_map(|t| ops.remove(t)).collect()
        };
        for op in &dropped {
            self.release(&op.call, op.ticket);
        }
        if !dropped.is_empty() {
            log::info!("[EXECUTOR] Discarded {} pending quote(s)", dropped.len());
        }
        dropped.len()
    }
}
