//! Session Manager state.
//!
//! Disconnected -> Connecting -> Connected, with Connecting entered only from
//! Disconnected. A Connected session owns exactly one notification subscriber;
//! teardown cancels it and bumps the generation so anything still holding the
//! old generation knows its session is gone.

use crate::error::{NotesError, NotesResult};
use crate::wallet::{WalletEvent, WalletKind};
use ethers::types::Address;
use std::future::Future;
use strum::Display;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Handle to the single subscriber task of a Connected session.
pub struct Subscription {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn cancel(&self) {
        if self.handle.is_finished() {
            log::debug!("[SESSION] Subscriber already stopped");
        }
        self.token.cancel();
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn the notification loop. `handler` returns false to stop listening.
pub fn spawn_subscriber<H, Fut>(mut events: broadcast::Receiver<WalletEvent>, handler: H) -> Subscription
where
    H: Fn(WalletEvent) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();

    let handle = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = child.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[SESSION] Subscriber lagged, {} notification(s) skipped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            // a teardown that raced the notification wins
            if child.is_cancelled() {
                break;
            }
            if !handler(event).await {
                break;
            }
        }
        log::debug!("[SESSION] Subscriber stopped");
    });

    Subscription { token, handle }
}

pub struct Session {
    state: SessionState,
    account: Option<Address>,
    wallet: Option<WalletKind>,
    generation: u64,
    subscription: Option<Subscription>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            account: None,
            wallet: None,
            generation: 0,
            subscription: None,
        }
    }
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn wallet(&self) -> Option<WalletKind> {
        self.wallet
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    #[cfg(test)]
    pub fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn begin_connect(&mut self) -> NotesResult<()> {
        match self.state {
            SessionState::Disconnected => {
                self.state = SessionState::Connecting;
                Ok(())
            }
            SessionState::Connecting => Err(NotesError::Wallet("A connection is already in progress".to_string())),
            SessionState::Connected => Err(NotesError::Wallet("Already connected".to_string())),
        }
    }

    /// Connecting -> Disconnected after a failed attempt.
    pub fn abort_connect(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Disconnected;
        }
    }

    pub fn complete(&mut self, account: Address, wallet: WalletKind, subscription: Subscription) {
        self.state = SessionState::Connected;
        self.account = Some(account);
        self.wallet = Some(wallet);
        self.subscription = Some(subscription);
        log::info!("[SESSION] Connected {:?} via {}", account, wallet.label());
    }

    /// In-place account change. Returns false when the account is unchanged.
    pub fn set_account(&mut self, account: Address) -> bool {
        if self.account == Some(account) {
            return false;
        }
        log::info!("[SESSION] Account changed to {:?}", account);
        self.account = Some(account);
        true
    }

    /// Release the subscriber and clear the session. Returns the wallet kind that was connected.
    pub fn teardown(&mut self) -> Option<WalletKind> {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        let wallet = self.wallet.take();
        if self.state != SessionState::Disconnected {
            log::info!("[SESSION] Session torn down");
        }
        self.state = SessionState::Disconnected;
        self.account = None;
        self.generation += 1;
        wallet
    }
}
