use crate::error::Error;
use crate::token::{Token, TokenRenewal};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle notifications delivered to subscribed listeners.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// First usable credential acquired, or a credential replaced wholesale.
    Login(Token),
    /// One or more tokens refreshed in place; listeners match by handle.
    Renewal(Vec<TokenRenewal>),
    /// Out-of-band credential replacement, e.g. after manual intervention.
    ReloadToken(Token),
    /// Diagnostic only; carries no usable credential.
    FailedLogin,
}

/// Owns the managed-token set and fans lifecycle events out to listeners.
///
/// All mutation happens on the housekeeping worker; dependent clients only
/// ever see immutable token snapshots through the channels handed out by
/// [`subscribe`](TokenManager::subscribe) and
/// [`subscribe_events`](TokenManager::subscribe_events), and hold no
/// reference back into the worker.
#[derive(Debug)]
pub struct TokenManager {
    tokens: HashMap<String, Token>,
    listeners: Vec<mpsc::UnboundedSender<TokenEvent>>,
    gate: watch::Sender<Option<Token>>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenManager {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(None);
        Self {
            tokens: HashMap::new(),
            listeners: Vec::new(),
            gate,
        }
    }

    /// Readiness gate for a dependent client. The watch cell holds the
    /// latest known good token; it is empty until the first login.
    pub fn subscribe(&self) -> TokenWatch {
        TokenWatch {
            receiver: self.gate.subscribe(),
        }
    }

    /// Event stream for a listener. Events within a single fire are
    /// delivered to listeners in subscription order.
    pub fn subscribe_events(&mut self) -> mpsc::UnboundedReceiver<TokenEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners.push(sender);
        receiver
    }

    pub fn tokens(&self) -> &HashMap<String, Token> {
        &self.tokens
    }

    /// Register a token under its handle, replacing any previous entry.
    pub fn insert(&mut self, token: Token) -> String {
        let handle = token.handle();
        self.tokens.insert(handle.clone(), token);
        handle
    }

    fn fire(&mut self, event: TokenEvent) {
        // Dead listeners are dropped; live ones are notified in order.
        self.listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    pub fn fire_login(&mut self, token: &Token) {
        tracing::info!(handle = %token.handle(), "firing login event");
        self.gate.send_replace(Some(token.clone()));
        self.fire(TokenEvent::Login(token.clone()));
    }

    pub fn fire_failed_login(&mut self) {
        self.fire(TokenEvent::FailedLogin);
    }

    /// Replace a managed token out of band. Opens (or updates) the gate
    /// without reblocking anyone.
    pub fn fire_reload(&mut self, token: &Token) {
        let handle = self.insert(token.clone());
        tracing::info!(%handle, "firing reload event");
        self.gate.send_replace(Some(token.clone()));
        self.fire(TokenEvent::ReloadToken(token.clone()));
    }

    /// Clear the gate, reblocking dependent clients until a fresh token
    /// arrives. This is the only way a client goes back to waiting.
    pub fn reset(&mut self) {
        tracing::info!("resetting readiness gate");
        self.gate.send_replace(None);
    }

    /// Swap the renewed entries into the managed set and notify listeners
    /// with the whole batch.
    pub fn apply_renewals(&mut self, renewals: Vec<TokenRenewal>) {
        if renewals.is_empty() {
            return;
        }
        for renewal in &renewals {
            tracing::debug!(
                handle = %renewal.handle,
                kind = ?renewal.kind,
                "replacing managed token"
            );
            self.tokens
                .insert(renewal.handle.clone(), renewal.new.clone());
        }
        if let Some(last) = renewals.last() {
            self.gate.send_replace(Some(last.new.clone()));
        }
        self.fire(TokenEvent::Renewal(renewals));
    }
}

/// A dependent client's view of the token lifecycle: a single-buffered cell
/// holding the latest known good token. The first operation blocks until a
/// login has happened; after that, reads are immediate and only change when
/// an event replaces the token.
#[derive(Debug, Clone)]
pub struct TokenWatch {
    receiver: watch::Receiver<Option<Token>>,
}

impl TokenWatch {
    /// Wait until a usable token exists, up to `timeout`. Times out with
    /// [`Error::ReadinessTimeout`] rather than hanging forever.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<Token, Error> {
        let mut receiver = self.receiver.clone();
        match tokio::time::timeout(timeout, receiver.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => match value.as_ref() {
                Some(token) => Ok(token.clone()),
                None => Err(Error::ManagerGone),
            },
            Ok(Err(_)) => Err(Error::ManagerGone),
            Err(_) => Err(Error::ReadinessTimeout { waited: timeout }),
        }
    }

    /// Current token without waiting, if the gate has ever opened.
    pub fn current(&self) -> Option<Token> {
        self.receiver.borrow().clone()
    }
}
