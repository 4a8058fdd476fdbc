use crate::models::Credential;
use std::sync::Arc;
use tokio::sync::watch;

/// Holder of the current credential.
///
/// One writer (the credential manager), any number of readers (request
/// handlers). A write swaps an `Arc` under the channel's lock, so a reader
/// gets either the old or the new credential in full and never waits on I/O.
#[derive(Clone)]
pub struct TokenStore {
    current: Arc<watch::Sender<Option<Arc<Credential>>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            current: Arc::new(tx),
        }
    }

    /// `None` until the first successful fetch: treat as "not ready"
    pub fn read(&self) -> Option<Arc<Credential>> {
        self.current.borrow().clone()
    }

    pub fn write(&self, credential: Credential) {
        self.current.send_replace(Some(Arc::new(credential)));
    }

    pub fn is_ready(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Receiver notified on every swap
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Credential>>> {
        self.current.subscribe()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}
