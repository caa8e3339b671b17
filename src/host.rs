//! Capabilities the host application lends to the session.
//!
//! Every storage medium is optional; which ones are present decides which
//! backends the [`StoreManager`](crate::store::StoreManager) can activate.

use std::sync::Arc;
use tokio::sync::watch;

use crate::router::Navigator;
use crate::store::{AuthUser, CookieJar, DocumentCookies, KeyValueStore, StateContainer};

/// Value of the host reactive slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<AuthUser>,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

/// Observable session location owned by the host.
///
/// Clones share the same channel.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    tx: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    /// Apply `f` and notify subscribers once
    pub fn modify(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        self.tx.send_modify(f);
    }
}

#[derive(Clone)]
pub struct Host {
    pub navigator: Arc<dyn Navigator>,
    /// Durable, client-scoped string store
    pub local_storage: Option<Arc<dyn KeyValueStore>>,
    /// Ephemeral, session-scoped string store
    pub session_storage: Option<Arc<dyn KeyValueStore>>,
    pub cookie_jar: Option<Arc<dyn CookieJar>>,
    /// Raw attribute string used when no cookie jar is present
    pub document_cookies: Option<Arc<DocumentCookies>>,
    pub state: Option<Arc<StateContainer>>,
    pub slot: Option<SessionSlot>,
}

impl Host {
    /// Host with navigation only
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            navigator,
            local_storage: None,
            session_storage: None,
            cookie_jar: None,
            document_cookies: None,
            state: None,
            slot: None,
        }
    }

    pub fn with_local_storage(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.local_storage = Some(store);
        self
    }

    pub fn with_session_storage(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.session_storage = Some(store);
        self
    }

    pub fn with_cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    pub fn with_document_cookies(mut self, cookies: Arc<DocumentCookies>) -> Self {
        self.document_cookies = Some(cookies);
        self
    }

    pub fn with_state(mut self, state: Arc<StateContainer>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_slot(mut self, slot: SessionSlot) -> Self {
        self.slot = Some(slot);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_clones_share_channel() {
        let slot = SessionSlot::new();
        let other = slot.clone();
        let rx = slot.subscribe();

        other.modify(|s| s.token = Some("T".to_string()));

        assert_eq!(slot.snapshot().token, Some("T".to_string()));
        assert!(rx.has_changed().unwrap());
        assert!(!slot.snapshot().is_empty());
    }
}
