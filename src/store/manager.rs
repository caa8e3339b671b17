// Multi-backend session state: read precedence, write fan-out, slot mirror

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use super::{
    roles_of, AuthUser, BackendKind, CookieBackend, CookieJar, HostStateBackend, KeyValueBackend,
    StorageBackend,
};
use crate::config::AuthOptions;
use crate::error::{AuthError, Result};
use crate::host::{Host, SessionSlot, SessionSnapshot};

/// Roles accepted by a role check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleFilter {
    One(String),
    /// Satisfied by any one of the roles
    AnyOf(Vec<String>),
}

impl RoleFilter {
    pub fn matches(&self, roles: &[String]) -> bool {
        match self {
            RoleFilter::One(role) => roles.iter().any(|r| r == role),
            RoleFilter::AnyOf(wanted) => wanted.iter().any(|w| roles.contains(w)),
        }
    }
}

impl From<&str> for RoleFilter {
    fn from(role: &str) -> Self {
        RoleFilter::One(role.to_string())
    }
}

impl From<String> for RoleFilter {
    fn from(role: String) -> Self {
        RoleFilter::One(role)
    }
}

impl From<&[&str]> for RoleFilter {
    fn from(roles: &[&str]) -> Self {
        RoleFilter::AnyOf(roles.iter().map(|r| r.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RoleFilter {
    fn from(roles: [&str; N]) -> Self {
        RoleFilter::AnyOf(roles.iter().map(|r| r.to_string()).collect())
    }
}

impl From<&[String]> for RoleFilter {
    fn from(roles: &[String]) -> Self {
        RoleFilter::AnyOf(roles.to_vec())
    }
}

impl From<Vec<String>> for RoleFilter {
    fn from(roles: Vec<String>) -> Self {
        RoleFilter::AnyOf(roles)
    }
}

impl From<Vec<&str>> for RoleFilter {
    fn from(roles: Vec<&str>) -> Self {
        RoleFilter::AnyOf(roles.into_iter().map(str::to_string).collect())
    }
}

/// Owns the active backends and keeps them, plus the host slot, in sync
pub struct StoreManager {
    backends: Vec<Arc<dyn StorageBackend>>,
    slot: Option<SessionSlot>,
    roles_var: String,
    /// Serializes writers against readers so `reset_all` is never seen half-done
    gate: RwLock<()>,
}

impl StoreManager {
    /// Build the backend set from `options.token_store`.
    ///
    /// Duplicate kinds keep their first position. Media the host does not
    /// provide are skipped, except the host state container whose absence is
    /// a configuration error.
    pub fn new(options: &AuthOptions, host: &Host) -> Result<Self> {
        let mut kinds: Vec<BackendKind> = Vec::with_capacity(options.token_store.len());
        for kind in &options.token_store {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }

        let mut positions: Vec<Option<Arc<dyn StorageBackend>>> = Vec::with_capacity(kinds.len());
        let mut host_state_at = None;

        for (index, kind) in kinds.iter().enumerate() {
            let backend: Option<Arc<dyn StorageBackend>> = match kind {
                BackendKind::LocalStorage => host.local_storage.clone().map(|store| {
                    Arc::new(KeyValueBackend::new(*kind, store, options)) as Arc<dyn StorageBackend>
                }),
                BackendKind::SessionStorage => host.session_storage.clone().map(|store| {
                    Arc::new(KeyValueBackend::new(*kind, store, options)) as Arc<dyn StorageBackend>
                }),
                BackendKind::Cookie => cookie_medium(host).map(|jar| {
                    Arc::new(CookieBackend::new(jar, options)) as Arc<dyn StorageBackend>
                }),
                BackendKind::HostState => {
                    if host.state.is_none() {
                        return Err(AuthError::Config(
                            "host_state backend requires a state container on the host"
                                .to_string(),
                        ));
                    }
                    // Built last, once the persisted values are known
                    host_state_at = Some(index);
                    None
                }
            };

            if backend.is_none() && *kind != BackendKind::HostState {
                tracing::warn!(backend = %kind, "Storage medium unavailable on this host, backend disabled");
            }
            positions.push(backend);
        }

        let persisted: Vec<Arc<dyn StorageBackend>> =
            positions.iter().flatten().cloned().collect();
        let mut seed = read_snapshot(&persisted);
        if let Some(slot) = &host.slot {
            let current = slot.snapshot();
            seed.token = seed.token.or(current.token);
            seed.refresh_token = seed.refresh_token.or(current.refresh_token);
            seed.user = seed.user.or(current.user);
        }

        if let Some(index) = host_state_at {
            let backend = HostStateBackend::new(host.state.clone(), options, &seed)?;
            positions[index] = Some(Arc::new(backend) as Arc<dyn StorageBackend>);
        }

        if let Some(slot) = &host.slot {
            if slot.snapshot() != seed {
                tracing::debug!("Seeding host slot from persisted session");
                let restored = seed.clone();
                slot.modify(move |s| *s = restored);
            }
        }

        let backends: Vec<Arc<dyn StorageBackend>> = positions.into_iter().flatten().collect();
        tracing::debug!(
            backends = ?backends.iter().map(|b| b.kind()).collect::<Vec<_>>(),
            restored = seed.token.is_some(),
            "Store manager ready"
        );

        Ok(Self {
            backends,
            slot: host.slot.clone(),
            roles_var: options.roles_var.clone(),
            gate: RwLock::new(()),
        })
    }

    /// Active backends in read-precedence order
    pub fn backends(&self) -> &[Arc<dyn StorageBackend>] {
        &self.backends
    }

    /// Subscribe to slot updates, when the host provided a slot
    pub fn subscribe(&self) -> Option<watch::Receiver<SessionSnapshot>> {
        self.slot.as_ref().map(SessionSlot::subscribe)
    }

    fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_gate(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot_snapshot(&self) -> SessionSnapshot {
        self.slot
            .as_ref()
            .map(SessionSlot::snapshot)
            .unwrap_or_default()
    }

    pub fn get_token(&self) -> Option<String> {
        let _gate = self.read_gate();
        first_token(&self.backends, |b| b.get_token())
            .or_else(|| self.slot_snapshot().token.filter(|t| !t.is_empty()))
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        let _gate = self.read_gate();
        first_token(&self.backends, |b| b.get_refresh_token())
            .or_else(|| self.slot_snapshot().refresh_token.filter(|t| !t.is_empty()))
    }

    /// The stored user, or `None` when nothing holds one
    pub fn user(&self) -> Option<AuthUser> {
        let _gate = self.read_gate();
        self.backends
            .iter()
            .find_map(|b| b.get_user())
            .or_else(|| self.slot_snapshot().user)
    }

    /// The stored user, empty when nothing holds one
    pub fn get_user(&self) -> AuthUser {
        self.user().unwrap_or_default()
    }

    pub fn get_roles(&self) -> Option<Vec<String>> {
        let _gate = self.read_gate();
        self.backends
            .iter()
            .filter_map(|b| b.get_roles())
            .find(|roles| !roles.is_empty())
            .or_else(|| {
                self.slot_snapshot()
                    .user
                    .and_then(|u| roles_of(&u, &self.roles_var))
                    .filter(|roles| !roles.is_empty())
            })
    }

    pub fn set_token(&self, token: Option<&str>) {
        let _gate = self.write_gate();
        for backend in &self.backends {
            if let Err(e) = backend.set_token(token) {
                tracing::warn!(backend = %backend.kind(), error = %e, "Failed to write token");
            }
        }
        self.mirror(|s| s.token = token.map(str::to_string));
    }

    pub fn set_refresh_token(&self, token: Option<&str>) {
        let _gate = self.write_gate();
        for backend in &self.backends {
            if let Err(e) = backend.set_refresh_token(token) {
                tracing::warn!(backend = %backend.kind(), error = %e, "Failed to write refresh token");
            }
        }
        self.mirror(|s| s.refresh_token = token.map(str::to_string));
    }

    pub fn set_user(&self, user: Option<&AuthUser>) {
        let _gate = self.write_gate();
        for backend in &self.backends {
            if let Err(e) = backend.set_user(user) {
                tracing::warn!(backend = %backend.kind(), error = %e, "Failed to write user");
            }
        }
        self.mirror(|s| s.user = user.cloned());
    }

    /// Clear token, refresh token and user everywhere
    pub fn reset_all(&self) {
        let _gate = self.write_gate();
        for backend in &self.backends {
            let results = [
                backend.set_user(None),
                backend.set_token(None),
                backend.set_refresh_token(None),
            ];
            for e in results.into_iter().filter_map(|r| r.err()) {
                tracing::warn!(backend = %backend.kind(), error = %e, "Failed to clear session");
            }
        }
        self.mirror(|s| *s = SessionSnapshot::default());
        tracing::debug!("Session state cleared");
    }

    /// Whether a credential is held
    pub fn check(&self) -> bool {
        self.get_token().is_some()
    }

    /// Whether the user holds the role, or any of the roles
    pub fn check_roles(&self, roles: impl Into<RoleFilter>) -> bool {
        let filter = roles.into();
        match self.get_roles() {
            Some(held) => filter.matches(&held),
            None => false,
        }
    }

    fn mirror(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        if let Some(slot) = &self.slot {
            slot.modify(f);
        }
    }
}

fn cookie_medium(host: &Host) -> Option<Arc<dyn CookieJar>> {
    host.cookie_jar.clone().or_else(|| {
        host.document_cookies
            .clone()
            .map(|doc| doc as Arc<dyn CookieJar>)
    })
}

fn first_token(
    backends: &[Arc<dyn StorageBackend>],
    get: impl Fn(&dyn StorageBackend) -> Option<String>,
) -> Option<String> {
    backends
        .iter()
        .filter_map(|b| get(b.as_ref()))
        .find(|t| !t.is_empty())
}

fn read_snapshot(backends: &[Arc<dyn StorageBackend>]) -> SessionSnapshot {
    SessionSnapshot {
        token: first_token(backends, |b| b.get_token()),
        refresh_token: first_token(backends, |b| b.get_refresh_token()),
        user: backends.iter().find_map(|b| b.get_user()),
    }
}
