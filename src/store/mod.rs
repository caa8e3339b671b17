//! Credential storage.
//!
//! Every persistence medium implements [`StorageBackend`]; the
//! [`StoreManager`] owns the active backends, reads with precedence and
//! writes with fan-out.
//!
//! - `local_storage` / `session_storage`: string key-value stores ([`KeyValueBackend`])
//! - `cookie`: attribute store with expiry ([`CookieBackend`])
//! - `host_state`: namespaced module in the host's state container ([`HostStateBackend`])

pub mod cookie;
pub mod host_state;
pub mod kv;
pub mod manager;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

pub use cookie::{CookieBackend, CookieJar, DocumentCookies, MemoryCookieJar};
pub use host_state::{AuthStateModule, HostStateBackend, StateContainer, StateModule};
pub use kv::{KeyValueBackend, KeyValueStore, MemoryStorage, SqliteStorage};
pub use manager::{RoleFilter, StoreManager};

/// Authenticated user profile, an open attribute bag
pub type AuthUser = Map<String, Value>;

/// Persistence medium of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Durable, survives restarts
    LocalStorage,
    /// Ephemeral, lives as long as the process
    SessionStorage,
    /// Named attributes with expiry
    Cookie,
    /// Host application's state container
    HostState,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::LocalStorage => "local_storage",
            BackendKind::SessionStorage => "session_storage",
            BackendKind::Cookie => "cookie",
            BackendKind::HostState => "host_state",
        };
        f.write_str(name)
    }
}

/// Uniform get/set contract over one persistence medium.
///
/// Passing `None` to a setter removes the entry, so the matching getter
/// returns `None` afterwards.
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn get_token(&self) -> Option<String>;
    fn set_token(&self, token: Option<&str>) -> Result<()>;

    fn get_refresh_token(&self) -> Option<String>;
    fn set_refresh_token(&self, token: Option<&str>) -> Result<()>;

    fn get_user(&self) -> Option<AuthUser>;
    fn set_user(&self, user: Option<&AuthUser>) -> Result<()>;

    /// Roles projected out of the stored user
    fn get_roles(&self) -> Option<Vec<String>>;
}

/// Project the role list out of a user profile.
///
/// An array yields its string elements, a bare string is a single role,
/// anything else means the user has no roles.
pub fn roles_of(user: &AuthUser, roles_var: &str) -> Option<Vec<String>> {
    match user.get(roles_var)? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Value::String(role) => Some(vec![role.clone()]),
        _ => None,
    }
}

/// JSON-encode a token for string media (`abc` is stored as `"abc"`)
pub(crate) fn encode_token(token: &str) -> Result<String> {
    Ok(serde_json::to_string(token)?)
}

/// Decode a token read from a string medium.
///
/// Raw values written by foreign writers are returned as-is; empty values and
/// a literal `null` read as absent.
pub(crate) fn decode_token(raw: &str) -> Option<String> {
    let token = match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => Some(s),
        Ok(Value::Null) => None,
        _ => Some(raw.to_string()),
    };
    token.filter(|t| !t.is_empty())
}

pub(crate) fn encode_user(user: &AuthUser) -> Result<String> {
    Ok(serde_json::to_string(user)?)
}

pub(crate) fn decode_user(raw: &str) -> Option<AuthUser> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
