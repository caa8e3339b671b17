// Namespaced module inside the host application's state container

use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};

use super::{roles_of, AuthUser, BackendKind, StorageBackend};
use crate::config::AuthOptions;
use crate::error::{AuthError, Result};
use crate::host::SessionSnapshot;

const SET_TOKEN: &str = "setToken";
const SET_REFRESH_TOKEN: &str = "setRefreshToken";
const SET_USER: &str = "setUser";
const GET_TOKEN: &str = "getToken";
const GET_REFRESH_TOKEN: &str = "getRefreshToken";
const GET_USER: &str = "getUser";
const GET_ROLES: &str = "getRoles";

/// A module registered under a namespace of a [`StateContainer`]
pub trait StateModule: Send + Sync {
    /// Run a named action with a structured payload
    fn dispatch(&self, action: &str, payload: Value) -> Result<()>;

    /// Evaluate a named getter; `None` when the getter does not exist
    fn getter(&self, name: &str) -> Option<Value>;
}

/// Host state container addressed by `"namespace/name"` paths
#[derive(Default)]
pub struct StateContainer {
    modules: DashMap<String, Arc<dyn StateModule>>,
}

impl StateContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `namespace`, replacing any previous one
    pub fn register_module(&self, namespace: &str, module: Arc<dyn StateModule>) {
        if self.modules.insert(namespace.to_string(), module).is_some() {
            tracing::debug!(namespace = namespace, "Replaced state module");
        } else {
            tracing::debug!(namespace = namespace, "Registered state module");
        }
    }

    pub fn has_module(&self, namespace: &str) -> bool {
        self.modules.contains_key(namespace)
    }

    pub fn dispatch(&self, path: &str, payload: Value) -> Result<()> {
        let (module, action) = self.resolve(path)?;
        module.dispatch(action, payload)
    }

    pub fn getter(&self, path: &str) -> Option<Value> {
        let (module, name) = self.resolve(path).ok()?;
        module.getter(name)
    }

    fn resolve<'a>(&self, path: &'a str) -> Result<(Arc<dyn StateModule>, &'a str)> {
        let (namespace, name) = path
            .split_once('/')
            .ok_or_else(|| AuthError::Storage(format!("Invalid state path: {}", path)))?;
        // Clone the module out so no map shard stays locked during the call
        let module = self
            .modules
            .get(namespace)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AuthError::Storage(format!("Unknown state module: {}", namespace)))?;
        Ok((module, name))
    }
}

#[derive(Debug, Default)]
struct AuthModuleState {
    token: Option<String>,
    refresh_token: Option<String>,
    user: Option<AuthUser>,
}

/// The session module: token, refresh token and user as structured values
pub struct AuthStateModule {
    state: RwLock<AuthModuleState>,
    roles_var: String,
}

impl AuthStateModule {
    pub fn new(roles_var: &str, seed: &SessionSnapshot) -> Self {
        Self {
            state: RwLock::new(AuthModuleState {
                token: seed.token.clone(),
                refresh_token: seed.refresh_token.clone(),
                user: seed.user.clone(),
            }),
            roles_var: roles_var.to_string(),
        }
    }

    fn write(&self, f: impl FnOnce(&mut AuthModuleState)) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| AuthError::Storage("state module lock poisoned".to_string()))?;
        f(&mut state);
        Ok(())
    }
}

fn token_payload(action: &str, payload: Value) -> Result<Option<String>> {
    match payload {
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Null => Ok(None),
        other => Err(AuthError::Storage(format!(
            "{} expects a string or null, got {}",
            action, other
        ))),
    }
}

fn optional(value: Option<Value>) -> Value {
    value.unwrap_or(Value::Null)
}

impl StateModule for AuthStateModule {
    fn dispatch(&self, action: &str, payload: Value) -> Result<()> {
        match action {
            SET_TOKEN => {
                let token = token_payload(action, payload)?;
                self.write(|state| state.token = token)
            }
            SET_REFRESH_TOKEN => {
                let token = token_payload(action, payload)?;
                self.write(|state| state.refresh_token = token)
            }
            SET_USER => {
                let user = match payload {
                    Value::Object(map) => Some(map),
                    Value::Null => None,
                    other => {
                        return Err(AuthError::Storage(format!(
                            "{} expects an object or null, got {}",
                            action, other
                        )))
                    }
                };
                self.write(|state| state.user = user)
            }
            _ => Err(AuthError::Storage(format!("Unknown action: {}", action))),
        }
    }

    fn getter(&self, name: &str) -> Option<Value> {
        let state = self.state.read().ok()?;
        let value = match name {
            GET_TOKEN => optional(state.token.clone().map(Value::String)),
            GET_REFRESH_TOKEN => optional(state.refresh_token.clone().map(Value::String)),
            GET_USER => optional(state.user.clone().map(Value::Object)),
            GET_ROLES => optional(
                state
                    .user
                    .as_ref()
                    .and_then(|u| roles_of(u, &self.roles_var))
                    .map(|roles| Value::Array(roles.into_iter().map(Value::String).collect())),
            ),
            _ => return None,
        };
        Some(value)
    }
}

/// Backend that reads getters and dispatches actions on the host container
pub struct HostStateBackend {
    container: Arc<StateContainer>,
    namespace: String,
}

impl HostStateBackend {
    /// Register the session module (seeded from `seed`) and bind to it.
    ///
    /// Fails when the host has no state container.
    pub fn new(
        container: Option<Arc<StateContainer>>,
        options: &AuthOptions,
        seed: &SessionSnapshot,
    ) -> Result<Self> {
        let container = container.ok_or_else(|| {
            AuthError::Config(
                "host_state backend requires a state container on the host".to_string(),
            )
        })?;

        container.register_module(
            &options.state_namespace,
            Arc::new(AuthStateModule::new(&options.roles_var, seed)),
        );

        Ok(Self {
            container,
            namespace: options.state_namespace.clone(),
        })
    }

    fn path(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.container
            .getter(&self.path(name))
            .filter(|v| !v.is_null())
    }
}

impl StorageBackend for HostStateBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HostState
    }

    fn get_token(&self) -> Option<String> {
        self.get(GET_TOKEN)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|t| !t.is_empty())
    }

    fn set_token(&self, token: Option<&str>) -> Result<()> {
        self.container
            .dispatch(&self.path(SET_TOKEN), token.map(Value::from).unwrap_or(Value::Null))
    }

    fn get_refresh_token(&self) -> Option<String> {
        self.get(GET_REFRESH_TOKEN)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|t| !t.is_empty())
    }

    fn set_refresh_token(&self, token: Option<&str>) -> Result<()> {
        self.container.dispatch(
            &self.path(SET_REFRESH_TOKEN),
            token.map(Value::from).unwrap_or(Value::Null),
        )
    }

    fn get_user(&self) -> Option<AuthUser> {
        match self.get(GET_USER)? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    fn set_user(&self, user: Option<&AuthUser>) -> Result<()> {
        let payload = user.cloned().map(Value::Object).unwrap_or(Value::Null);
        self.container.dispatch(&self.path(SET_USER), payload)
    }

    fn get_roles(&self) -> Option<Vec<String>> {
        match self.get(GET_ROLES)? {
            Value::Array(items) => Some(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }
}
