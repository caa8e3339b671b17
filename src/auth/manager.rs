use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::credentials::token_data;
use super::guard::AuthGuard;
use super::interceptors::{CredentialInjector, UnauthorizedHandler};
use super::refresh;
use super::timers::spawn_periodic;
use super::types::{InFlight, SessionState};
use crate::config::AuthOptions;
use crate::error::{AuthError, Result};
use crate::host::Host;
use crate::http_client::{ApiRequest, AuthHttpClient, InterceptorId};
use crate::router::{GuardId, Navigator};
use crate::store::{AuthUser, RoleFilter, StoreManager};

/// Session lifecycle controller.
///
/// Drives login, logout, user fetch and credential refresh through the HTTP
/// client, and keeps the result in the [`StoreManager`]. Nothing here touches
/// a storage backend directly.
pub struct AuthManager {
    options: Arc<AuthOptions>,
    store: Arc<StoreManager>,
    http: Arc<AuthHttpClient>,
    navigator: Arc<dyn Navigator>,
    logins_in_flight: AtomicUsize,
    refreshes_in_flight: AtomicUsize,
}

impl AuthManager {
    pub fn new(
        options: AuthOptions,
        store: Arc<StoreManager>,
        http: Arc<AuthHttpClient>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            options: Arc::new(options),
            store,
            http,
            navigator,
            logins_in_flight: AtomicUsize::new(0),
            refreshes_in_flight: AtomicUsize::new(0),
        }
    }

    /// Build the store manager from the host's media, then the controller
    pub fn with_host(options: AuthOptions, host: &Host, http: Arc<AuthHttpClient>) -> Result<Self> {
        let store = Arc::new(StoreManager::new(&options, host)?);
        Ok(Self::new(options, store, http, host.navigator.clone()))
    }

    /// Register interceptors, the navigation guard and the enabled timers
    pub fn start(self: &Arc<Self>) -> SessionHandle {
        let injector = self.http.add_request_interceptor(Arc::new(CredentialInjector::new(
            &self.options,
            self.store.clone(),
        )));
        let unauthorized = self.http.add_response_interceptor(Arc::new(UnauthorizedHandler::new(
            &self.options,
            self.store.clone(),
            self.navigator.clone(),
        )));
        let guard = self
            .navigator
            .add_guard(Arc::new(AuthGuard::new(&self.options, self.store.clone())));

        let mut timers = Vec::new();

        if let Some(fetch) = self.options.fetch.as_ref().filter(|f| f.enabled) {
            let weak = Arc::downgrade(self);
            timers.push(spawn_periodic("fetch_user", fetch.period(), true, move || {
                let manager = weak.upgrade()?;
                Some(async move {
                    if let Err(e) = manager.fetch_user().await {
                        tracing::warn!(error = %e, "Periodic user fetch failed");
                    }
                })
            }));
        }

        if let Some(refresh) = self.options.refresh.as_ref().filter(|r| r.enabled) {
            let weak = Arc::downgrade(self);
            timers.push(spawn_periodic("refresh", refresh.period(), false, move || {
                let manager = weak.upgrade()?;
                Some(async move {
                    if !manager.check() {
                        tracing::debug!("No credential held, skipping refresh");
                        return;
                    }
                    if let Err(e) = manager.refresh().await {
                        tracing::warn!(error = %e, "Periodic refresh failed");
                    }
                })
            }));
        }

        tracing::info!(
            timers = timers.len(),
            authenticated = self.check(),
            "Session lifecycle started"
        );

        SessionHandle {
            http: self.http.clone(),
            navigator: self.navigator.clone(),
            interceptors: vec![injector, unauthorized],
            guard: Some(guard),
            timers,
        }
    }

    /// Exchange `credentials` for a session credential
    pub async fn login(&self, credentials: &Value) -> Result<()> {
        let login = self
            .options
            .login
            .as_ref()
            .ok_or_else(|| AuthError::Config("login is not configured".to_string()))?;

        let data = {
            let _flight = InFlight::enter(&self.logins_in_flight);
            tracing::debug!(url = %login.url, "Logging in...");

            let request = ApiRequest::endpoint(login.method, &login.url).with_json(credentials.clone());
            let response = self.http.send(request).await.map_err(|e| {
                tracing::error!(error = %e, "Login failed");
                e
            })?;

            token_data(
                &response,
                &login.header_token,
                &self.options.refresh_header_token,
                self.options.token_type,
            )?
        };

        self.store.set_token(Some(&data.token));
        if let Some(ref refresh_token) = data.refresh_token {
            self.store.set_refresh_token(Some(refresh_token));
        }
        tracing::info!("Logged in");

        if login.fetch_user {
            if let Err(e) = self.fetch_user().await {
                tracing::warn!(error = %e, "Failed to fetch user after login");
            }
        }

        if let Some(redirect) = self.options.login_redirect() {
            self.navigator.push(redirect);
        }
        Ok(())
    }

    /// Drop the session locally, telling the server first when configured.
    /// The server call is best-effort.
    pub async fn logout(&self) {
        let logout = &self.options.logout;

        if logout.make_request {
            let mut request = ApiRequest::endpoint(logout.method, &logout.url);
            if let Some(token) = self.store.get_token() {
                request.set_header(
                    &self.options.header_token,
                    &self.options.credential_header(&token),
                );
            }
            if let Err(e) = self.http.send(request).await {
                tracing::warn!(error = %e, "Logout request failed, clearing session anyway");
            }
        }

        self.store.reset_all();
        tracing::info!("Logged out");

        if let Some(redirect) = self.options.logout_redirect() {
            self.navigator.push(redirect);
        }
    }

    /// Fetch the user profile and store it.
    ///
    /// Returns `Ok(None)` without any request when no credential is held. The
    /// credential is attached here, so this works whether or not the session
    /// has been started.
    pub async fn fetch_user(&self) -> Result<Option<AuthUser>> {
        let Some(token) = self.store.get_token() else {
            tracing::debug!("No credential held, not fetching user");
            return Ok(None);
        };

        let fetch = self
            .options
            .fetch
            .as_ref()
            .ok_or_else(|| AuthError::Config("fetch is not configured".to_string()))?;

        let mut request = ApiRequest::endpoint(fetch.method, &fetch.url);
        request.set_header(&self.options.header_token, &self.options.credential_header(&token));
        let response = self.http.send(request).await?;

        let user = select_user(response.body, &self.options.fetch_item)?;
        self.store.set_user(Some(&user));
        tracing::debug!("User profile updated");
        Ok(Some(user))
    }

    /// Exchange the refresh credential for a new credential.
    ///
    /// On failure nothing is written.
    pub async fn refresh(&self) -> Result<()> {
        let data = {
            let _flight = InFlight::enter(&self.refreshes_in_flight);
            refresh::exchange(&self.http, &self.options, &self.store)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Credential refresh failed");
                    e
                })?
        };

        self.store.set_token(Some(&data.token));
        if let Some(ref refresh_token) = data.refresh_token {
            self.store.set_refresh_token(Some(refresh_token));
        }
        tracing::info!("Credential refreshed");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        if self.logins_in_flight.load(Ordering::SeqCst) > 0 {
            SessionState::Authenticating
        } else if self.refreshes_in_flight.load(Ordering::SeqCst) > 0 {
            SessionState::Refreshing
        } else if self.store.check() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        }
    }

    pub fn token(&self) -> Option<String> {
        self.store.get_token()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store.get_refresh_token()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.store.user()
    }

    pub fn roles(&self) -> Option<Vec<String>> {
        self.store.get_roles()
    }

    pub fn check(&self) -> bool {
        self.store.check()
    }

    pub fn check_roles(&self, roles: impl Into<RoleFilter>) -> bool {
        self.store.check_roles(roles)
    }

    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    pub fn http(&self) -> &Arc<AuthHttpClient> {
        &self.http
    }

    pub fn store(&self) -> &Arc<StoreManager> {
        &self.store
    }
}

/// Pick the profile out of a fetch response body
fn select_user(body: Value, fetch_item: &str) -> Result<AuthUser> {
    let selected = if fetch_item.is_empty() {
        body
    } else {
        match body {
            Value::Object(mut map) => map.remove(fetch_item).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    };

    match selected {
        Value::Object(user) => Ok(user),
        other => Err(AuthError::InvalidResponse(format!(
            "user profile is not an object: {}",
            other
        ))),
    }
}

/// Registrations made by [`AuthManager::start`]; released on `stop` or drop
pub struct SessionHandle {
    http: Arc<AuthHttpClient>,
    navigator: Arc<dyn Navigator>,
    interceptors: Vec<InterceptorId>,
    guard: Option<GuardId>,
    timers: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        for id in self.interceptors.drain(..) {
            self.http.remove_interceptor(id);
        }
        if let Some(id) = self.guard.take() {
            self.navigator.remove_guard(id);
            tracing::debug!("Session lifecycle stopped");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.release();
    }
}
