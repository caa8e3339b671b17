// HTTP pipeline hooks: credential injection and 401 invalidation

use std::sync::Arc;

use crate::config::{AuthOptions, TokenType};
use crate::http_client::{ApiRequest, HttpResponse, RequestInterceptor, ResponseInterceptor};
use crate::router::{route_path as route, Navigator};
use crate::store::StoreManager;

use super::credentials;

/// Injects the held credential into every request except the auth endpoints
pub struct CredentialInjector {
    store: Arc<StoreManager>,
    header_token: String,
    token_type: TokenType,
    /// Credential template, `{auth_token}` replaced per request
    template: String,
    /// Login, refresh and logout routes
    skip: Vec<String>,
}

impl CredentialInjector {
    pub fn new(options: &AuthOptions, store: Arc<StoreManager>) -> Self {
        let mut skip = Vec::new();
        if let Some(ref login) = options.login {
            skip.push(route(&login.url).to_string());
        }
        if let Some(ref refresh) = options.refresh {
            skip.push(route(&refresh.url).to_string());
        }
        skip.push(route(&options.logout.url).to_string());
        skip.retain(|r| !r.is_empty());

        Self {
            store,
            header_token: options.header_token.clone(),
            token_type: options.token_type,
            template: options.header_token_replace.clone(),
            skip,
        }
    }
}

impl RequestInterceptor for CredentialInjector {
    fn on_request(&self, request: &mut ApiRequest) {
        if self.skip.iter().any(|r| r == request.route()) {
            return;
        }
        if let Some(token) = self.store.get_token() {
            request.set_header(
                &self.header_token,
                &credentials::header_value(self.token_type, &self.template, &token),
            );
        }
    }
}

/// Clears the session on a 401 and sends the user to the auth redirect
pub struct UnauthorizedHandler {
    store: Arc<StoreManager>,
    navigator: Arc<dyn Navigator>,
    auth_redirect: String,
    login_route: Option<String>,
}

impl UnauthorizedHandler {
    pub fn new(options: &AuthOptions, store: Arc<StoreManager>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            store,
            navigator,
            auth_redirect: options.auth_redirect.clone(),
            login_route: options.login.as_ref().map(|l| route(&l.url).to_string()),
        }
    }
}

impl ResponseInterceptor for UnauthorizedHandler {
    fn on_response(&self, request: &ApiRequest, response: &HttpResponse) {
        if response.status != 401 {
            return;
        }
        if self.login_route.as_deref() == Some(request.route()) {
            return;
        }

        tracing::info!(path = %request.path, "Received 401, invalidating session");
        self.store.reset_all();

        if route(&self.navigator.current_path()) != route(&self.auth_redirect) {
            self.navigator.push(&self.auth_redirect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoginOptions, RefreshOptions};
    use crate::host::Host;
    use crate::router::MemoryRouter;
    use crate::store::{BackendKind, MemoryStorage};
    use reqwest::header::HeaderMap;
    use serde_json::Value;

    fn options() -> AuthOptions {
        AuthOptions {
            token_store: vec![BackendKind::SessionStorage],
            login: Some(LoginOptions::default()),
            refresh: Some(RefreshOptions {
                url: "/auth/refresh".to_string(),
                ..RefreshOptions::default()
            }),
            ..AuthOptions::default()
        }
    }

    fn setup(options: &AuthOptions) -> (Arc<StoreManager>, Arc<MemoryRouter>) {
        let router = Arc::new(MemoryRouter::new("/dashboard"));
        let host = Host::new(router.clone()).with_session_storage(Arc::new(MemoryStorage::new()));
        let store = Arc::new(StoreManager::new(options, &host).unwrap());
        (store, router)
    }

    fn status(code: u16) -> HttpResponse {
        HttpResponse {
            status: code,
            headers: HeaderMap::new(),
            body: Value::Null,
        }
    }

    #[test]
    fn test_injects_credential() {
        let options = options();
        let (store, _router) = setup(&options);
        let injector = CredentialInjector::new(&options, store.clone());

        let mut request = ApiRequest::get("/api/items");
        injector.on_request(&mut request);
        assert_eq!(request.header("Authorization"), None);

        store.set_token(Some("T1"));
        injector.on_request(&mut request);
        assert_eq!(request.header("Authorization"), Some("Bearer T1"));
    }

    #[test]
    fn test_skips_auth_endpoints() {
        let options = options();
        let (store, _router) = setup(&options);
        store.set_token(Some("T1"));
        let injector = CredentialInjector::new(&options, store);

        for path in ["/auth/login", "/auth/refresh", "/auth/logout?all=1"] {
            let mut request = ApiRequest::get(path);
            injector.on_request(&mut request);
            assert_eq!(request.header("Authorization"), None, "{}", path);
        }
    }

    #[test]
    fn test_empty_token_type_sends_bare_credential() {
        let mut options = options();
        options.token_type = TokenType::None;
        options.header_token = "X-Token".to_string();
        let (store, _router) = setup(&options);
        store.set_token(Some("T1"));

        let mut request = ApiRequest::get("/api/items");
        CredentialInjector::new(&options, store).on_request(&mut request);
        assert_eq!(request.header("x-token"), Some("T1"));
    }

    #[test]
    fn test_injects_through_header_template() {
        let mut options = options();
        options.header_token_replace = "token={auth_token}".to_string();
        let (store, _router) = setup(&options);
        store.set_token(Some("T1"));

        let mut request = ApiRequest::get("/api/items");
        CredentialInjector::new(&options, store).on_request(&mut request);
        assert_eq!(request.header("Authorization"), Some("Bearer token=T1"));
    }

    #[test]
    fn test_401_resets_and_redirects_once() {
        let options = options();
        let (store, router) = setup(&options);
        store.set_token(Some("T1"));
        let handler = UnauthorizedHandler::new(&options, store.clone(), router.clone());

        let request = ApiRequest::get("/auth/user");
        handler.on_response(&request, &status(401));
        handler.on_response(&request, &status(401));

        assert!(!store.check());
        assert_eq!(router.current_path(), "/login");
        assert_eq!(router.navigation_count(), 1);
    }

    #[test]
    fn test_401_from_login_is_ignored() {
        let options = options();
        let (store, router) = setup(&options);
        store.set_token(Some("T1"));
        let handler = UnauthorizedHandler::new(&options, store.clone(), router.clone());

        handler.on_response(&ApiRequest::post("/auth/login", Value::Null), &status(401));
        assert!(store.check());
        assert_eq!(router.navigation_count(), 0);
    }

    #[test]
    fn test_other_statuses_are_ignored() {
        let options = options();
        let (store, router) = setup(&options);
        store.set_token(Some("T1"));
        let handler = UnauthorizedHandler::new(&options, store.clone(), router.clone());

        handler.on_response(&ApiRequest::get("/auth/user"), &status(403));
        handler.on_response(&ApiRequest::get("/auth/user"), &status(500));
        assert!(store.check());
        assert_eq!(router.navigation_count(), 0);
    }
}
