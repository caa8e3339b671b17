// Route access policy evaluated on every navigation

use serde_json::Value;
use std::sync::Arc;

use crate::config::AuthOptions;
use crate::router::{route_path as route, Navigation, NavigationGuard, RouteMeta};
use crate::store::StoreManager;

/// What a route's `auth_meta` entry asks for
#[derive(Debug, Clone, PartialEq, Eq)]
enum Access {
    Public,
    GuestOnly,
    Authenticated,
    Roles(Vec<String>),
}

impl Access {
    fn of(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Access::Public,
            Some(Value::Bool(true)) => Access::Authenticated,
            Some(Value::Bool(false)) => Access::GuestOnly,
            Some(Value::String(role)) => Access::Roles(vec![role.clone()]),
            Some(Value::Array(items)) => Access::Roles(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Some(other) => {
                tracing::debug!(meta = %other, "Unrecognized auth route metadata, treating as authenticated");
                Access::Authenticated
            }
        }
    }
}

pub struct AuthGuard {
    store: Arc<StoreManager>,
    auth_meta: String,
    auth_redirect: String,
    login_redirect: Option<String>,
}

impl AuthGuard {
    pub fn new(options: &AuthOptions, store: Arc<StoreManager>) -> Self {
        Self {
            store,
            auth_meta: options.auth_meta.clone(),
            auth_redirect: options.auth_redirect.clone(),
            login_redirect: options.login_redirect().map(str::to_string),
        }
    }

    fn to_auth_redirect(&self) -> Navigation {
        Navigation::Redirect(self.auth_redirect.clone())
    }
}

impl NavigationGuard for AuthGuard {
    fn check(&self, to: &str, meta: &RouteMeta) -> Navigation {
        if route(to) == route(&self.auth_redirect) {
            return Navigation::Proceed;
        }

        match Access::of(meta.get(&self.auth_meta)) {
            Access::Public => Navigation::Proceed,
            Access::GuestOnly => match self.login_redirect.as_deref() {
                Some(home) if self.store.check() && route(to) != route(home) => {
                    Navigation::Redirect(home.to_string())
                }
                _ => Navigation::Proceed,
            },
            Access::Authenticated => {
                if self.store.check() {
                    Navigation::Proceed
                } else {
                    self.to_auth_redirect()
                }
            }
            Access::Roles(roles) => {
                if self.store.check() && self.store.check_roles(roles) {
                    Navigation::Proceed
                } else {
                    tracing::debug!(path = to, "Navigation denied: missing credential or role");
                    self.to_auth_redirect()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoginOptions;
    use crate::host::Host;
    use crate::router::{MemoryRouter, Navigator};
    use crate::store::{AuthUser, BackendKind, MemoryStorage};
    use serde_json::json;

    fn router() -> Arc<MemoryRouter> {
        Arc::new(
            MemoryRouter::new("/")
                .with_route("/", json!({"auth": true}))
                .with_route("/login", json!({"auth": false}))
                .with_route("/register", json!({"auth": false}))
                .with_route("/admin", json!({"auth": "ROLE_ADMIN"}))
                .with_route("/reports", json!({"auth": ["ROLE_ADMIN", "ROLE_REPORTS"]}))
                .with_route("/about", json!({})),
        )
    }

    fn setup(login: bool) -> (Arc<StoreManager>, Arc<MemoryRouter>) {
        let options = AuthOptions {
            token_store: vec![BackendKind::SessionStorage],
            login: login.then(LoginOptions::default),
            ..AuthOptions::default()
        };
        let router = router();
        let host = Host::new(router.clone()).with_session_storage(Arc::new(MemoryStorage::new()));
        let store = Arc::new(StoreManager::new(&options, &host).unwrap());
        router.add_guard(Arc::new(AuthGuard::new(&options, store.clone())));
        (store, router)
    }

    fn user(roles: Value) -> AuthUser {
        json!({"login": "demo", "roles": roles}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_access_of() {
        assert_eq!(Access::of(None), Access::Public);
        assert_eq!(Access::of(Some(&json!(true))), Access::Authenticated);
        assert_eq!(Access::of(Some(&json!(false))), Access::GuestOnly);
        assert_eq!(
            Access::of(Some(&json!("a"))),
            Access::Roles(vec!["a".to_string()])
        );
        assert_eq!(
            Access::of(Some(&json!(["a", "b"]))),
            Access::Roles(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_protected_route_without_credential() {
        let (_store, router) = setup(true);
        assert_eq!(router.push("/"), "/login");
        assert_eq!(router.push("/about"), "/about");
    }

    #[test]
    fn test_protected_route_with_credential() {
        let (store, router) = setup(true);
        store.set_token(Some("T1"));
        assert_eq!(router.push("/"), "/");
    }

    #[test]
    fn test_role_routes() {
        let (store, router) = setup(true);
        store.set_token(Some("T1"));
        store.set_user(Some(&user(json!(["ROLE_REPORTS"]))));

        assert_eq!(router.push("/admin"), "/login");
        assert_eq!(router.push("/reports"), "/reports");

        store.set_user(Some(&user(json!(["ROLE_ADMIN"]))));
        assert_eq!(router.push("/admin"), "/admin");
    }

    #[test]
    fn test_role_route_needs_credential_too() {
        let (store, router) = setup(true);
        store.set_user(Some(&user(json!(["ROLE_ADMIN"]))));
        assert_eq!(router.push("/admin"), "/login");
    }

    #[test]
    fn test_guest_only_route() {
        let (store, router) = setup(true);
        assert_eq!(router.push("/register"), "/register");

        store.set_token(Some("T1"));
        assert_eq!(router.push("/register"), "/");
    }

    #[test]
    fn test_guest_only_route_without_login_config() {
        let (store, router) = setup(false);
        store.set_token(Some("T1"));
        assert_eq!(router.push("/register"), "/register");
    }

    #[test]
    fn test_auth_redirect_always_reachable() {
        let (store, router) = setup(true);
        store.set_token(Some("T1"));
        assert_eq!(router.push("/login"), "/login");
        assert_eq!(router.push("/login?next=/admin"), "/login?next=/admin");
    }
}
