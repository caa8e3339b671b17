use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::BackendKind;

/// Prefix for environment overrides of `AuthOptions` (e.g. AUTHKEEP__ROLES_VAR)
const ENV_PREFIX: &str = "AUTHKEEP";

/// Directory name under the platform data dir
const APP_DIR: &str = "authkeep";

/// Placeholder substituted in `header_token_replace`
pub const TOKEN_PLACEHOLDER: &str = "{auth_token}";

/// Placeholder substituted in `header_refresh_token_replace`
pub const REFRESH_TOKEN_PLACEHOLDER: &str = "{refresh_token}";

/// Longest cookie lifetime accepted, in days (100 years)
pub const MAX_COOKIE_AGE_DAYS: i64 = 36_500;

/// authkeep - client-side auth session keeper
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the API server
    #[arg(short = 'u', long, env = "AUTHKEEP_BASE_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Path to a TOML file with auth options
    #[arg(short = 'c', long, env = "AUTHKEEP_CONFIG")]
    pub config: Option<String>,

    /// Directory holding the persisted session database
    #[arg(short = 's', long, env = "AUTHKEEP_STORE_DIR")]
    pub store_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Log in and persist the session
    Login {
        /// Account name sent as `username`
        #[arg(long)]
        username: Option<String>,

        /// Password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Log out and clear the persisted session
    Logout,
    /// Exchange the refresh token for a new credential
    Refresh,
    /// Fetch and print the authenticated user
    Whoami,
    /// Show whether a session is held, optionally checking roles
    Status {
        /// Role to check (repeat for any-of)
        #[arg(short, long)]
        role: Vec<String>,
    },
    /// Authenticated GET against the API, printing the body
    Get {
        /// Path relative to the base URL
        path: String,
    },
}

/// Runtime configuration for the CLI
#[derive(Clone, Debug)]
pub struct Config {
    pub base_url: String,
    pub store_dir: PathBuf,
    pub log_level: String,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub options: AuthOptions,
}

impl Config {
    /// Load configuration with priority: CLI > ENV > file > defaults
    pub fn load(args: &CliArgs) -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config_path = args.config.as_deref().map(expand_tilde);
        let options = AuthOptions::load(config_path.as_deref())?;

        let store_dir = match args.store_dir.as_deref() {
            Some(dir) => expand_tilde(dir),
            None => dirs::data_dir()
                .context("Could not find data directory (use -s or set AUTHKEEP_STORE_DIR)")?
                .join(APP_DIR),
        };

        Ok(Config {
            base_url: args.base_url.clone(),
            store_dir,
            log_level: args.log_level.clone(),
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            options,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            anyhow::bail!("Base URL cannot be empty");
        }
        self.options.validate()
    }

    /// Path of the durable session database
    pub fn session_db_path(&self) -> PathBuf {
        self.store_dir.join("session.sqlite3")
    }
}

/// Scheme prepended to the credential in the auth header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TokenType {
    #[default]
    Bearer,
    Basic,
    #[serde(rename = "")]
    None,
}

impl TokenType {
    pub fn scheme(&self) -> &'static str {
        match self {
            TokenType::Bearer => "Bearer",
            TokenType::Basic => "Basic",
            TokenType::None => "",
        }
    }
}

/// HTTP method for a configured endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

/// Login endpoint; absent means login is disabled
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginOptions {
    pub url: String,
    pub method: HttpMethod,
    /// Where to navigate after login; `None` or empty disables
    pub redirect: Option<String>,
    /// Response header carrying the credential
    pub header_token: String,
    /// Fetch the user right after login
    pub fetch_user: bool,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            url: "/auth/login".to_string(),
            method: HttpMethod::Post,
            redirect: Some("/".to_string()),
            header_token: "Authorization".to_string(),
            fetch_user: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoutOptions {
    pub url: String,
    pub method: HttpMethod,
    pub redirect: Option<String>,
    /// Tell the server about the logout (best-effort)
    pub make_request: bool,
}

impl Default for LogoutOptions {
    fn default() -> Self {
        Self {
            url: "/auth/logout".to_string(),
            method: HttpMethod::Post,
            redirect: Some("/login".to_string()),
            make_request: false,
        }
    }
}

/// Fetch-user and refresh endpoints share this shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicOptions {
    pub url: String,
    pub method: HttpMethod,
    /// Run on a background timer
    pub enabled: bool,
    /// Timer period in minutes
    pub interval: u64,
}

impl PeriodicOptions {
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval * 60)
    }
}

pub type FetchOptions = PeriodicOptions;
pub type RefreshOptions = PeriodicOptions;

impl Default for PeriodicOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: HttpMethod::Get,
            enabled: false,
            interval: 30,
        }
    }
}

/// Cookie field-name mapping and expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    pub token_name: Option<String>,
    pub refresh_token_name: Option<String>,
    pub user_name: Option<String>,
    pub max_age_days: i64,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            token_name: None,
            refresh_token_name: None,
            user_name: None,
            max_age_days: 7,
        }
    }
}

/// Everything the store manager and the session lifecycle read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    /// Route metadata key consulted by the navigation guard
    pub auth_meta: String,
    /// User attribute holding the role list
    pub roles_var: String,
    pub token_default_name: String,
    pub refresh_token_default_name: String,
    pub user_default_name: String,
    /// Active backends, in read-precedence order
    pub token_store: Vec<BackendKind>,
    pub token_type: TokenType,
    /// Request header the credential is injected into
    pub header_token: String,
    /// Header carrying the refresh credential (both directions)
    pub refresh_header_token: String,
    /// Template for the injected credential; `{auth_token}` is replaced
    pub header_token_replace: String,
    /// Template for the sent refresh credential; `{refresh_token}` is replaced
    pub header_refresh_token_replace: String,
    /// Namespace of the host-state module
    pub state_namespace: String,
    /// Key of the user object inside the fetch response; empty = whole body
    pub fetch_item: String,
    /// Where to send unauthenticated navigation and 401s
    pub auth_redirect: String,
    pub cookie: CookieOptions,
    pub login: Option<LoginOptions>,
    pub logout: LogoutOptions,
    pub fetch: Option<FetchOptions>,
    pub refresh: Option<RefreshOptions>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auth_meta: "auth".to_string(),
            roles_var: "roles".to_string(),
            token_default_name: "auth_token".to_string(),
            refresh_token_default_name: "refresh_token".to_string(),
            user_default_name: "auth_user".to_string(),
            token_store: vec![BackendKind::LocalStorage],
            token_type: TokenType::Bearer,
            header_token: "Authorization".to_string(),
            refresh_header_token: "RefreshTokenAuth".to_string(),
            header_token_replace: TOKEN_PLACEHOLDER.to_string(),
            header_refresh_token_replace: REFRESH_TOKEN_PLACEHOLDER.to_string(),
            state_namespace: "auth".to_string(),
            fetch_item: String::new(),
            auth_redirect: "/login".to_string(),
            cookie: CookieOptions::default(),
            login: None,
            logout: LogoutOptions::default(),
            fetch: None,
            refresh: None,
        }
    }
}

impl AuthOptions {
    /// Load options from an optional TOML file plus AUTHKEEP__* env overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("token_store"),
        );

        let options: AuthOptions = builder
            .build()
            .context("Failed to read auth options")?
            .try_deserialize()
            .context("Failed to parse auth options")?;

        Ok(options)
    }

    /// Validate option values
    pub fn validate(&self) -> Result<()> {
        if self.token_store.is_empty() {
            anyhow::bail!("token_store must name at least one backend");
        }
        if self.auth_redirect.is_empty() {
            anyhow::bail!("auth_redirect cannot be empty");
        }
        if !self.header_token_replace.contains(TOKEN_PLACEHOLDER) {
            anyhow::bail!("header_token_replace must contain {}", TOKEN_PLACEHOLDER);
        }
        if !self
            .header_refresh_token_replace
            .contains(REFRESH_TOKEN_PLACEHOLDER)
        {
            anyhow::bail!(
                "header_refresh_token_replace must contain {}",
                REFRESH_TOKEN_PLACEHOLDER
            );
        }
        if !(-MAX_COOKIE_AGE_DAYS..=MAX_COOKIE_AGE_DAYS).contains(&self.cookie.max_age_days) {
            anyhow::bail!(
                "cookie.max_age_days must be within +/-{} (got {})",
                MAX_COOKIE_AGE_DAYS,
                self.cookie.max_age_days
            );
        }
        if let Some(ref login) = self.login {
            if login.url.is_empty() {
                anyhow::bail!("login.url cannot be empty");
            }
            if login.header_token.is_empty() {
                anyhow::bail!("login.header_token cannot be empty");
            }
        }
        for (name, periodic) in [("fetch", &self.fetch), ("refresh", &self.refresh)] {
            if let Some(p) = periodic {
                if p.url.is_empty() {
                    anyhow::bail!("{}.url cannot be empty", name);
                }
                if p.enabled && p.interval == 0 {
                    anyhow::bail!("{}.interval must be positive when enabled", name);
                }
            }
        }
        Ok(())
    }

    pub fn cookie_token_name(&self) -> &str {
        self.cookie
            .token_name
            .as_deref()
            .unwrap_or(&self.token_default_name)
    }

    pub fn cookie_refresh_token_name(&self) -> &str {
        self.cookie
            .refresh_token_name
            .as_deref()
            .unwrap_or(&self.refresh_token_default_name)
    }

    pub fn cookie_user_name(&self) -> &str {
        self.cookie
            .user_name
            .as_deref()
            .unwrap_or(&self.user_default_name)
    }

    /// Turn off the fetch and refresh timers, keeping the endpoints
    pub fn disable_timers(&mut self) {
        for periodic in [&mut self.fetch, &mut self.refresh].into_iter().flatten() {
            periodic.enabled = false;
        }
    }

    /// Value of the injected credential header
    pub fn credential_header(&self, token: &str) -> String {
        crate::auth::header_value(self.token_type, &self.header_token_replace, token)
    }

    /// Value of the refresh credential header
    pub fn refresh_credential_header(&self, refresh_token: &str) -> String {
        self.header_refresh_token_replace
            .replace(REFRESH_TOKEN_PLACEHOLDER, refresh_token)
    }

    /// Redirect target after login, if enabled
    pub fn login_redirect(&self) -> Option<&str> {
        self.login
            .as_ref()
            .and_then(|l| l.redirect.as_deref())
            .filter(|r| !r.is_empty())
    }

    /// Redirect target after logout, if enabled
    pub fn logout_redirect(&self) -> Option<&str> {
        self.logout.redirect.as_deref().filter(|r| !r.is_empty())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_defaults() {
        let options = AuthOptions::default();
        assert_eq!(options.token_store, vec![BackendKind::LocalStorage]);
        assert_eq!(options.token_type, TokenType::Bearer);
        assert_eq!(options.auth_redirect, "/login");
        assert!(options.login.is_none());
        assert!(options.fetch.is_none());
        assert!(options.refresh.is_none());
        assert!(!options.logout.make_request);
        assert_eq!(options.logout_redirect(), Some("/login"));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_cookie_names_fall_back_to_defaults() {
        let mut options = AuthOptions::default();
        assert_eq!(options.cookie_token_name(), "auth_token");
        assert_eq!(options.cookie_user_name(), "auth_user");

        options.cookie.token_name = Some("sid".to_string());
        assert_eq!(options.cookie_token_name(), "sid");
        assert_eq!(options.cookie_refresh_token_name(), "refresh_token");
    }

    #[test]
    fn test_deserialize_partial_json() {
        let options: AuthOptions = serde_json::from_value(serde_json::json!({
            "token_store": ["host_state", "session_storage", "cookie"],
            "token_type": "",
            "login": { "url": "/api/login", "fetch_user": false },
            "refresh": { "enabled": true, "interval": 5, "url": "/api/refresh" }
        }))
        .unwrap();

        assert_eq!(
            options.token_store,
            vec![
                BackendKind::HostState,
                BackendKind::SessionStorage,
                BackendKind::Cookie
            ]
        );
        assert_eq!(options.token_type, TokenType::None);

        let login = options.login.as_ref().unwrap();
        assert_eq!(login.url, "/api/login");
        assert_eq!(login.method, HttpMethod::Post);
        assert_eq!(login.header_token, "Authorization");
        assert!(!login.fetch_user);

        let refresh = options.refresh.as_ref().unwrap();
        assert_eq!(refresh.method, HttpMethod::Get);
        assert_eq!(refresh.period(), std::time::Duration::from_secs(300));
    }

    #[test]
    fn test_login_redirect_empty_disables() {
        let mut options = AuthOptions::default();
        assert_eq!(options.login_redirect(), None);

        options.login = Some(LoginOptions::default());
        assert_eq!(options.login_redirect(), Some("/"));

        options.login.as_mut().unwrap().redirect = Some(String::new());
        assert_eq!(options.login_redirect(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut options = AuthOptions::default();
        options.token_store.clear();
        assert!(options.validate().is_err());

        let mut options = AuthOptions::default();
        options.refresh = Some(PeriodicOptions {
            url: "/auth/refresh".to_string(),
            enabled: true,
            interval: 0,
            ..PeriodicOptions::default()
        });
        assert!(options.validate().is_err());

        let mut options = AuthOptions::default();
        options.fetch = Some(PeriodicOptions::default());
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_disable_timers_keeps_endpoints_as_configured() {
        let mut options = AuthOptions::default();
        options.disable_timers();
        assert!(options.login.is_none());
        assert!(options.fetch.is_none());
        assert!(options.refresh.is_none());

        options.fetch = Some(PeriodicOptions {
            url: "/me".to_string(),
            enabled: true,
            ..PeriodicOptions::default()
        });
        options.refresh = Some(PeriodicOptions {
            url: "/token".to_string(),
            method: HttpMethod::Post,
            enabled: true,
            interval: 5,
        });
        options.disable_timers();

        let fetch = options.fetch.as_ref().unwrap();
        assert_eq!(fetch.url, "/me");
        assert!(!fetch.enabled);
        let refresh = options.refresh.as_ref().unwrap();
        assert_eq!(refresh.url, "/token");
        assert_eq!(refresh.method, HttpMethod::Post);
        assert!(!refresh.enabled);
    }

    #[test]
    fn test_header_templates() {
        let mut options = AuthOptions::default();
        assert_eq!(options.credential_header("T1"), "Bearer T1");
        assert_eq!(options.refresh_credential_header("R1"), "R1");

        options.header_token_replace = "v1.{auth_token}".to_string();
        options.header_refresh_token_replace = "Refresh {refresh_token}".to_string();
        assert_eq!(options.credential_header("T1"), "Bearer v1.T1");
        assert_eq!(options.refresh_credential_header("R1"), "Refresh R1");
        assert!(options.validate().is_ok());

        options.token_type = TokenType::None;
        assert_eq!(options.credential_header("T1"), "v1.T1");
    }

    #[test]
    fn test_validate_rejects_template_without_placeholder() {
        let mut options = AuthOptions::default();
        options.header_token_replace = "static".to_string();
        assert!(options.validate().is_err());

        let mut options = AuthOptions::default();
        options.header_refresh_token_replace = String::new();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_cookie_max_age() {
        let mut options = AuthOptions::default();
        options.cookie.max_age_days = 200_000_000;
        assert!(options.validate().is_err());

        options.cookie.max_age_days = -200_000_000;
        assert!(options.validate().is_err());

        options.cookie.max_age_days = i64::MIN;
        assert!(options.validate().is_err());

        options.cookie.max_age_days = MAX_COOKIE_AGE_DAYS;
        assert!(options.validate().is_ok());
        options.cookie.max_age_days = -1;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(reqwest::Method::from(HttpMethod::Get), reqwest::Method::GET);
        assert_eq!(reqwest::Method::from(HttpMethod::Post), reqwest::Method::POST);
    }
}
