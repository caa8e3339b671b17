// Cookie-style attribute storage with expiry

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{
    decode_token, decode_user, encode_token, encode_user, roles_of, AuthUser, BackendKind,
    StorageBackend,
};
use crate::config::{AuthOptions, MAX_COOKIE_AGE_DAYS};
use crate::error::{AuthError, Result};

/// Named attributes with optional expiry
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, expires: Option<DateTime<Utc>>) -> Result<()>;
    fn remove(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredCookie {
    value: String,
    expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// In-process cookie jar
#[derive(Debug, Default, Clone)]
pub struct MemoryCookieJar {
    cookies: Arc<DashMap<String, StoredCookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the cookies currently held, expired ones included
    pub fn names(&self) -> Vec<String> {
        self.cookies.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        {
            let cookie = self.cookies.get(name)?;
            if !cookie.is_expired(Utc::now()) {
                return Some(cookie.value.clone());
            }
        }

        tracing::debug!(cookie = name, "Dropping expired cookie");
        self.cookies.remove(name);
        None
    }

    fn set(&self, name: &str, value: &str, expires: Option<DateTime<Utc>>) -> Result<()> {
        self.cookies.insert(
            name.to_string(),
            StoredCookie {
                value: value.to_string(),
                expires,
            },
        );
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.cookies.remove(name);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    raw: String,
    expires: HashMap<String, DateTime<Utc>>,
}

/// Raw `name=value; name2=value2` attribute string, the fallback when the
/// host has no cookie jar. Values are escaped so `;` never splits an entry.
#[derive(Debug, Default)]
pub struct DocumentCookies {
    state: RwLock<DocumentState>,
}

impl DocumentCookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing attribute string (e.g. a `Cookie:` header)
    pub fn from_cookie_string(raw: &str) -> Self {
        Self {
            state: RwLock::new(DocumentState {
                raw: raw.trim().to_string(),
                expires: HashMap::new(),
            }),
        }
    }

    /// Current attribute string, without expired entries
    pub fn cookie_string(&self) -> String {
        let now = Utc::now();
        match self.state.read() {
            Ok(state) => parse_pairs(&state.raw)
                .into_iter()
                .filter(|(name, _)| !is_expired(&state.expires, name, now))
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
            Err(_) => String::new(),
        }
    }

    fn write(&self, f: impl FnOnce(&mut DocumentState)) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| AuthError::Storage("cookie string lock poisoned".to_string()))?;
        f(&mut state);
        Ok(())
    }
}

impl CookieJar for DocumentCookies {
    fn get(&self, name: &str) -> Option<String> {
        let state = self.state.read().ok()?;
        if is_expired(&state.expires, name, Utc::now()) {
            return None;
        }

        let pattern = format!(r"(?:^|;\s*){}=([^;]*)", regex::escape(name));
        let re = Regex::new(&pattern).ok()?;
        re.captures(&state.raw)
            .and_then(|caps| caps.get(1))
            .map(|m| unescape_value(m.as_str()))
    }

    fn set(&self, name: &str, value: &str, expires: Option<DateTime<Utc>>) -> Result<()> {
        let escaped = escape_value(value);
        self.write(|state| {
            let mut pairs = parse_pairs(&state.raw);
            match pairs.iter_mut().find(|(n, _)| n == name) {
                Some(pair) => pair.1 = escaped,
                None => pairs.push((name.to_string(), escaped)),
            }
            state.raw = render_pairs(&pairs);

            match expires {
                Some(exp) => state.expires.insert(name.to_string(), exp),
                None => state.expires.remove(name),
            };
        })
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.write(|state| {
            let pairs: Vec<_> = parse_pairs(&state.raw)
                .into_iter()
                .filter(|(n, _)| n != name)
                .collect();
            state.raw = render_pairs(&pairs);
            state.expires.remove(name);
        })
    }
}

fn is_expired(expires: &HashMap<String, DateTime<Utc>>, name: &str, now: DateTime<Utc>) -> bool {
    expires.get(name).map(|exp| *exp <= now).unwrap_or(false)
}

fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            Some((name.trim().to_string(), value.to_string()))
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

fn render_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn escape_value(value: &str) -> String {
    value.replace('%', "%25").replace(';', "%3B")
}

fn unescape_value(value: &str) -> String {
    value.replace("%3B", ";").replace("%25", "%")
}

/// Backend over a cookie jar, with a configurable field-name mapping
pub struct CookieBackend {
    jar: Arc<dyn CookieJar>,
    token_name: String,
    refresh_token_name: String,
    user_name: String,
    roles_var: String,
    max_age: Duration,
}

impl CookieBackend {
    /// `cookie.max_age_days` is clamped to +/-`MAX_COOKIE_AGE_DAYS`
    pub fn new(jar: Arc<dyn CookieJar>, options: &AuthOptions) -> Self {
        let days = options
            .cookie
            .max_age_days
            .clamp(-MAX_COOKIE_AGE_DAYS, MAX_COOKIE_AGE_DAYS);
        if days != options.cookie.max_age_days {
            tracing::warn!(
                configured = options.cookie.max_age_days,
                used = days,
                "Cookie max age out of range, clamping"
            );
        }

        Self {
            jar,
            token_name: options.cookie_token_name().to_string(),
            refresh_token_name: options.cookie_refresh_token_name().to_string(),
            user_name: options.cookie_user_name().to_string(),
            roles_var: options.roles_var.clone(),
            max_age: Duration::try_days(days).unwrap_or_else(Duration::zero),
        }
    }

    fn write(&self, name: &str, value: Option<String>) -> Result<()> {
        match value {
            // No representable expiry leaves a session cookie
            Some(v) => self
                .jar
                .set(name, &v, Utc::now().checked_add_signed(self.max_age)),
            None => self.jar.remove(name),
        }
    }
}

impl StorageBackend for CookieBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    fn get_token(&self) -> Option<String> {
        self.jar
            .get(&self.token_name)
            .and_then(|raw| decode_token(&raw))
    }

    fn set_token(&self, token: Option<&str>) -> Result<()> {
        let encoded = token.map(encode_token).transpose()?;
        self.write(&self.token_name, encoded)
    }

    fn get_refresh_token(&self) -> Option<String> {
        self.jar
            .get(&self.refresh_token_name)
            .and_then(|raw| decode_token(&raw))
    }

    fn set_refresh_token(&self, token: Option<&str>) -> Result<()> {
        let encoded = token.map(encode_token).transpose()?;
        self.write(&self.refresh_token_name, encoded)
    }

    fn get_user(&self) -> Option<AuthUser> {
        self.jar.get(&self.user_name).and_then(|raw| decode_user(&raw))
    }

    fn set_user(&self, user: Option<&AuthUser>) -> Result<()> {
        let encoded = user.map(encode_user).transpose()?;
        self.write(&self.user_name, encoded)
    }

    fn get_roles(&self) -> Option<Vec<String>> {
        self.get_user().and_then(|u| roles_of(&u, &self.roles_var))
    }
}
