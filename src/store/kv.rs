// String key-value media: durable (SQLite) and ephemeral (in-memory)

use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{
    decode_token, decode_user, encode_token, encode_user, roles_of, AuthUser, BackendKind,
    StorageBackend,
};
use crate::error::{AuthError, Result};

/// A pure string store keyed by name
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// Process-lifetime store
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    items: Arc<DashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|entry| entry.value().clone())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.remove(key);
        Ok(())
    }
}

/// Durable store in a single `auth_kv` SQLite table
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        tracing::debug!("Opening session database: {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Database that disappears with the process
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            (),
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AuthError::Storage("session database lock poisoned".to_string()))?;
        f(&conn)
    }
}

impl KeyValueStore for SqliteStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        let result: Result<Option<String>> = self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
                    row.get(0)
                })
                .optional()?)
        });

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Failed to read from session database");
                None
            }
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )?;
            Ok(())
        })
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM auth_kv WHERE key = ?", [key])?;
            Ok(())
        })
    }
}

/// Backend over a string key-value medium.
///
/// Tokens are stored JSON-encoded, the user as a JSON object.
pub struct KeyValueBackend {
    kind: BackendKind,
    store: Arc<dyn KeyValueStore>,
    token_key: String,
    refresh_token_key: String,
    user_key: String,
    roles_var: String,
}

impl KeyValueBackend {
    pub fn new(
        kind: BackendKind,
        store: Arc<dyn KeyValueStore>,
        options: &crate::config::AuthOptions,
    ) -> Self {
        Self {
            kind,
            store,
            token_key: options.token_default_name.clone(),
            refresh_token_key: options.refresh_token_default_name.clone(),
            user_key: options.user_default_name.clone(),
            roles_var: options.roles_var.clone(),
        }
    }

    fn write_token(&self, key: &str, token: Option<&str>) -> Result<()> {
        match token {
            Some(t) => self.store.set_item(key, &encode_token(t)?),
            None => self.store.remove_item(key),
        }
    }
}

impl StorageBackend for KeyValueBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn get_token(&self) -> Option<String> {
        self.store
            .get_item(&self.token_key)
            .and_then(|raw| decode_token(&raw))
    }

    fn set_token(&self, token: Option<&str>) -> Result<()> {
        self.write_token(&self.token_key, token)
    }

    fn get_refresh_token(&self) -> Option<String> {
        self.store
            .get_item(&self.refresh_token_key)
            .and_then(|raw| decode_token(&raw))
    }

    fn set_refresh_token(&self, token: Option<&str>) -> Result<()> {
        self.write_token(&self.refresh_token_key, token)
    }

    fn get_user(&self) -> Option<AuthUser> {
        self.store
            .get_item(&self.user_key)
            .and_then(|raw| decode_user(&raw))
    }

    fn set_user(&self, user: Option<&AuthUser>) -> Result<()> {
        match user {
            Some(u) => self.store.set_item(&self.user_key, &encode_user(u)?),
            None => self.store.remove_item(&self.user_key),
        }
    }

    fn get_roles(&self) -> Option<Vec<String>> {
        self.get_user().and_then(|u| roles_of(&u, &self.roles_var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthOptions;
    use serde_json::json;

    fn sample_user() -> AuthUser {
        json!({"login": "demo", "roles": ["role_1", "role_2"], "email": "demo@demo"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_memory_storage_basic() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.set_item("a", "1").unwrap();
        assert_eq!(storage.get_item("a"), Some("1".to_string()));
        assert_eq!(storage.len(), 1);

        storage.remove_item("a").unwrap();
        assert_eq!(storage.get_item("a"), None);
    }

    #[test]
    fn test_sqlite_storage_upsert_and_remove() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert_eq!(storage.get_item("k"), None);

        storage.set_item("k", "v1").unwrap();
        storage.set_item("k", "v2").unwrap();
        assert_eq!(storage.get_item("k"), Some("v2".to_string()));

        storage.remove_item("k").unwrap();
        assert_eq!(storage.get_item("k"), None);

        // Removing a missing key is not an error
        storage.remove_item("k").unwrap();
    }

    #[test]
    fn test_sqlite_storage_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!(
            "authkeep-kv-test-{}.sqlite3",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set_item("auth_token", "\"T1\"").unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.get_item("auth_token"), Some("\"T1\"".to_string()));

        drop(storage);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_backend_stores_token_json_encoded() {
        let storage = MemoryStorage::new();
        let backend = KeyValueBackend::new(
            BackendKind::SessionStorage,
            Arc::new(storage.clone()),
            &AuthOptions::default(),
        );

        backend.set_token(Some("abc")).unwrap();
        assert_eq!(storage.get_item("auth_token"), Some("\"abc\"".to_string()));
        assert_eq!(backend.get_token(), Some("abc".to_string()));

        backend.set_token(None).unwrap();
        assert_eq!(storage.get_item("auth_token"), None);
        assert_eq!(backend.get_token(), None);
    }

    #[test]
    fn test_backend_user_and_roles() {
        let storage = MemoryStorage::new();
        let backend = KeyValueBackend::new(
            BackendKind::LocalStorage,
            Arc::new(storage.clone()),
            &AuthOptions::default(),
        );

        assert_eq!(backend.get_roles(), None);

        let user = sample_user();
        backend.set_user(Some(&user)).unwrap();
        assert_eq!(backend.get_user(), Some(user.clone()));
        assert_eq!(
            storage.get_item("auth_user"),
            Some(serde_json::to_string(&user).unwrap())
        );
        assert_eq!(
            backend.get_roles(),
            Some(vec!["role_1".to_string(), "role_2".to_string()])
        );

        backend.set_user(None).unwrap();
        assert_eq!(backend.get_user(), None);
        assert_eq!(backend.get_roles(), None);
    }

    #[test]
    fn test_backend_refresh_token_independent() {
        let backend = KeyValueBackend::new(
            BackendKind::LocalStorage,
            Arc::new(SqliteStorage::open_in_memory().unwrap()),
            &AuthOptions::default(),
        );

        backend.set_token(Some("T")).unwrap();
        backend.set_refresh_token(Some("R")).unwrap();
        assert_eq!(backend.get_refresh_token(), Some("R".to_string()));

        backend.set_refresh_token(None).unwrap();
        assert_eq!(backend.get_refresh_token(), None);
        assert_eq!(backend.get_token(), Some("T".to_string()));
    }

    #[test]
    fn test_backend_ignores_leftover_null() {
        let storage = MemoryStorage::new();
        storage.set_item("auth_token", "null").unwrap();
        let backend = KeyValueBackend::new(
            BackendKind::SessionStorage,
            Arc::new(storage),
            &AuthOptions::default(),
        );
        assert_eq!(backend.get_token(), None);
    }
}
