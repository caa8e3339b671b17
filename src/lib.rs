// authkeep - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod host;
pub mod http_client;
pub mod router;
pub mod store;

pub use auth::{AuthManager, SessionHandle, SessionState};
pub use config::AuthOptions;
pub use error::{AuthError, Result};
pub use host::{Host, SessionSlot, SessionSnapshot};
pub use store::{AuthUser, BackendKind, StoreManager};
