// Session lifecycle
// Login, logout, user fetch, refresh, timers and HTTP/navigation hooks

mod credentials;
mod guard;
mod interceptors;
mod manager;
mod refresh;
mod timers;
mod types;

pub use credentials::{extract_token, header_value};
pub use guard::AuthGuard;
pub use interceptors::{CredentialInjector, UnauthorizedHandler};
pub use manager::{AuthManager, SessionHandle};
pub use types::{SessionState, TokenData};
