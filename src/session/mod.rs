//! Session orchestration: authentication state, the session service, and
//! the OAuth provider registry.

pub mod oauth;
pub mod service;
pub mod state;

pub use oauth::{OauthProvider, ProviderKind};
pub use service::{SessionService, ACCESS_TOKEN_HEADER, ANONYMOUS_USER};
pub use state::AuthState;
